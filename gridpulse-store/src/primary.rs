//! Primary store: append-only embedded SQLite database retaining all
//! records indefinitely.
//!
//! Single-writer by construction (one-connection pool); the ingestion
//! pipeline is the only writer and the API reads through the same pool.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};

use gridpulse_common::TelemetryRecord;

use crate::error::Result;
use crate::sink::TelemetryWriter;

/// A record as stored in (and read back from) the primary store.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub device_id: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub ts: i64,
}

/// Append-only SQLite store.
#[derive(Clone)]
pub struct PrimaryStore {
    pool: Pool<Sqlite>,
}

impl PrimaryStore {
    /// Open (or create) the database file and ensure the schema exists.
    ///
    /// A failure here is fatal to the bridge: without the primary store
    /// there is nowhere durable to put telemetry.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database. Used by tests and the HTTP handler
    /// tests; semantics match [`PrimaryStore::open`].
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS telemetry (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                ts INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        // Same-millisecond records are legal; ordering ties break on the
        // autoincrement id, which also provides uniqueness.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_telemetry_device_ts
             ON telemetry (device_id, ts DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent records for a device, newest first, bounded by `limit`.
    pub async fn recent_by_device(&self, device_id: &str, limit: i64) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            "SELECT id, device_id, topic, payload_json, ts
             FROM telemetry
             WHERE device_id = ?1
             ORDER BY ts DESC, id DESC
             LIMIT ?2",
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let payload_json: String = row.get("payload_json");
                StoredRecord {
                    id: row.get("id"),
                    device_id: row.get("device_id"),
                    topic: row.get("topic"),
                    payload: serde_json::from_str(&payload_json)
                        .unwrap_or(serde_json::Value::String(payload_json)),
                    ts: row.get("ts"),
                }
            })
            .collect())
    }
}

impl TelemetryWriter for PrimaryStore {
    async fn insert(&self, record: &TelemetryRecord) -> Result<()> {
        let payload_json = serde_json::to_string(&record.payload)?;

        sqlx::query(
            "INSERT INTO telemetry (device_id, topic, payload_json, ts)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&record.device_id)
        .bind(&record.topic)
        .bind(payload_json)
        .bind(record.ts)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridpulse_common::{Metrics, normalize};

    fn record(device_id: &str, ts: i64, voltage: f64) -> TelemetryRecord {
        TelemetryRecord {
            device_id: device_id.to_string(),
            topic: format!("energy/solar/{}/telemetry", device_id),
            raw: format!("{{\"voltage\":{}}}", voltage),
            payload: serde_json::json!({"voltage": voltage}),
            ts,
            device_ts: None,
            metrics: Metrics {
                voltage: Some(voltage),
                ..Metrics::default()
            },
        }
    }

    #[tokio::test]
    async fn test_insert_then_recent_newest_first() {
        let store = PrimaryStore::open_in_memory().await.unwrap();

        store.insert(&record("solar_1", 1000, 12.0)).await.unwrap();
        store.insert(&record("solar_1", 3000, 12.2)).await.unwrap();
        store.insert(&record("solar_1", 2000, 12.1)).await.unwrap();

        let recent = store.recent_by_device("solar_1", 10).await.unwrap();
        let timestamps: Vec<i64> = recent.iter().map(|r| r.ts).collect();
        assert_eq!(timestamps, vec![3000, 2000, 1000]);
    }

    #[tokio::test]
    async fn test_recent_respects_limit() {
        let store = PrimaryStore::open_in_memory().await.unwrap();

        for ts in 0..5 {
            store.insert(&record("solar_1", ts, 12.0)).await.unwrap();
        }

        let recent = store.recent_by_device("solar_1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].ts, 4);
    }

    #[tokio::test]
    async fn test_recent_filters_by_device() {
        let store = PrimaryStore::open_in_memory().await.unwrap();

        store.insert(&record("solar_1", 1000, 12.0)).await.unwrap();
        store.insert(&record("wind_2", 2000, 6.0)).await.unwrap();

        let recent = store.recent_by_device("solar_1", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].device_id, "solar_1");

        let none = store.recent_by_device("battery_9", 10).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_same_millisecond_records_do_not_collide() {
        let store = PrimaryStore::open_in_memory().await.unwrap();

        store.insert(&record("solar_1", 1000, 12.0)).await.unwrap();
        store.insert(&record("solar_1", 1000, 12.5)).await.unwrap();

        let recent = store.recent_by_device("solar_1", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        // The later insert wins the tie.
        assert_eq!(recent[0].payload["voltage"], 12.5);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_payload() {
        let store = PrimaryStore::open_in_memory().await.unwrap();

        let record = normalize("energy/solar/1/telemetry", br#"{"voltage":12.4,"current":1.8}"#);
        store.insert(&record).await.unwrap();

        let recent = store.recent_by_device("solar_1", 1).await.unwrap();
        assert_eq!(recent[0].payload, record.payload);
        assert_eq!(recent[0].topic, "energy/solar/1/telemetry");
    }

    #[tokio::test]
    async fn test_text_payload_round_trip() {
        let store = PrimaryStore::open_in_memory().await.unwrap();

        let record = normalize("battery/data", b"not json");
        store.insert(&record).await.unwrap();

        let recent = store.recent_by_device("battery/data", 1).await.unwrap();
        assert_eq!(recent[0].payload, serde_json::Value::String("not json".into()));
    }

    #[tokio::test]
    async fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.db");

        let store = PrimaryStore::open(path.to_str().unwrap()).await.unwrap();
        store.insert(&record("solar_1", 1000, 12.0)).await.unwrap();

        assert!(path.exists());
    }
}
