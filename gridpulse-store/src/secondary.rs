//! Secondary store: replicated MongoDB collection with a retention window
//! and analytics reads (range, stats, export).
//!
//! The bridge treats this store as optional: if it is unreachable at
//! startup, ingestion and primary-store persistence continue and the read
//! endpoints report it as unavailable.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::TryStreamExt;
use mongodb::bson::{Bson, DateTime, Document, doc};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde_json::Value;

use gridpulse_common::{
    SecondaryStoreConfig, TelemetryRecord, current_timestamp_millis, iso_from_millis,
};

use crate::error::Result;
use crate::export::{ExportFormat, to_csv};
use crate::sink::TelemetryWriter;
use crate::stats::{DeviceStats, METRIC_FIELDS, summarize};

const MILLIS_PER_HOUR: i64 = 3_600_000;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// MongoDB-backed document store.
#[derive(Clone)]
pub struct SecondaryStore {
    collection: Collection<Document>,
}

impl SecondaryStore {
    /// Connect, ping, and ensure indexes.
    ///
    /// Index layout: a `(device_id, ts desc)` compound index for recent and
    /// range queries, plus a TTL index on `inserted_at` implementing the
    /// retention window entirely server-side.
    pub async fn connect(config: &SecondaryStoreConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.uri).await?;
        let database = client.database(&config.database);

        database.run_command(doc! { "ping": 1 }).await?;

        let collection = database.collection::<Document>(&config.collection);
        let store = Self { collection };
        store.ensure_indexes(config.retention_days).await?;

        tracing::info!(
            database = %config.database,
            collection = %config.collection,
            "Connected to secondary store"
        );

        Ok(store)
    }

    async fn ensure_indexes(&self, retention_days: Option<u32>) -> Result<()> {
        self.collection
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "device_id": 1, "ts": -1 })
                    .build(),
            )
            .await?;

        if let Some(days) = retention_days {
            let options = IndexOptions::builder()
                .expire_after(Duration::from_secs(u64::from(days) * 86_400))
                .build();

            self.collection
                .create_index(
                    IndexModel::builder()
                        .keys(doc! { "inserted_at": 1 })
                        .options(options)
                        .build(),
                )
                .await?;

            tracing::info!(retention_days = days, "Retention expiry armed");
        }

        Ok(())
    }

    /// Records for a device within `[from, to]`, ascending by ingestion
    /// time.
    pub async fn range_by_device(&self, device_id: &str, from: i64, to: i64) -> Result<Vec<Value>> {
        let filter = doc! {
            "device_id": device_id,
            "ts": { "$gte": from, "$lte": to },
        };

        let mut cursor = self
            .collection
            .find(filter)
            .sort(doc! { "ts": 1 })
            .await?;

        let mut rows = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            rows.push(document_to_json(document));
        }

        Ok(rows)
    }

    /// Per-field aggregate statistics over the trailing window, skipping
    /// absent fields.
    pub async fn stats_by_device(&self, device_id: &str, window_hours: i64) -> Result<DeviceStats> {
        let to = current_timestamp_millis();
        let from = window_start(to, window_hours, MILLIS_PER_HOUR);
        let rows = self.range_by_device(device_id, from, to).await?;

        Ok(DeviceStats {
            device_id: device_id.to_string(),
            window_hours,
            count: rows.len(),
            fields: summarize(collect_field_values(&rows)),
        })
    }

    /// Serialize the trailing window as CSV or JSON.
    pub async fn export_by_device(
        &self,
        device_id: &str,
        window_days: i64,
        format: ExportFormat,
    ) -> Result<String> {
        let to = current_timestamp_millis();
        let from = window_start(to, window_days, MILLIS_PER_DAY);
        let rows = self.range_by_device(device_id, from, to).await?;

        match format {
            ExportFormat::Csv => Ok(to_csv(&rows)),
            ExportFormat::Json => Ok(serde_json::to_string(&rows)?),
        }
    }
}

impl TelemetryWriter for SecondaryStore {
    async fn insert(&self, record: &TelemetryRecord) -> Result<()> {
        self.collection.insert_one(record_document(record)).await?;
        Ok(())
    }
}

/// Build the document shape written per record. Absent metrics are omitted
/// so window statistics skip them instead of averaging in zeros.
pub fn record_document(record: &TelemetryRecord) -> Document {
    let mut document = doc! {
        "ts": record.ts,
        "ts_iso": iso_from_millis(record.ts),
        "topic": record.topic.as_str(),
        "device_id": record.device_id.as_str(),
        "raw_payload": record.raw.as_str(),
        "inserted_at": DateTime::now(),
    };

    for (field, value) in record.metrics.present() {
        document.insert(field, value);
    }

    if let Some(device_ts) = record.device_ts {
        document.insert("device_ts", device_ts);
    }

    document
}

/// Start of a trailing window ending at `now`. Saturates instead of
/// overflowing when a caller asks for an absurdly long window; a negative
/// start just means "everything".
fn window_start(now: i64, count: i64, unit_millis: i64) -> i64 {
    now.saturating_sub(count.saturating_mul(unit_millis))
}

fn document_to_json(mut document: Document) -> Value {
    // Internal bookkeeping fields stay out of API responses and exports.
    document.remove("_id");
    document.remove("inserted_at");
    Bson::Document(document).into_relaxed_extjson()
}

fn collect_field_values(rows: &[Value]) -> BTreeMap<String, Vec<f64>> {
    let mut values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for row in rows {
        for field in METRIC_FIELDS {
            if let Some(value) = row.get(*field).and_then(Value::as_f64) {
                values.entry((*field).to_string()).or_default().push(value);
            }
        }
    }
    values
}
