use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single normalized measurement event from a device.
///
/// Records are immutable once created: the normalizer builds one per inbound
/// broker message, both stores append it, and the fan-out hub broadcasts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Device identity. Payload-declared `device_id` wins; otherwise derived
    /// from the topic, falling back to the full topic string.
    pub device_id: String,

    /// Exact topic that produced the record.
    pub topic: String,

    /// Original payload text, kept for audit/replay even when decode fails.
    pub raw: String,

    /// Decoded payload object when the bytes parse as JSON, otherwise the
    /// raw text itself.
    pub payload: Value,

    /// Server-side ingestion time, epoch milliseconds, set once at
    /// normalization.
    pub ts: i64,

    /// Device-reported time, if the payload carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_ts: Option<i64>,

    /// Derived numeric fields extracted via the alias table.
    #[serde(default)]
    pub metrics: Metrics,
}

/// Derived numeric readings. Each field is absent (never zero) when no alias
/// carries a finite number, so averages are not corrupted by placeholders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,

    /// State of charge, percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soc: Option<f64>,

    /// State of health, percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soh: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_ms: Option<f64>,
}

impl Metrics {
    /// Iterate over `(field name, value)` pairs for the fields that are set.
    pub fn present(&self) -> impl Iterator<Item = (&'static str, f64)> {
        [
            ("voltage", self.voltage),
            ("current", self.current),
            ("power", self.power),
            ("soc", self.soc),
            ("soh", self.soh),
            ("uptime_ms", self.uptime_ms),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
    }
}

/// Wire shape sent to push-channel listeners for every ingested record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    pub topic: String,
    pub device_id: String,
    pub payload: Value,
    pub ts: i64,
}

impl PushEvent {
    pub fn from_record(record: &TelemetryRecord) -> Self {
        Self {
            topic: record.topic.clone(),
            device_id: record.device_id.clone(),
            payload: record.payload.clone(),
            ts: record.ts,
        }
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in
/// practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Format epoch milliseconds as an ISO-8601 timestamp (UTC, second
/// resolution), matching the `ts_iso` field of stored documents.
pub fn iso_from_millis(ts: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_present_skips_absent_fields() {
        let metrics = Metrics {
            voltage: Some(12.4),
            current: None,
            power: Some(22.3),
            ..Metrics::default()
        };

        let present: Vec<_> = metrics.present().collect();
        assert_eq!(present, vec![("voltage", 12.4), ("power", 22.3)]);
    }

    #[test]
    fn test_push_event_from_record() {
        let record = TelemetryRecord {
            device_id: "solar_1".to_string(),
            topic: "energy/solar/1/telemetry".to_string(),
            raw: "{\"voltage\":12.4}".to_string(),
            payload: serde_json::json!({"voltage": 12.4}),
            ts: 1_700_000_000_000,
            device_ts: None,
            metrics: Metrics::default(),
        };

        let event = PushEvent::from_record(&record);
        assert_eq!(event.device_id, "solar_1");
        assert_eq!(event.topic, "energy/solar/1/telemetry");
        assert_eq!(event.ts, 1_700_000_000_000);
        assert_eq!(event.payload["voltage"], 12.4);
    }

    #[test]
    fn test_iso_from_millis() {
        assert_eq!(iso_from_millis(0), "1970-01-01T00:00:00");
        assert_eq!(iso_from_millis(1_700_000_000_000), "2023-11-14T22:13:20");
    }

    #[test]
    fn test_metrics_absent_fields_not_serialized() {
        let metrics = Metrics {
            voltage: Some(12.4),
            ..Metrics::default()
        };

        let json = serde_json::to_string(&metrics).unwrap();
        assert_eq!(json, "{\"voltage\":12.4}");
    }
}
