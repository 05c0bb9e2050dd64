//! Payload normalization: one raw topic + bytes pair into a canonical record.
//!
//! Device firmwares are inconsistent about field names, so each derived
//! metric has an ordered alias list tried in order. The first alias present
//! wins; a present-but-non-numeric value yields an absent field, never zero
//! (zero is a valid sensor reading and must survive untouched).

use serde_json::Value;

use crate::record::{Metrics, TelemetryRecord, current_timestamp_millis};

const VOLTAGE_ALIASES: &[&str] = &["voltage", "bus_V", "v"];
const CURRENT_ALIASES: &[&str] = &["current", "current_A", "current_signed", "i"];
const POWER_ALIASES: &[&str] = &["power", "power_W", "power_signed", "w"];
const SOC_ALIASES: &[&str] = &["soc", "soc_percent"];
const SOH_ALIASES: &[&str] = &["soh", "soh_percent"];
const UPTIME_ALIASES: &[&str] = &["uptime_ms", "uptime"];
const DEVICE_TS_ALIASES: &[&str] = &["timestamp", "ts", "time"];

/// Separator between the topic's type and id segments in derived device ids.
const DEVICE_ID_SEPARATOR: char = '_';

/// Normalize a raw broker message into a [`TelemetryRecord`].
///
/// Total and infallible: malformed payloads degrade to an opaque-text
/// record, missing or mistyped fields degrade to absent metrics.
pub fn normalize(topic: &str, payload: &[u8]) -> TelemetryRecord {
    let raw = String::from_utf8_lossy(payload).into_owned();

    // Only JSON objects count as structured; scalars and arrays carry no
    // named fields and fall back to the text representation.
    let decoded: Option<Value> = serde_json::from_str(&raw).ok().filter(Value::is_object);

    let device_id = decoded
        .as_ref()
        .and_then(|v| v.get("device_id"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| device_id_from_topic(topic));

    let metrics = Metrics {
        voltage: extract_numeric(decoded.as_ref(), VOLTAGE_ALIASES),
        current: extract_numeric(decoded.as_ref(), CURRENT_ALIASES),
        power: extract_numeric(decoded.as_ref(), POWER_ALIASES),
        soc: extract_numeric(decoded.as_ref(), SOC_ALIASES),
        soh: extract_numeric(decoded.as_ref(), SOH_ALIASES),
        uptime_ms: extract_numeric(decoded.as_ref(), UPTIME_ALIASES),
    };

    let device_ts = extract_numeric(decoded.as_ref(), DEVICE_TS_ALIASES).map(|v| v as i64);

    let payload = match decoded {
        Some(value) => value,
        None => Value::String(raw.clone()),
    };

    TelemetryRecord {
        device_id,
        topic: topic.to_string(),
        raw,
        payload,
        ts: current_timestamp_millis(),
        device_ts,
        metrics,
    }
}

/// Derive a device id from a topic of the form `prefix/type/id/suffix`.
///
/// Topics with fewer than three segments identify the device by the full
/// topic string.
pub fn device_id_from_topic(topic: &str) -> String {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() >= 3 {
        format!("{}{}{}", parts[1], DEVICE_ID_SEPARATOR, parts[2])
    } else {
        topic.to_string()
    }
}

/// Pick the first alias present in the payload and coerce it to a finite
/// number. A present alias with an unusable value shadows later aliases.
fn extract_numeric(payload: Option<&Value>, aliases: &[&str]) -> Option<f64> {
    let object = payload?.as_object()?;
    for key in aliases {
        if let Some(value) = object.get(*key) {
            return finite_number(value);
        }
    }
    None
}

fn finite_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        _ => None,
    }
}
