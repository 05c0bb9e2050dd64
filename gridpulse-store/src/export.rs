//! CSV/JSON export of a device's telemetry window.

use std::borrow::Cow;
use std::str::FromStr;

use serde_json::Value;

use crate::error::StoreError;

/// Column order matches the original CSV logger so downstream tooling keeps
/// working.
pub const CSV_COLUMNS: &[&str] = &[
    "ts",
    "ts_iso",
    "topic",
    "device_id",
    "voltage",
    "current",
    "power",
    "soc",
    "soh",
    "uptime_ms",
    "raw_payload",
];

/// Requested export serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(StoreError::ExportFormat(other.to_string())),
        }
    }
}

/// Render exported rows (JSON objects) as CSV with a header line. Missing
/// fields render as empty cells.
pub fn to_csv(rows: &[Value]) -> String {
    let mut out = String::new();
    out.push_str(&CSV_COLUMNS.join(","));
    out.push('\n');

    for row in rows {
        let mut first = true;
        for column in CSV_COLUMNS {
            if !first {
                out.push(',');
            }
            first = false;
            out.push_str(&csv_cell(row.get(*column)));
        }
        out.push('\n');
    }

    out
}

fn csv_cell(value: Option<&Value>) -> Cow<'static, str> {
    match value {
        None | Some(Value::Null) => Cow::Borrowed(""),
        Some(Value::String(s)) => Cow::Owned(csv_escape(s).into_owned()),
        Some(Value::Number(n)) => Cow::Owned(n.to_string()),
        Some(Value::Bool(b)) => Cow::Owned(b.to_string()),
        Some(other) => Cow::Owned(csv_escape(&other.to_string()).into_owned()),
    }
}

/// Quote a field when it contains a separator, quote, or newline.
pub fn csv_escape(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
