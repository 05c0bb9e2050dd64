//! Per-device aggregate statistics over a time window.
//!
//! Computed app-side from the fetched window rather than in the store, so
//! the math stays pure and identical regardless of backend.

use serde::Serialize;
use std::collections::BTreeMap;

/// Metric fields eligible for aggregation.
pub const METRIC_FIELDS: &[&str] = &["voltage", "current", "power", "soc", "soh", "uptime_ms"];

/// Aggregate statistics for one metric field, rounded to 2 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

/// Statistics for one device over a window.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStats {
    pub device_id: String,
    pub window_hours: i64,
    /// Number of records in the window (including records where every
    /// metric field was absent).
    pub count: usize,
    pub fields: BTreeMap<String, FieldStats>,
}

/// Summarize collected values per field. Fields with no values in the
/// window are omitted entirely.
pub fn summarize(values_by_field: BTreeMap<String, Vec<f64>>) -> BTreeMap<String, FieldStats> {
    values_by_field
        .into_iter()
        .filter_map(|(field, mut values)| field_stats(&mut values).map(|stats| (field, stats)))
        .collect()
}

fn field_stats(values: &mut [f64]) -> Option<FieldStats> {
    if values.is_empty() {
        return None;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let sum: f64 = values.iter().sum();
    let min = values[0];
    let max = values[values.len() - 1];

    let mid = values.len() / 2;
    let median = if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    };

    Some(FieldStats {
        avg: round2(sum / values.len() as f64),
        min: round2(min),
        max: round2(max),
        median: round2(median),
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(field: &str, values: &[f64]) -> BTreeMap<String, Vec<f64>> {
        BTreeMap::from([(field.to_string(), values.to_vec())])
    }

    #[test]
    fn test_voltage_window_scenario() {
        let fields = summarize(single("voltage", &[10.0, 12.0, 14.0]));

        let stats = fields["voltage"];
        assert_eq!(stats.avg, 12.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 14.0);
        assert_eq!(stats.median, 12.0);
    }

    #[test]
    fn test_even_count_median() {
        let fields = summarize(single("current", &[1.0, 2.0, 3.0, 4.0]));

        assert_eq!(fields["current"].median, 2.5);
    }

    #[test]
    fn test_unsorted_input() {
        let fields = summarize(single("power", &[14.0, 10.0, 12.0]));

        let stats = fields["power"];
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 14.0);
        assert_eq!(stats.median, 12.0);
    }

    #[test]
    fn test_rounding_to_two_decimals() {
        let fields = summarize(single("voltage", &[0.1, 0.2, 0.3]));

        assert_eq!(fields["voltage"].avg, 0.2);
    }

    #[test]
    fn test_empty_field_omitted() {
        let mut values = single("voltage", &[12.0]);
        values.insert("current".to_string(), Vec::new());

        let fields = summarize(values);
        assert!(fields.contains_key("voltage"));
        assert!(!fields.contains_key("current"));
    }

    #[test]
    fn test_single_value() {
        let fields = summarize(single("soc", &[81.5]));

        let stats = fields["soc"];
        assert_eq!(stats.avg, 81.5);
        assert_eq!(stats.min, 81.5);
        assert_eq!(stats.max, 81.5);
        assert_eq!(stats.median, 81.5);
    }
}
