//! Persistence layer for the telemetry bridge.
//!
//! Two backends sit behind a common write seam: an embedded SQLite store
//! that keeps everything it is ever given, and an optional MongoDB store
//! with a retention window that serves the analytics endpoints.

pub mod error;
pub mod export;
pub mod primary;
pub mod secondary;
pub mod sink;
pub mod stats;

pub use error::{Result, StoreError};
pub use export::{CSV_COLUMNS, ExportFormat, to_csv};
pub use primary::{PrimaryStore, StoredRecord};
pub use secondary::{SecondaryStore, record_document};
pub use sink::TelemetryWriter;
pub use stats::{DeviceStats, FieldStats, METRIC_FIELDS, summarize};
