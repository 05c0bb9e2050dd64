//! Write seam shared by both persistence backends.

use std::future::Future;

use gridpulse_common::TelemetryRecord;

use crate::error::Result;

/// Append-only write contract.
///
/// Both stores implement this; the ingestion pipeline is generic over it so
/// tests can substitute failing or recording doubles.
pub trait TelemetryWriter {
    /// Append one record. Errors are reported to the caller, which logs and
    /// moves on; the at-least-once delivery model relies on broker
    /// redelivery rather than store-side retries.
    fn insert(&self, record: &TelemetryRecord) -> impl Future<Output = Result<()>> + Send;
}
