use thiserror::Error;

/// Errors from the persistence adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The secondary store is not configured or was unreachable at startup.
    #[error("secondary store unavailable")]
    Unavailable,

    #[error("Invalid export format '{0}' (expected 'csv' or 'json')")]
    ExportFormat(String),
}

/// Result type alias using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
