use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    #[error("all databases at or above the usage cap")]
    NoCapacity,

    #[error("store permanently unavailable: {0}")]
    Permanent(String),
}

impl StoreError {
    /// Transient failures get the retry-then-reroute treatment;
    /// everything else aborts the current batch.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::DuckDb(_) | StoreError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
