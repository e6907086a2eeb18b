use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("store error: {0}")]
    Store(#[from] storage::StoreError),

    #[error("invalid spam pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
