use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid bind address: {0}")]
    InvalidAddr(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
