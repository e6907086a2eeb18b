use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("dns resolution failed: {0}")]
    Dns(String),

    #[error("tls negotiation failed: {0}")]
    Tls(String),

    #[error("http status {0}")]
    HttpStatus(u16),

    #[error("redirect limit exceeded")]
    TooManyRedirects,

    #[error("blocked by robots.txt: {0}")]
    RobotsDenied(String),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Short stable name used in failure counters and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::Dns(_) => "dns",
            FetchError::Tls(_) => "tls",
            FetchError::HttpStatus(_) => "http_status",
            FetchError::TooManyRedirects => "too_many_redirects",
            FetchError::RobotsDenied(_) => "robots_denied",
            FetchError::Cancelled => "cancelled",
            FetchError::InvalidUrl(_) | FetchError::UrlParse(_) => "invalid_url",
            FetchError::Transport(_) => "transport",
        }
    }

    /// Whether the retry schedule applies to this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout | FetchError::Dns(_) | FetchError::HttpStatus(500..=599)
        )
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
