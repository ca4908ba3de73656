use thiserror::Error;

/// Application-wide error types for roprox.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a source page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// A source page or payload could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Headless browser session failed.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The probe job queue has been closed.
    #[error("Probe queue closed")]
    QueueClosed,

    /// The operation was cancelled by shutdown.
    #[error("Operation cancelled")]
    Cancelled,

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is expected to clear up on its own by the
    /// next scheduled cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::DatabaseError(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("HTTP 5")
            }
            _ => false,
        }
    }
}
