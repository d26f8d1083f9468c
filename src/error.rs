//! Error types for sds-qabot
//!
//! Every stage of the ingestion and serving pipelines reports failures through
//! [`QaBotError`]. Nothing is retried: an error aborts the current run.

use thiserror::Error;

/// Main error type for qabot operations
#[derive(Error, Debug)]
pub enum QaBotError {
    /// PDF loading errors
    #[error("PDF processing error: {0}")]
    Pdf(String),

    /// Text cleaning, extraction and splitting errors
    #[error("Text processing error: {0}")]
    TextProcessing(String),

    /// Embedding model errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Text generation errors
    #[error("Generation error: {0}")]
    Generation(String),

    /// Vector store errors
    #[error("Vector store error: {0}")]
    Store(String),

    /// Retrieval errors
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Model registry and packaging errors
    #[error("Registry error: {0}")]
    Registry(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or unreadable credentials
    #[error("Credential error: {0}")]
    Credential(String),

    /// The bot was asked to predict before `initialize` ran
    #[error("Model not initialized: call initialize() before predict()")]
    NotInitialized,

    /// Malformed prediction input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for qabot operations
pub type Result<T> = std::result::Result<T, QaBotError>;

impl From<lopdf::Error> for QaBotError {
    fn from(err: lopdf::Error) -> Self {
        QaBotError::Pdf(err.to_string())
    }
}

impl From<bincode::Error> for QaBotError {
    fn from(err: bincode::Error) -> Self {
        QaBotError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = QaBotError::TextProcessing("test error".to_string());
        assert_eq!(error.to_string(), "Text processing error: test error");
        assert!(QaBotError::NotInitialized.to_string().contains("initialize()"));
    }

    #[test]
    fn test_error_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let qabot_error = QaBotError::from(io_error);

        match qabot_error {
            QaBotError::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
    }
}
