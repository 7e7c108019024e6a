use crate::chat::ChatError;
use crate::embedding::EmbeddingError;
use crate::index::IndexError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for librag
#[derive(Error, Debug)]
pub enum LibragError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// A relative path resolved outside the library root
    #[error("Path escapes library root: {path}")]
    PathEscapesRoot { path: String },

    /// A library file that does not exist or is not a regular file
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// Caller supplied something we cannot act on
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Embedding backend errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Vector index errors
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Chat backend errors
    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    /// Background task errors
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used by an outer transport to pick a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Unavailable,
    Internal,
}

impl LibragError {
    /// Wrap an IO error with a short description of what was being attempted
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        LibragError::Io {
            source,
            context: context.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LibragError::PathEscapesRoot { .. }
            | LibragError::InvalidRequest(_)
            | LibragError::InvalidConfigValue { .. } => ErrorKind::BadRequest,
            LibragError::NotFound { .. } | LibragError::ConfigNotFound { .. } => {
                ErrorKind::NotFound
            }
            LibragError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::NotFound
            }
            LibragError::Embedding(EmbeddingError::NotConfigured) => ErrorKind::BadRequest,
            LibragError::Embedding(_) | LibragError::Chat(_) => ErrorKind::Unavailable,
            LibragError::Index(IndexError::DimensionMismatch { .. }) => ErrorKind::BadRequest,
            _ => ErrorKind::Internal,
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for librag operations
pub type Result<T> = std::result::Result<T, LibragError>;
