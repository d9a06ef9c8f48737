use crate::embedding::EmbeddingError;
use crate::index::{KeywordIndexError, VectorIndexError};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Bodhi
#[derive(Error, Debug)]
pub enum BodhiError {
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

    /// Malformed caller input (chunking parameters, session options, empty uploads)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upload rejected because the name is already indexed
    #[error("Document '{name}' already exists in the index")]
    DuplicateDocument { name: String },

    /// Embedding or generation model could not be loaded or pulled
    #[error("Model '{model}' is unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    /// Index store could not be opened or reached
    #[error("Index store connection failed: {0}")]
    StoreConnection(String),

    /// Operation on an index that was never created
    #[error("Index '{name}' does not exist")]
    IndexMissing { name: String },

    /// Some chunks of a bulk write were rejected; the rest stay indexed
    #[error("Bulk index partially failed: {indexed} indexed, {} failed", failed.len())]
    PartialBatchFailure {
        indexed: usize,
        failed: Vec<ChunkFailure>,
    },

    /// A generation fragment did not have the expected shape
    #[error("Unexpected fragment format: {0}")]
    StreamFormat(String),

    /// The responder failed while producing a response
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Text could not be extracted from an uploaded document
    #[error("Failed to extract text from '{name}': {reason}")]
    Extraction { name: String, reason: String },

    /// Embedding provider errors
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Keyword index errors
    #[error(transparent)]
    KeywordIndex(#[from] KeywordIndexError),

    /// Vector index errors
    #[error(transparent)]
    VectorIndex(#[from] VectorIndexError),

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

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BodhiError {
    /// Whether the caller may skip the failing item and carry on.
    ///
    /// Only malformed stream fragments qualify; everything else is fatal to
    /// the current operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BodhiError::StreamFormat(_))
    }

    /// Whether the error belongs to the validation class (caller input problem).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BodhiError::Validation(_) | BodhiError::DuplicateDocument { .. }
        )
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

/// A single chunk rejected by a bulk write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    pub doc_id: String,
    pub reason: String,
}

/// Result type for Bodhi operations
pub type Result<T> = std::result::Result<T, BodhiError>;
