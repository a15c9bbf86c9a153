use crate::breaker::CallError;
use crate::embedding::{EmbeddingError, ProviderError};
use crate::ingest::IngestError;
use crate::retrieval::{FusionError, SearchError};
use crate::storage::StoreError;
use crate::timeframe::TimeframeError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sift
#[derive(Error, Debug)]
pub enum SiftError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Embedding failed or the provider's circuit is open
    #[error("Embedding error: {0}")]
    Embedding(#[from] CallError<EmbeddingError>),

    #[error("Embedding provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Timeframe error: {0}")]
    Timeframe(#[from] TimeframeError),

    #[error("Fusion error: {0}")]
    Fusion(#[from] FusionError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Dotted path of the offending key
    pub path: String,
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

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Result type for sift operations
pub type Result<T> = std::result::Result<T, SiftError>;
