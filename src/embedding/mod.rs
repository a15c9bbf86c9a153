//! Embedding generation behind a circuit breaker
//!
//! Architecture:
//! - EmbeddingProvider trait for the raw provider call (HTTP, offline hashing, test fakes)
//! - response normalization of every accepted provider shape to `Vec<f32>`
//! - EmbeddingClient: input cleanup, batching and breaker protection
//! - cosine similarity for comparing vectors

mod client;
mod provider;
mod response;
mod similarity;

pub use client::{prepare_text, EmbedResult, EmbeddingClient};
pub use provider::{
    EmbeddingInput, EmbeddingProvider, HashingEmbeddingProvider, HttpEmbeddingProvider,
    HttpProviderSettings, ProviderError,
};
pub use response::parse_embeddings;
pub use similarity::cosine_similarity;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Unrecognized embedding response shape: {0}")]
    UnrecognizedResponse(String),

    #[error("Provider returned an empty embedding")]
    EmptyEmbedding,

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// Client-side embedding limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Expected vector length; `None` accepts whatever the provider returns
    pub dimension: Option<usize>,
    /// Inputs are truncated to this many characters before the call
    pub max_input_chars: usize,
    /// Maximum inputs per provider call in `embed_batch`
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            dimension: None,
            max_input_chars: 8000,
            batch_size: 32,
        }
    }
}
