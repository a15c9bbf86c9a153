//! Embedding provider trait, HTTP transport and offline hashing implementation
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API key environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("Failed to decode provider response: {0}")]
    Decode(String),
}

/// Payload sent to a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(texts) => texts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trait for embedding providers
///
/// Implementations perform one raw call and return the provider's response
/// untouched; shape normalization happens in the client. Transport, auth and
/// HTTP failures are returned as errors so the circuit breaker can see them.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable provider name; also the name of the breaker protecting it
    fn name(&self) -> &str;

    /// Model identifier sent with each request
    fn model(&self) -> &str;

    /// Perform the raw provider call
    fn request(&self, input: &EmbeddingInput) -> Result<Value, ProviderError>;
}

/// Connection settings for an HTTP embedding endpoint
#[derive(Debug, Clone)]
pub struct HttpProviderSettings {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding a bearer token; empty for unauthenticated endpoints
    pub api_key_env: String,
    pub timeout: Duration,
}

/// OpenAI/Ollama-compatible embedding endpoint
///
/// Posts `{"model": ..., "input": ...}` and returns the JSON body. Uses the
/// blocking reqwest client, so it must be called from a blocking context
/// (`spawn_blocking` inside tokio).
pub struct HttpEmbeddingProvider {
    client: reqwest::blocking::Client,
    settings: HttpProviderSettings,
    api_key: Option<String>,
}

impl HttpEmbeddingProvider {
    pub fn new(settings: HttpProviderSettings) -> Result<Self, ProviderError> {
        let api_key = if settings.api_key_env.is_empty() {
            None
        } else {
            match std::env::var(&settings.api_key_env) {
                Ok(key) if !key.is_empty() => Some(key),
                _ => return Err(ProviderError::MissingApiKey(settings.api_key_env.clone())),
            }
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        tracing::info!(
            "Using embedding endpoint {} (provider: {}, model: {})",
            settings.endpoint,
            settings.name,
            settings.model
        );

        Ok(Self {
            client,
            settings,
            api_key,
        })
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn request(&self, input: &EmbeddingInput) -> Result<Value, ProviderError> {
        let body = json!({
            "model": self.settings.model,
            "input": input,
        });

        let mut request = self.client.post(&self.settings.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

/// Deterministic offline provider based on feature hashing
///
/// Each lowercase alphanumeric token is hashed (BLAKE3) into one signed
/// bucket; the result is L2-normalized. Texts sharing words get a positive
/// cosine similarity. Responds with the bare-vector shape.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimension: usize,
    model: String,
}

impl HashingEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model: format!("hashing-{}", dimension),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one text without going through the JSON layer
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();

            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };

            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl EmbeddingProvider for HashingEmbeddingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, input: &EmbeddingInput) -> Result<Value, ProviderError> {
        Ok(match input {
            EmbeddingInput::Single(text) => json!(self.embed_text(text)),
            EmbeddingInput::Batch(texts) => {
                let vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.embed_text(t)).collect();
                json!(vectors)
            }
        })
    }
}
