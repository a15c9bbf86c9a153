//! Normalization of provider response shapes

use super::EmbeddingError;
use serde::Deserialize;
use serde_json::Value;

/// Every response shape accepted from a provider
#[derive(Deserialize)]
#[serde(untagged)]
enum ProviderResponse {
    /// `[0.1, 0.2, ...]`
    Vector(Vec<f32>),
    /// `[[...], [...]]`
    Vectors(Vec<Vec<f32>>),
    /// OpenAI style `{"data": [{"embedding": [...], "index": 0}]}`
    Data { data: Vec<DataItem> },
    /// Ollama batch style `{"embeddings": [[...]]}`
    Multiple { embeddings: Vec<Vec<f32>> },
    /// `{"embedding": [...]}`
    Single { embedding: Vec<f32> },
}

#[derive(Deserialize)]
struct DataItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Normalize a provider response to a list of vectors in input order
///
/// Single-vector shapes yield a one-element list. An empty vector anywhere
/// is an error, as is any shape not listed above.
pub fn parse_embeddings(value: Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let description = describe(&value);
    let response: ProviderResponse = serde_json::from_value(value)
        .map_err(|_| EmbeddingError::UnrecognizedResponse(description))?;

    let vectors = match response {
        ProviderResponse::Vector(vector) => vec![vector],
        ProviderResponse::Vectors(vectors) => vectors,
        ProviderResponse::Data { mut data } => {
            if data.iter().all(|item| item.index.is_some()) {
                data.sort_by_key(|item| item.index);
            }
            data.into_iter().map(|item| item.embedding).collect()
        }
        ProviderResponse::Multiple { embeddings } => embeddings,
        ProviderResponse::Single { embedding } => vec![embedding],
    };

    if vectors.is_empty() || vectors.iter().any(|v| v.is_empty()) {
        return Err(EmbeddingError::EmptyEmbedding);
    }

    Ok(vectors)
}

fn describe(value: &Value) -> String {
    const MAX_CHARS: usize = 120;
    let rendered = value.to_string();
    if rendered.chars().count() > MAX_CHARS {
        let head: String = rendered.chars().take(MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        rendered
    }
}
