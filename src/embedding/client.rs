//! Breaker-protected embedding client

use super::{parse_embeddings, EmbeddingError, EmbeddingInput, EmbeddingProvider, EmbeddingSettings};
use crate::breaker::{CallError, CircuitBreaker, CircuitBreakerRegistry};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a breaker-protected embedding call
pub type EmbedResult<T> = Result<T, CallError<EmbeddingError>>;

/// Collapse whitespace runs and truncate to `max_chars` characters
///
/// Returns `None` when nothing but whitespace remains.
pub fn prepare_text(text: &str, max_chars: usize) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }

    if collapsed.chars().count() > max_chars {
        Some(collapsed.chars().take(max_chars).collect())
    } else {
        Some(collapsed)
    }
}

/// Embedding client wrapping a provider in a circuit breaker
///
/// All methods block on the provider; call them from `spawn_blocking` when
/// running inside tokio.
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    breaker: Arc<CircuitBreaker>,
    settings: EmbeddingSettings,
}

impl EmbeddingClient {
    /// Create a client using the registry's breaker for the provider's name
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        registry: &CircuitBreakerRegistry,
        settings: EmbeddingSettings,
    ) -> Self {
        let breaker = registry.get_or_register(provider.name());
        Self::with_breaker(provider, breaker, settings)
    }

    pub fn with_breaker(
        provider: Arc<dyn EmbeddingProvider>,
        breaker: Arc<CircuitBreaker>,
        settings: EmbeddingSettings,
    ) -> Self {
        Self {
            provider,
            breaker,
            settings: EmbeddingSettings {
                max_input_chars: settings.max_input_chars.max(1),
                batch_size: settings.batch_size.max(1),
                ..settings
            },
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn settings(&self) -> &EmbeddingSettings {
        &self.settings
    }

    /// Embed one text
    ///
    /// Blank input yields `Ok(None)` without contacting the provider.
    pub fn embed(&self, text: &str) -> EmbedResult<Option<Vec<f32>>> {
        let Some(prepared) = prepare_text(text, self.settings.max_input_chars) else {
            debug!("Skipping embedding of blank input");
            return Ok(None);
        };

        let input = EmbeddingInput::Single(prepared);
        let mut vectors = self.breaker.call(|| self.request(&input))?;

        match vectors.len() {
            1 => Ok(vectors.pop()),
            actual => Err(CallError::Failed(EmbeddingError::CountMismatch {
                expected: 1,
                actual,
            })),
        }
    }

    /// Embed many texts, pairing each vector with the index of its input
    ///
    /// Blank entries are skipped. Inputs go out in sub-batches of
    /// `batch_size`; the first failing sub-batch aborts the whole call.
    pub fn embed_batch<S: AsRef<str>>(&self, texts: &[S]) -> EmbedResult<Vec<(usize, Vec<f32>)>> {
        let prepared: Vec<(usize, String)> = texts
            .iter()
            .enumerate()
            .filter_map(|(i, t)| prepare_text(t.as_ref(), self.settings.max_input_chars).map(|p| (i, p)))
            .collect();

        if prepared.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(prepared.len());
        for batch in prepared.chunks(self.settings.batch_size) {
            let input = EmbeddingInput::Batch(batch.iter().map(|(_, t)| t.clone()).collect());

            let vectors = self.breaker.call(|| {
                let vectors = self.request(&input)?;
                if vectors.len() != batch.len() {
                    return Err(EmbeddingError::CountMismatch {
                        expected: batch.len(),
                        actual: vectors.len(),
                    });
                }
                Ok(vectors)
            });

            let vectors = match vectors {
                Ok(vectors) => vectors,
                Err(e) => {
                    warn!(
                        provider = %self.provider.name(),
                        "Embedding batch of {} failed: {}",
                        batch.len(),
                        e
                    );
                    return Err(e);
                }
            };

            results.extend(batch.iter().map(|(i, _)| *i).zip(vectors));
        }

        debug!(
            "Embedded {} of {} inputs with {}",
            results.len(),
            texts.len(),
            self.provider.model()
        );
        Ok(results)
    }

    /// Raw provider call plus shape normalization and dimension check
    fn request(&self, input: &EmbeddingInput) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let raw = self.provider.request(input)?;
        let vectors = parse_embeddings(raw)?;

        if let Some(expected) = self.settings.dimension {
            if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{CircuitBreakerConfig, CircuitStateKind};
    use crate::embedding::ProviderError;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Provider returning canned responses and counting calls
    struct ScriptedProvider {
        calls: AtomicUsize,
        inputs: Mutex<Vec<EmbeddingInput>>,
        respond: Box<dyn Fn(&EmbeddingInput) -> Result<Value, ProviderError> + Send + Sync>,
    }

    impl ScriptedProvider {
        fn new(
            respond: impl Fn(&EmbeddingInput) -> Result<Value, ProviderError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                inputs: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl EmbeddingProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-model"
        }

        fn request(&self, input: &EmbeddingInput) -> Result<Value, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs.lock().unwrap().push(input.clone());
            (self.respond)(input)
        }
    }

    fn client(provider: Arc<ScriptedProvider>, settings: EmbeddingSettings) -> EmbeddingClient {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::new(
            2,
            Duration::from_secs(60),
            1,
        ));
        EmbeddingClient::new(provider, &registry, settings)
    }

    fn echo_batch(input: &EmbeddingInput) -> Result<Value, ProviderError> {
        match input {
            EmbeddingInput::Single(_) => Ok(json!([1.0, 0.0])),
            EmbeddingInput::Batch(texts) => {
                let data: Vec<Value> = texts
                    .iter()
                    .enumerate()
                    .map(|(i, t)| json!({"index": i, "embedding": [t.len() as f32, 1.0]}))
                    .collect();
                Ok(json!({ "data": data }))
            }
        }
    }

    #[test]
    fn test_prepare_text() {
        assert_eq!(prepare_text("  \n\t ", 10), None);
        assert_eq!(prepare_text("a  b\n\nc", 10).as_deref(), Some("a b c"));
        assert_eq!(prepare_text("héllo world", 4).as_deref(), Some("héll"));
    }

    #[test]
    fn test_blank_input_skips_provider() {
        let provider = ScriptedProvider::new(echo_batch);
        let client = client(provider.clone(), EmbeddingSettings::default());

        assert_eq!(client.embed("   ").unwrap(), None);
        assert!(client.embed_batch(&["", "  "]).unwrap().is_empty());
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn test_embed_normalizes_input() {
        let provider = ScriptedProvider::new(echo_batch);
        let client = client(provider.clone(), EmbeddingSettings::default());

        let vector = client.embed("hello \n  world").unwrap();
        assert_eq!(vector, Some(vec![1.0, 0.0]));

        let inputs = provider.inputs.lock().unwrap();
        assert_eq!(inputs[0], EmbeddingInput::Single("hello world".into()));
    }

    #[test]
    fn test_embed_batch_pairs_input_indices_across_sub_batches() {
        let provider = ScriptedProvider::new(echo_batch);
        let settings = EmbeddingSettings {
            batch_size: 2,
            ..Default::default()
        };
        let client = client(provider.clone(), settings);

        let texts = ["a", "  ", "bbb", "cc", ""];
        let results = client.embed_batch(&texts).unwrap();

        let indices: Vec<usize> = results.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 2, 3]);
        assert_eq!(results[1].1, vec![3.0, 1.0]);
        assert_eq!(results[2].1, vec![2.0, 1.0]);
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn test_dimension_mismatch_is_failure() {
        let provider = ScriptedProvider::new(|_| Ok(json!([0.1, 0.2, 0.3])));
        let settings = EmbeddingSettings {
            dimension: Some(4),
            ..Default::default()
        };
        let client = client(provider, settings);

        match client.embed("text") {
            Err(CallError::Failed(EmbeddingError::DimensionMismatch { expected, actual })) => {
                assert_eq!((expected, actual), (4, 3));
            }
            other => panic!("expected dimension mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_breaker_opens_after_provider_failures() {
        let provider = ScriptedProvider::new(|_| {
            Err(ProviderError::Status {
                status: 503,
                body: "overloaded".into(),
            })
        });
        let client = client(provider.clone(), EmbeddingSettings::default());

        assert!(matches!(client.embed("q"), Err(CallError::Failed(_))));
        assert!(matches!(client.embed("q"), Err(CallError::Failed(_))));
        assert_eq!(client.breaker().state(), CircuitStateKind::Open);

        let refused = client.embed("q");
        assert!(refused.as_ref().is_err_and(|e| e.is_open()));
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn test_unrecognized_shape_counts_as_failure() {
        let provider = ScriptedProvider::new(|_| Ok(json!({"error": "bad model"})));
        let client = client(provider, EmbeddingSettings::default());

        assert!(matches!(
            client.embed("q"),
            Err(CallError::Failed(EmbeddingError::UnrecognizedResponse(_)))
        ));
        assert_eq!(client.breaker().stats().failure_count, 1);
    }
}
