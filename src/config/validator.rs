use crate::config::{parse_duration, Config, SCHEMA_VERSION};
use crate::error::{Result, SiftError, ValidationError};

const PROVIDERS: [&str; 2] = ["http", "hashing"];
const STRATEGIES: [&str; 3] = ["prose", "code", "paragraphs"];
const EXECUTION_MODES: [&str; 2] = ["parallel", "sequential"];

/// Configuration validator
///
/// Collects every problem before failing so one run reports them all.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_circuit_breaker(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);

        if config.ingestion.max_concurrent_documents == 0 {
            errors.push(ValidationError::new(
                "ingestion.max_concurrent_documents",
                "Must be greater than 0",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SiftError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
        if config.storage.database_file.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.database_file",
                "Database file cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        if !PROVIDERS.contains(&embedding.provider.as_str()) {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    PROVIDERS, embedding.provider
                ),
            ));
        }

        if embedding.provider == "http" {
            if embedding.endpoint.is_empty() {
                errors.push(ValidationError::new(
                    "embedding.endpoint",
                    "Endpoint is required for the http provider",
                ));
            }
            if embedding.model.is_empty() {
                errors.push(ValidationError::new(
                    "embedding.model",
                    "Model name cannot be empty",
                ));
            }
        }

        match embedding.dimension {
            Some(0) => errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            )),
            None if embedding.provider == "hashing" => errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension is required for the hashing provider",
            )),
            _ => {}
        }

        if embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }
        if embedding.max_input_chars == 0 {
            errors.push(ValidationError::new(
                "embedding.max_input_chars",
                "Max input chars must be greater than 0",
            ));
        }

        Self::check_duration("embedding.request_timeout", &embedding.request_timeout, errors);
    }

    fn validate_circuit_breaker(config: &Config, errors: &mut Vec<ValidationError>) {
        let breaker = &config.circuit_breaker;

        if breaker.failure_threshold == 0 {
            errors.push(ValidationError::new(
                "circuit_breaker.failure_threshold",
                "Failure threshold must be greater than 0",
            ));
        }
        if breaker.half_open_max_calls == 0 {
            errors.push(ValidationError::new(
                "circuit_breaker.half_open_max_calls",
                "Half-open call limit must be greater than 0",
            ));
        }

        Self::check_duration("circuit_breaker.reset_timeout", &breaker.reset_timeout, errors);
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;

        if chunking.chunk_size == 0 {
            errors.push(ValidationError::new(
                "chunking.chunk_size",
                "Chunk size must be greater than 0",
            ));
        } else if chunking.overlap >= chunking.chunk_size {
            errors.push(ValidationError::new(
                "chunking.overlap",
                format!(
                    "Overlap ({}) must be smaller than chunk size ({})",
                    chunking.overlap, chunking.chunk_size
                ),
            ));
        }

        if !STRATEGIES.contains(&chunking.strategy.to_lowercase().as_str()) {
            errors.push(ValidationError::new(
                "chunking.strategy",
                format!(
                    "Strategy must be one of {:?}, got '{}'",
                    STRATEGIES, chunking.strategy
                ),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if !retrieval.rrf_k.is_finite() || retrieval.rrf_k < 0.0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                format!("RRF constant must be non-negative, got {}", retrieval.rrf_k),
            ));
        }

        for (path, weight) in [
            ("retrieval.vector_weight", retrieval.vector_weight),
            ("retrieval.fulltext_weight", retrieval.fulltext_weight),
            ("retrieval.tag_weight", retrieval.tag_weight),
        ] {
            if !weight.is_finite() || weight <= 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be positive, got {}", weight),
                ));
            }
        }

        if retrieval.candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.candidate_multiplier",
                "Candidate multiplier must be greater than 0",
            ));
        }
        if retrieval.default_limit == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_limit",
                "Default limit must be greater than 0",
            ));
        }

        let threshold = retrieval.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(ValidationError::new(
                "retrieval.similarity_threshold",
                format!("Threshold must be between 0.0 and 1.0, got {}", threshold),
            ));
        }

        if !EXECUTION_MODES.contains(&retrieval.execution.to_lowercase().as_str()) {
            errors.push(ValidationError::new(
                "retrieval.execution",
                format!(
                    "Execution must be one of {:?}, got '{}'",
                    EXECUTION_MODES, retrieval.execution
                ),
            ));
        }

        if let Some(deadline) = &retrieval.deadline {
            Self::check_duration("retrieval.deadline", deadline, errors);
        }
    }

    fn check_duration(path: &str, value: &str, errors: &mut Vec<ValidationError>) {
        if parse_duration(value).is_err() {
            errors.push(ValidationError::new(
                path,
                format!("Invalid duration format: {}", value),
            ));
        }
    }
}
