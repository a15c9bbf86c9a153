//! Configuration management for sift
//!
//! Configuration is loaded once from TOML, adjusted by an optional profile and
//! `SIFT_<SECTION>__<KEY>` environment variables, validated, then converted
//! into the settings structs each component takes at construction.

use crate::breaker::CircuitBreakerConfig;
use crate::chunking::{ChunkStrategy, Chunker};
use crate::embedding::{EmbeddingSettings, HttpProviderSettings};
use crate::error::{Result, SiftError};
use crate::ingest::IngestOptions;
use crate::retrieval::{ExecutionMode, FusionConfig, SearcherOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

const ENV_PREFIX: &str = "SIFT_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub circuit_breaker: CircuitBreakerSection,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Relative to `data_dir` unless absolute
    pub database_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "http" or "hashing"
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    /// Empty for endpoints without authentication
    #[serde(default)]
    pub api_key_env: String,
    /// Expected vector length; required for the hashing provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    pub batch_size: usize,
    pub max_input_chars: usize,
    pub request_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub reset_timeout: String,
    pub half_open_max_calls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    /// "prose", "code" or "paragraphs"
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub rrf_k: f64,
    pub candidate_multiplier: usize,
    pub default_limit: usize,
    pub similarity_threshold: f32,
    pub vector_weight: f64,
    pub fulltext_weight: f64,
    pub tag_weight: f64,
    /// "parallel" or "sequential"
    pub execution: String,
    /// Per-search time budget; no deadline when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    pub track_searches: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub max_concurrent_documents: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_searches: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_inner(path, None)
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        Self::load_inner(path, Some(profile))
    }

    fn load_inner(path: &Path, profile: Option<&str>) -> Result<Self> {
        if !path.exists() {
            return Err(SiftError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| SiftError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        if let Some(profile) = profile {
            config.apply_profile(profile)?;
        }
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| SiftError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply a profile's overrides; unknown profiles are an error
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| SiftError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(execution) = overrides.execution {
            self.retrieval.execution = execution;
        }
        if let Some(deadline) = overrides.deadline {
            self.retrieval.deadline = Some(deadline);
        }
        if let Some(threshold) = overrides.similarity_threshold {
            self.retrieval.similarity_threshold = threshold;
        }
        if let Some(track) = overrides.track_searches {
            self.retrieval.track_searches = track;
        }

        tracing::debug!("Applied profile '{}'", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: SIFT_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `SIFT_SECTION__KEY` pairs; entries without the prefix are ignored
    pub fn apply_overrides<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, value.as_ref()) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        let Some((section, key)) = path.split_once("__") else {
            tracing::debug!("Ignoring env config key without section: {}", path);
            return Ok(());
        };
        let section = section.to_lowercase();
        let key = key.to_lowercase();
        let dotted = format!("{}.{}", section, key);

        if section.starts_with('_') || section == "profiles" {
            tracing::debug!("Env overrides cannot set {}", dotted);
            return Ok(());
        }

        let mut document = toml::Value::try_from(&*self)?;
        let table = document
            .get_mut(&section)
            .and_then(toml::Value::as_table_mut)
            .ok_or_else(|| SiftError::InvalidConfigValue {
                path: dotted.clone(),
                message: format!("Unknown section '{}'", section),
            })?;

        let parsed = parse_env_value(table.get(&key), value).ok_or_else(|| SiftError::InvalidConfigValue {
            path: dotted.clone(),
            message: format!("Cannot parse '{}'", value),
        })?;
        table.insert(key, parsed);

        *self = document
            .try_into::<Config>()
            .map_err(|e: toml::de::Error| SiftError::InvalidConfigValue {
                path: dotted,
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SiftError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("sift").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| SiftError::Config("Cannot determine data directory".to_string()))?;

        Ok(data_dir.join("sift"))
    }

    /// Absolute path of the SQLite database
    pub fn database_path(&self) -> Result<PathBuf> {
        let file = expand_path(Path::new(&self.storage.database_file))?;
        if file.is_absolute() {
            return Ok(file);
        }
        Ok(expand_path(&self.storage.data_dir)?.join(file))
    }

    pub fn breaker_config(&self) -> Result<CircuitBreakerConfig> {
        Ok(CircuitBreakerConfig::new(
            self.circuit_breaker.failure_threshold,
            parse_duration(&self.circuit_breaker.reset_timeout)?,
            self.circuit_breaker.half_open_max_calls,
        ))
    }

    pub fn embedding_settings(&self) -> EmbeddingSettings {
        EmbeddingSettings {
            dimension: self.embedding.dimension,
            max_input_chars: self.embedding.max_input_chars,
            batch_size: self.embedding.batch_size,
        }
    }

    pub fn http_provider_settings(&self) -> Result<HttpProviderSettings> {
        Ok(HttpProviderSettings {
            name: self.embedding.provider.clone(),
            endpoint: self.embedding.endpoint.clone(),
            model: self.embedding.model.clone(),
            api_key_env: self.embedding.api_key_env.clone(),
            timeout: parse_duration(&self.embedding.request_timeout)?,
        })
    }

    pub fn chunker(&self) -> Result<Chunker> {
        let strategy: ChunkStrategy = self.chunking.strategy.parse().map_err(|e: String| {
            SiftError::InvalidConfigValue {
                path: "chunking.strategy".to_string(),
                message: e,
            }
        })?;
        Ok(Chunker::new(self.chunking.chunk_size, self.chunking.overlap).with_strategy(strategy))
    }

    pub fn execution_mode(&self) -> Result<ExecutionMode> {
        self.retrieval
            .execution
            .parse()
            .map_err(|e: String| SiftError::InvalidConfigValue {
                path: "retrieval.execution".to_string(),
                message: e,
            })
    }

    pub fn searcher_options(&self) -> Result<SearcherOptions> {
        let fusion = FusionConfig::new(
            self.retrieval.rrf_k,
            self.retrieval.vector_weight,
            self.retrieval.fulltext_weight,
            self.retrieval.tag_weight,
        )?;
        let deadline = self
            .retrieval
            .deadline
            .as_deref()
            .map(parse_duration)
            .transpose()?;

        Ok(SearcherOptions {
            fusion,
            candidate_multiplier: self.retrieval.candidate_multiplier,
            execution: self.execution_mode()?,
            deadline,
            track_searches: self.retrieval.track_searches,
        })
    }

    pub fn ingest_options(&self) -> Result<IngestOptions> {
        Ok(IngestOptions {
            chunker: self.chunker()?,
            max_concurrent_documents: self.ingestion.max_concurrent_documents,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.sift"),
                database_file: "sift.db".to_string(),
            },
            embedding: EmbeddingConfig {
                provider: "hashing".to_string(),
                model: "nomic-embed-text".to_string(),
                endpoint: "http://localhost:11434/v1/embeddings".to_string(),
                api_key_env: String::new(),
                dimension: Some(384),
                batch_size: 32,
                max_input_chars: 8000,
                request_timeout: "30s".to_string(),
            },
            circuit_breaker: CircuitBreakerSection {
                failure_threshold: 5,
                reset_timeout: "60s".to_string(),
                half_open_max_calls: 3,
            },
            chunking: ChunkingConfig {
                chunk_size: crate::chunking::DEFAULT_CHUNK_SIZE,
                overlap: crate::chunking::DEFAULT_OVERLAP,
                strategy: "prose".to_string(),
            },
            retrieval: RetrievalConfig {
                rrf_k: crate::retrieval::DEFAULT_RRF_K,
                candidate_multiplier: crate::retrieval::DEFAULT_CANDIDATE_MULTIPLIER,
                default_limit: crate::retrieval::DEFAULT_LIMIT,
                similarity_threshold: crate::retrieval::DEFAULT_SIMILARITY_THRESHOLD,
                vector_weight: 1.0,
                fulltext_weight: 1.0,
                tag_weight: 1.0,
                execution: "parallel".to_string(),
                deadline: Some("10s".to_string()),
                track_searches: true,
            },
            ingestion: IngestionConfig {
                max_concurrent_documents: 4,
            },
            profiles: HashMap::new(),
        }
    }
}

/// Parse durations such as "500ms", "30s", "5m", "1h"; a bare number is seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || SiftError::InvalidConfigValue {
        path: "duration".to_string(),
        message: format!("Invalid duration '{}'", s),
    };

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: u64 = number.parse().map_err(|_| invalid())?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid),
        "h" => value.checked_mul(3600).map(Duration::from_secs).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| SiftError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| SiftError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Parse an env value into the TOML type of the key it replaces
fn parse_env_value(current: Option<&toml::Value>, raw: &str) -> Option<toml::Value> {
    use toml::Value;

    match current {
        Some(Value::Boolean(_)) => raw.parse().ok().map(Value::Boolean),
        Some(Value::Integer(_)) => raw.parse().ok().map(Value::Integer),
        Some(Value::Float(_)) => raw.parse().ok().map(Value::Float),
        Some(Value::String(_)) => Some(Value::String(raw.to_string())),
        Some(_) => None,
        // Optional keys absent from the document: infer the type
        None => Some(
            raw.parse::<i64>()
                .map(Value::Integer)
                .or_else(|_| raw.parse::<f64>().map(Value::Float))
                .or_else(|_| raw.parse::<bool>().map(Value::Boolean))
                .unwrap_or_else(|_| Value::String(raw.to_string())),
        ),
    }
}
