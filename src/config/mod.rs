//! Configuration management for hybrid-context
//!
//! Configuration is loaded from TOML, overlaid with environment variables and
//! an optional named profile, then validated as a whole.

use crate::error::{ContextError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Environment variable prefix for overrides (`HYBRID_CONTEXT_SECTION__KEY`)
const ENV_PREFIX: &str = "HYBRID_CONTEXT_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
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

/// Storage configuration for the SQLite corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub pool_size: u32,
    #[serde(default)]
    pub vector_index: VectorIndexConfig,
}

/// HNSW parameters for the SQLite backend's vector index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    /// Capacity hint per agent graph
    pub max_elements: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            max_elements: 10_000,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    /// Upper bound on a single query embedding call
    pub timeout_ms: u64,
    /// Maximum characters per chunk when ingesting documents
    pub chunk_size: usize,
}

/// Retrieval defaults and scoring constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_min_similarity: f32,
    pub default_max_results: usize,
    /// Vector candidates requested per final result slot
    pub vector_overfetch: usize,
    pub max_keywords: usize,
    /// Shortest token kept as a keyword
    pub min_keyword_len: usize,
    #[serde(default)]
    pub scoring: ScoringWeights,
}

/// Weights used when fusing vector and keyword scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Multiplier on raw similarity for vector hits
    pub vector_weight: f32,
    /// Constant added to every vector hit
    pub vector_floor: f32,
    /// Vector share of the score for hits confirmed by both channels
    pub hybrid_vector_weight: f32,
    /// Keyword share of the score for hits confirmed by both channels
    pub hybrid_keyword_weight: f32,
    /// Multiplier on keyword similarity for keyword-only hits
    pub keyword_only_weight: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            vector_floor: 0.3,
            hybrid_vector_weight: 0.7,
            hybrid_keyword_weight: 0.3,
            keyword_only_weight: 0.6,
        }
    }
}

/// Knowledge base summary configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    pub max_documents: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self { max_documents: 10 }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_min_similarity: 0.7,
            default_max_results: 5,
            vector_overfetch: 2,
            max_keywords: 10,
            min_keyword_len: 3,
            scoring: ScoringWeights::default(),
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_timeout_ms: Option<u64>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ContextError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ContextError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ContextError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| ContextError::ProfileNotFound {
                name: profile.to_string(),
            })?;

        if let Some(min_similarity) = overrides.min_similarity {
            self.retrieval.default_min_similarity = min_similarity;
        }
        if let Some(max_results) = overrides.max_results {
            self.retrieval.default_max_results = max_results;
        }
        if let Some(timeout_ms) = overrides.embedding_timeout_ms {
            self.embedding.timeout_ms = timeout_ms;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: HYBRID_CONTEXT_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATABASE_PATH" => {
                self.storage.database_path = PathBuf::from(value);
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__TIMEOUT_MS" => {
                self.embedding.timeout_ms = parse_env(path, value)?;
            }
            "RETRIEVAL__DEFAULT_MIN_SIMILARITY" => {
                self.retrieval.default_min_similarity = parse_env(path, value)?;
            }
            "RETRIEVAL__DEFAULT_MAX_RESULTS" => {
                self.retrieval.default_max_results = parse_env(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ContextError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("hybrid-context").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| ContextError::Config("Cannot determine data directory".to_string()))?;

        Ok(data_dir.join("hybrid-context"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| ContextError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                database_path: PathBuf::from("corpus.sqlite"),
                pool_size: 8,
                vector_index: VectorIndexConfig::default(),
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                dimension: 384,
                timeout_ms: 5000,
                chunk_size: 1000,
            },
            retrieval: RetrievalConfig::default(),
            summary: SummaryConfig::default(),
            profiles: HashMap::new(),
        }
    }
}
