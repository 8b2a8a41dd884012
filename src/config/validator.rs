use crate::config::{Config, ScoringWeights};
use crate::error::{ContextError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_scoring(&config.retrieval.scoring, &mut errors);

        if config.summary.max_documents == 0 {
            errors.push(ValidationError::new(
                "summary.max_documents",
                "Summary document limit must be greater than 0",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ContextError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.database_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.database_path",
                "Database path cannot be empty",
            ));
        }

        if config.storage.pool_size == 0 {
            errors.push(ValidationError::new(
                "storage.pool_size",
                "Pool size must be greater than 0",
            ));
        }

        let index = &config.storage.vector_index;
        if index.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "storage.vector_index.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if index.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "storage.vector_index.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if index.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "storage.vector_index.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if config.embedding.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_ms",
                "Embedding timeout must be greater than 0",
            ));
        }

        if config.embedding.chunk_size == 0 {
            errors.push(ValidationError::new(
                "embedding.chunk_size",
                "Chunk size must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if !(0.0..=1.0).contains(&retrieval.default_min_similarity) {
            errors.push(ValidationError::new(
                "retrieval.default_min_similarity",
                format!(
                    "Minimum similarity must be between 0.0 and 1.0, got {}",
                    retrieval.default_min_similarity
                ),
            ));
        }

        if retrieval.default_max_results == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_max_results",
                "Max results must be greater than 0",
            ));
        }

        if retrieval.vector_overfetch == 0 {
            errors.push(ValidationError::new(
                "retrieval.vector_overfetch",
                "Vector over-fetch multiplier must be at least 1",
            ));
        }

        if retrieval.max_keywords == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_keywords",
                "Keyword cap must be greater than 0",
            ));
        }
    }

    fn validate_scoring(scoring: &ScoringWeights, errors: &mut Vec<ValidationError>) {
        let weights = [
            ("vector_weight", scoring.vector_weight),
            ("vector_floor", scoring.vector_floor),
            ("hybrid_vector_weight", scoring.hybrid_vector_weight),
            ("hybrid_keyword_weight", scoring.hybrid_keyword_weight),
            ("keyword_only_weight", scoring.keyword_only_weight),
        ];

        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                errors.push(ValidationError::new(
                    format!("retrieval.scoring.{}", name),
                    format!("Weight must be a non-negative number, got {}", value),
                ));
            }
        }

        // Keeps every fused score inside [0, 1]
        if scoring.vector_weight + scoring.vector_floor > 1.0 + f32::EPSILON {
            errors.push(ValidationError::new(
                "retrieval.scoring.vector_floor",
                "vector_weight + vector_floor must not exceed 1.0",
            ));
        }
    }
}
