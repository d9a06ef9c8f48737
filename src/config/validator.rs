use crate::config::{parse_duration, parse_size, Config, SCHEMA_VERSION};
use crate::embedding::FastEmbedProvider;
use crate::error::{BodhiError, Result, ValidationError};
use crate::session::{MAX_NUM_RESULTS, MIN_NUM_RESULTS};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every problem at once
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BodhiError::ConfigValidation { errors })
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

        let size_str = &config.storage.compression_threshold;
        if parse_size(size_str).is_none() {
            errors.push(ValidationError::new(
                "storage.compression_threshold",
                format!("Invalid size format: {}", size_str),
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        let index = &config.index;

        if index.name.trim().is_empty()
            || !index
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            errors.push(ValidationError::new(
                "index.name",
                format!(
                    "Index name must be non-empty and use only letters, digits, '-' or '_': '{}'",
                    index.name
                ),
            ));
        }

        if index.vector_dim == 0 {
            errors.push(ValidationError::new(
                "index.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }

        if let Some(model_dim) = FastEmbedProvider::dimension_of(&config.embedding.model) {
            if index.vector_dim != model_dim {
                errors.push(ValidationError::new(
                    "index.vector_dim",
                    format!(
                        "Model {} produces {}-dimensional vectors, index expects {}",
                        config.embedding.model, model_dim, index.vector_dim
                    ),
                ));
            }
        }

        for (path, value) in [
            ("index.hnsw_m", index.hnsw_m),
            ("index.hnsw_ef_construction", index.hnsw_ef_construction),
            ("index.hnsw_ef_search", index.hnsw_ef_search),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(path, "Must be greater than 0"));
            }
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.trim().is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        let llm = &config.llm;

        if !(llm.base_url.starts_with("http://") || llm.base_url.starts_with("https://")) {
            errors.push(ValidationError::new(
                "llm.base_url",
                format!("Base URL must start with http:// or https://: '{}'", llm.base_url),
            ));
        }

        if llm.model.trim().is_empty() {
            errors.push(ValidationError::new("llm.model", "Model name cannot be empty"));
        }

        match parse_duration(&llm.request_timeout) {
            Some(d) if !d.is_zero() => {}
            _ => errors.push(ValidationError::new(
                "llm.request_timeout",
                format!("Invalid duration format: {}", llm.request_timeout),
            )),
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;

        if chunking.size == 0 {
            errors.push(ValidationError::new(
                "chunking.size",
                "Chunk size must be greater than 0",
            ));
        } else if chunking.overlap >= chunking.size {
            errors.push(ValidationError::new(
                "chunking.overlap",
                format!(
                    "Overlap ({}) must be smaller than chunk size ({})",
                    chunking.overlap, chunking.size
                ),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if !(MIN_NUM_RESULTS..=MAX_NUM_RESULTS).contains(&retrieval.num_results) {
            errors.push(ValidationError::new(
                "retrieval.num_results",
                format!(
                    "Must be between {} and {}, got {}",
                    MIN_NUM_RESULTS, MAX_NUM_RESULTS, retrieval.num_results
                ),
            ));
        }

        if !(0.0..=1.0).contains(&retrieval.temperature) {
            errors.push(ValidationError::new(
                "retrieval.temperature",
                format!("Must be between 0.0 and 1.0, got {}", retrieval.temperature),
            ));
        }

        if !(retrieval.rrf_k >= 0.0) {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                "RRF constant cannot be negative",
            ));
        }

        for (path, weight) in [
            ("retrieval.keyword_weight", retrieval.keyword_weight),
            ("retrieval.semantic_weight", retrieval.semantic_weight),
        ] {
            if !(weight > 0.0) {
                errors.push(ValidationError::new(path, "Fusion weights must be positive"));
            }
        }
    }
}
