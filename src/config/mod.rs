//! Configuration management for Bodhi
//!
//! Configuration is read from a TOML file, then `BODHI_SECTION__KEY`
//! environment variables are applied on top, then the result is validated.

use crate::error::{BodhiError, Result};
use crate::index::HnswParams;
use crate::llm::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::retrieval::FusionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod validator;

pub use crate::embedding::EmbeddingConfig;
pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
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

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Uploads at least this large are stored zstd-compressed
    pub compression_threshold: String,
}

/// Index store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub vector_dim: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
}

impl IndexConfig {
    pub fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            m: self.hnsw_m,
            ef_construction: self.hnsw_ef_construction,
            ef_search: self.hnsw_ef_search,
        }
    }
}

/// Generation model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub request_timeout: String,
    pub system_prompt: String,
}

/// Chunking defaults for new sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub size: usize,
    pub overlap: usize,
}

/// Retrieval and generation defaults for new sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub num_results: usize,
    pub use_hybrid: bool,
    pub temperature: f32,
    pub rrf_k: f32,
    pub keyword_weight: f32,
    pub semantic_weight: f32,
}

impl RetrievalConfig {
    pub fn fusion(&self) -> FusionConfig {
        FusionConfig {
            rrf_k: self.rrf_k,
            keyword_weight: self.keyword_weight,
            semantic_weight: self.semantic_weight,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BodhiError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| BodhiError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BodhiError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| BodhiError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: BODHI_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("BODHI_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__COMPRESSION_THRESHOLD" => {
                self.storage.compression_threshold = value.to_string()
            }
            "INDEX__NAME" => self.index.name = value.to_string(),
            "INDEX__VECTOR_DIM" => self.index.vector_dim = parse_env(path, value)?,
            "INDEX__HNSW_EF_SEARCH" => self.index.hnsw_ef_search = parse_env(path, value)?,
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__BATCH_SIZE" => self.embedding.batch_size = parse_env(path, value)?,
            "LLM__BASE_URL" => self.llm.base_url = value.to_string(),
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "LLM__REQUEST_TIMEOUT" => self.llm.request_timeout = value.to_string(),
            "CHUNKING__SIZE" => self.chunking.size = parse_env(path, value)?,
            "CHUNKING__OVERLAP" => self.chunking.overlap = parse_env(path, value)?,
            "RETRIEVAL__NUM_RESULTS" => self.retrieval.num_results = parse_env(path, value)?,
            "RETRIEVAL__USE_HYBRID" => self.retrieval.use_hybrid = parse_env(path, value)?,
            "RETRIEVAL__TEMPERATURE" => self.retrieval.temperature = parse_env(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Data directory with `~` expanded
    pub fn data_dir(&self) -> Result<PathBuf> {
        expand_path(&self.storage.data_dir)
    }

    pub fn compression_threshold(&self) -> Result<usize> {
        parse_size(&self.storage.compression_threshold).ok_or_else(|| {
            BodhiError::InvalidConfigValue {
                path: "storage.compression_threshold".to_string(),
                message: format!("Invalid size: {}", self.storage.compression_threshold),
            }
        })
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration(&self.llm.request_timeout).ok_or_else(|| BodhiError::InvalidConfigValue {
            path: "llm.request_timeout".to_string(),
            message: format!("Invalid duration: {}", self.llm.request_timeout),
        })
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| BodhiError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("bodhi").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| BodhiError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".bodhi"))
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
                data_dir: PathBuf::from("~/.bodhi"),
                compression_threshold: "64KB".to_string(),
            },
            index: IndexConfig {
                name: "documents".to_string(),
                vector_dim: 384,
                hnsw_m: 16,
                hnsw_ef_construction: 200,
                hnsw_ef_search: 50,
            },
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "llama3.2:1b".to_string(),
                request_timeout: "120s".to_string(),
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            },
            chunking: ChunkingConfig {
                size: 500,
                overlap: 100,
            },
            retrieval: RetrievalConfig {
                num_results: 5,
                use_hybrid: true,
                temperature: 0.7,
                rrf_k: 60.0,
                keyword_weight: 1.0,
                semantic_weight: 1.0,
            },
        }
    }
}

fn parse_env<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| BodhiError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse sizes like "64KB", "10MB" or a plain byte count
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim().to_uppercase();
    let (digits, multiplier) = if let Some(n) = s.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1)
    } else {
        (s.as_str(), 1)
    };

    digits.trim().parse::<usize>().ok()?.checked_mul(multiplier)
}

/// Parse durations like "30s", "5m", "1h" or plain seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], c),
        _ => (s, 's'),
    };

    let value: u64 = digits.trim().parse().ok()?;
    let seconds = match unit {
        's' => value,
        'm' => value.checked_mul(60)?,
        'h' => value.checked_mul(3600)?,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| BodhiError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| BodhiError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
