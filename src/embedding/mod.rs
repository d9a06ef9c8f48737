//! Embedding generation
//!
//! - `EmbeddingProvider` trait for abstraction over backends
//! - `FastEmbedProvider` for local embedding (all-MiniLM-L6-v2, 384-dim)
//! - `Embedder`, the process-wide handle that loads the model on first use
//!   and shares it read-only afterwards
mod provider;

pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};

use crate::error::{BodhiError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Configuration for embedding generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name (e.g., "all-MiniLM-L6-v2")
    pub model: String,
    /// Batch size for processing
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            batch_size: 32,
        }
    }
}

type ProviderLoader =
    Box<dyn Fn() -> std::result::Result<Arc<dyn EmbeddingProvider>, EmbeddingError> + Send + Sync>;

/// Lazily-initialized embedding model shared by ingestion and retrieval
///
/// The first caller pays for the model load on a blocking thread; every
/// later caller gets the cached instance without locking.
pub struct Embedder {
    model_name: String,
    provider: OnceCell<Arc<dyn EmbeddingProvider>>,
    loader: Arc<ProviderLoader>,
}

impl Embedder {
    /// Embedder backed by FastEmbed, loaded on first use
    pub fn fastembed(config: &EmbeddingConfig) -> Self {
        let model = config.model.clone();
        let batch_size = config.batch_size;
        let loader: ProviderLoader = Box::new(move || {
            let provider = FastEmbedProvider::new(&model, batch_size)?;
            Ok(Arc::new(provider) as Arc<dyn EmbeddingProvider>)
        });

        Self {
            model_name: config.model.clone(),
            provider: OnceCell::new(),
            loader: Arc::new(loader),
        }
    }

    /// Embedder around an already-constructed provider
    pub fn from_provider(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let model_name = provider.model_name().to_string();
        let cached = provider.clone();
        let loader: ProviderLoader = Box::new(move || Ok(cached.clone()));

        Self {
            model_name,
            provider: OnceCell::new_with(Some(provider)),
            loader: Arc::new(loader),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn is_loaded(&self) -> bool {
        self.provider.initialized()
    }

    /// Load the model if needed and return the shared provider
    pub async fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let provider = self
            .provider
            .get_or_try_init(|| async {
                let loader = self.loader.clone();
                let model = self.model_name.clone();

                tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| BodhiError::ModelUnavailable {
                        model: model.clone(),
                        reason: format!("Model loader panicked: {}", e),
                    })?
                    .map_err(|e| BodhiError::ModelUnavailable {
                        model,
                        reason: e.to_string(),
                    })
            })
            .await?;

        Ok(provider.clone())
    }

    /// Embed a list of texts, returning one vector per input
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let provider = self.provider().await?;
        let texts = texts.to_vec();

        let embeddings = tokio::task::spawn_blocking(move || provider.embed_batch(&texts))
            .await
            .map_err(|e| BodhiError::Other(anyhow::anyhow!("Embedding task failed: {}", e)))??;

        Ok(embeddings)
    }

    /// Embed a single query string
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let provider = self.provider().await?;
        let query = query.to_string();

        let embedding = tokio::task::spawn_blocking(move || provider.embed(&query))
            .await
            .map_err(|e| BodhiError::Other(anyhow::anyhow!("Embedding task failed: {}", e)))??;

        Ok(embedding)
    }

    /// Dimension of the loaded model
    pub async fn dimension(&self) -> Result<usize> {
        Ok(self.provider().await?.dimension())
    }
}
