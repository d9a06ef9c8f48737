//! Long-lived service handles shared by all commands
//!
//! Built once at startup and handed to the orchestrators, which only hold
//! `Arc` clones of the pieces they use.

use crate::config::Config;
use crate::conversation::ConversationOrchestrator;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::IndexManager;
use crate::ingest::{IngestionOrchestrator, PdfExtractor, TextExtractor};
use crate::llm::{OllamaResponder, Responder, ResponseStreamer};
use crate::retrieval::HybridRetriever;
use crate::session::{Session, SessionOptions};
use crate::storage::StorageManager;
use std::sync::Arc;

pub struct Services {
    pub config: Config,
    pub storage: Arc<StorageManager>,
    pub embedder: Arc<Embedder>,
    pub index: Arc<IndexManager>,
    pub responder: Arc<dyn Responder>,
    extractor: Arc<dyn TextExtractor>,
}

impl Services {
    /// Open storage, create the index if needed and prepare the lazy models
    pub async fn init(config: Config) -> Result<Self> {
        let storage = Arc::new(StorageManager::new(
            config.data_dir()?,
            config.compression_threshold()?,
        )?);
        let embedder = Arc::new(Embedder::fastembed(&config.embedding));
        let responder: Arc<dyn Responder> = Arc::new(OllamaResponder::new(
            &config.llm.base_url,
            &config.llm.model,
            config.request_timeout()?,
        )?);

        Self::with_components(config, storage, embedder, responder, Arc::new(PdfExtractor)).await
    }

    /// Assemble services from prepared parts
    pub async fn with_components(
        config: Config,
        storage: Arc<StorageManager>,
        embedder: Arc<Embedder>,
        responder: Arc<dyn Responder>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        let index = Arc::new(IndexManager::new(
            storage.clone(),
            config.index.name.clone(),
            config.index.vector_dim,
            config.index.hnsw_params(),
        ));
        index.create_index().await?;

        tracing::debug!(
            "Services ready (index '{}', embedder {}, responder {})",
            index.index_name(),
            embedder.model_name(),
            responder.model_name()
        );

        Ok(Self {
            config,
            storage,
            embedder,
            index,
            responder,
            extractor,
        })
    }

    pub fn ingestion(&self) -> IngestionOrchestrator {
        IngestionOrchestrator::new(
            self.embedder.clone(),
            self.index.clone(),
            self.extractor.clone(),
        )
    }

    pub fn retriever(&self) -> HybridRetriever {
        HybridRetriever::new(
            self.embedder.clone(),
            self.index.clone(),
            self.config.retrieval.fusion(),
        )
    }

    pub fn streamer(&self) -> ResponseStreamer {
        ResponseStreamer::new(self.responder.clone(), self.config.llm.system_prompt.clone())
    }

    pub fn conversation(&self) -> ConversationOrchestrator {
        ConversationOrchestrator::new(self.retriever(), self.streamer())
    }

    /// A fresh session with options taken from the configuration
    pub fn new_session(&self) -> Session {
        Session::new(SessionOptions::from_config(&self.config))
    }
}
