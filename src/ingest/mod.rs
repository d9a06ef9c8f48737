//! Document ingestion
//!
//! Each upload runs through blob storage, text extraction, chunking, one
//! batched embedding call and one bulk index write. Uploads are processed one
//! after another and fail independently.

mod extract;

pub use extract::{PdfExtractor, TextExtractor};

use crate::chunking::TextChunker;
use crate::embedding::Embedder;
use crate::error::{BodhiError, Result};
use crate::index::{Chunk, DeleteReport, IndexManager};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// An uploaded file
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a file from disk, named after its file name
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                BodhiError::Validation(format!("Invalid file name: {}", path.display()))
            })?;

        let bytes = std::fs::read(path).map_err(|e| BodhiError::Io {
            source: e,
            context: format!("Failed to read upload: {}", path.display()),
        })?;

        Ok(Self::new(name, bytes))
    }
}

/// A document that made it into the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedDocument {
    pub name: String,
    pub chunk_count: usize,
    pub blob_hash: String,
}

/// Result of one upload within a batch
#[derive(Debug)]
pub struct DocumentOutcome {
    pub name: String,
    pub result: Result<IndexedDocument>,
}

/// Drives uploads into the index
#[derive(Clone)]
pub struct IngestionOrchestrator {
    embedder: Arc<Embedder>,
    index: Arc<IndexManager>,
    extractor: Arc<dyn TextExtractor>,
}

impl IngestionOrchestrator {
    pub fn new(
        embedder: Arc<Embedder>,
        index: Arc<IndexManager>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            embedder,
            index,
            extractor,
        }
    }

    /// Ingest a batch of uploads, one outcome per upload in input order
    pub async fn ingest(
        &self,
        uploads: Vec<UploadedDocument>,
        chunker: &TextChunker,
    ) -> Vec<DocumentOutcome> {
        let mut outcomes = Vec::with_capacity(uploads.len());

        for upload in uploads {
            let name = upload.name.clone();
            let result = self.ingest_one(upload, chunker).await;

            match &result {
                Ok(doc) => tracing::info!("Indexed '{}' ({} chunks)", doc.name, doc.chunk_count),
                Err(e) if e.is_validation() => tracing::warn!("Rejected '{}': {}", name, e),
                Err(e) => tracing::error!("Failed to ingest '{}': {}", name, e),
            }

            outcomes.push(DocumentOutcome { name, result });
        }

        outcomes
    }

    async fn ingest_one(
        &self,
        upload: UploadedDocument,
        chunker: &TextChunker,
    ) -> Result<IndexedDocument> {
        let UploadedDocument { name, bytes } = upload;

        if name.trim().is_empty() {
            return Err(BodhiError::Validation("Document name is empty".to_string()));
        }
        if bytes.is_empty() {
            return Err(BodhiError::Validation(format!("'{}' is empty", name)));
        }

        if self.index.list_document_names().await?.contains(&name) {
            return Err(BodhiError::DuplicateDocument { name });
        }

        let storage = self.index.storage();
        let blob = storage.blob_store.write(&bytes)?;

        // The registry key settles concurrent uploads of the same name
        if !self.index.claim_document(&name, Some(&blob.hash))? {
            if blob.is_new {
                storage.blob_store.delete(&blob.hash)?;
            }
            return Err(BodhiError::DuplicateDocument { name });
        }

        match self.index_claimed(&name, bytes, chunker).await {
            Ok(chunk_count) => Ok(IndexedDocument {
                name,
                chunk_count,
                blob_hash: blob.hash,
            }),
            // Chunks that made it stay indexed under the claimed name
            Err(e) if matches!(e, BodhiError::PartialBatchFailure { indexed, .. } if indexed > 0) => {
                Err(e)
            }
            Err(e) => {
                if let Err(release_err) = self.release(&name) {
                    tracing::warn!("Failed to release '{}': {}", name, release_err);
                }
                Err(e)
            }
        }
    }

    /// Extract, chunk, embed and write a claimed document
    async fn index_claimed(
        &self,
        name: &str,
        bytes: Vec<u8>,
        chunker: &TextChunker,
    ) -> Result<usize> {
        let extractor = self.extractor.clone();
        let owned_name = name.to_string();
        let text = tokio::task::spawn_blocking(move || extractor.extract(&owned_name, &bytes))
            .await
            .map_err(|e| BodhiError::Other(anyhow::anyhow!("Extraction task failed: {}", e)))??;

        if text.trim().is_empty() {
            return Err(BodhiError::Validation(format!(
                "No extractable text in '{}'",
                name
            )));
        }

        // Blank windows (page padding) carry nothing to retrieve
        let (ordinals, texts): (Vec<usize>, Vec<String>) = chunker
            .split(&text)
            .into_iter()
            .enumerate()
            .filter(|(_, chunk)| !chunk.trim().is_empty())
            .unzip();

        tracing::debug!(
            "'{}': {} chars -> {} chunks (size {}, overlap {})",
            name,
            text.chars().count(),
            texts.len(),
            chunker.size(),
            chunker.overlap()
        );

        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(BodhiError::Other(anyhow::anyhow!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                texts.len()
            )));
        }

        let chunks: Vec<Chunk> = ordinals
            .into_iter()
            .zip(texts)
            .zip(embeddings)
            .map(|((ordinal, text), embedding)| Chunk {
                doc_id: format!("{}_{}", name, ordinal),
                text,
                embedding,
                document_name: name.to_string(),
            })
            .collect();

        self.index.bulk_index(chunks).await?.into_result()
    }

    /// Delete a document and, if nothing else uses it, its stored upload
    pub async fn delete_document(&self, name: &str) -> Result<DeleteReport> {
        let report = self.index.delete_by_document_name(name).await?;

        if let Some(hash) = &report.released_blob {
            self.collect_blob(hash)?;
        }

        Ok(report)
    }

    /// Rebuild a document's chunks from its stored upload
    ///
    /// The old chunks are removed first, so a failure leaves the document
    /// unindexed and its name free for a fresh upload.
    pub async fn reindex_document(
        &self,
        name: &str,
        chunker: &TextChunker,
    ) -> Result<IndexedDocument> {
        let hash = self.index.document_blob(name)?.ok_or_else(|| {
            BodhiError::Validation(format!("No stored upload for '{}'", name))
        })?;
        let bytes = self.index.storage().blob_store.read(&hash)?;

        let removed = self.index.delete_by_document_name(name).await?;
        tracing::debug!("Reindexing '{}': dropped {} chunks", name, removed.chunks_removed);

        let result = self
            .ingest_one(UploadedDocument::new(name, bytes), chunker)
            .await;

        match &result {
            Ok(doc) => tracing::info!("Reindexed '{}' ({} chunks)", doc.name, doc.chunk_count),
            Err(e) => {
                tracing::error!("Failed to reindex '{}': {}", name, e);
                if let Err(gc_err) = self.collect_blob(&hash) {
                    tracing::warn!("Failed to collect blob {}: {}", hash, gc_err);
                }
            }
        }

        result
    }

    fn release(&self, name: &str) -> Result<()> {
        if let Some(hash) = self.index.release_document(name)? {
            self.collect_blob(&hash)?;
        }
        Ok(())
    }

    fn collect_blob(&self, hash: &str) -> Result<()> {
        let storage = self.index.storage();
        if storage.database.blob_references(hash)? == 0 {
            storage.blob_store.delete(hash)?;
            tracing::debug!("Removed unreferenced blob {}", hash);
        }
        Ok(())
    }
}
