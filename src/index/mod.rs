//! Index store for document chunks
//!
//! One named index spans three stores kept in step:
//! - SQLite chunk rows (source of truth: doc_id, text, embedding, document_name)
//! - a Tantivy index over `text` for BM25 keyword search
//! - an HNSW graph over `embedding` for approximate nearest-neighbour search
//!
//! Rows are linked across the three by the SQLite row key.

mod keyword;
mod vector;

pub use keyword::{KeywordHit, KeywordIndex, KeywordIndexError};
pub use vector::{HnswParams, VectorHit, VectorIndex, VectorIndexError};

use crate::error::{BodhiError, ChunkFailure, Result};
use crate::storage::{ChunkInsert, StorageManager};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A chunk ready to be written: text plus its embedding
#[derive(Debug, Clone)]
pub struct Chunk {
    /// `<document_name>_<ordinal>`, unique within the index
    pub doc_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub document_name: String,
}

/// A stored chunk as returned to readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedChunk {
    pub key: u64,
    pub doc_id: String,
    pub document_name: String,
    pub text: String,
}

/// One bucket of the `document_name` aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentBucket {
    pub name: String,
    pub chunk_count: usize,
}

/// Per-chunk outcome of a bulk write
#[derive(Debug, Default)]
pub struct BulkIndexReport {
    /// doc_ids written to every store
    pub indexed: Vec<String>,
    pub failed: Vec<ChunkFailure>,
}

impl BulkIndexReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Collapse to an error when any chunk failed
    pub fn into_result(self) -> Result<usize> {
        if self.failed.is_empty() {
            Ok(self.indexed.len())
        } else {
            Err(BodhiError::PartialBatchFailure {
                indexed: self.indexed.len(),
                failed: self.failed,
            })
        }
    }
}

/// Outcome of deleting a document
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub chunks_removed: usize,
    /// Blob the document registration pointed at, if any
    pub released_blob: Option<String>,
}

struct OpenIndex {
    keyword: KeywordIndex,
    vector: VectorIndex,
}

/// Owner of one named index
///
/// Cheap to share behind an `Arc`; searches take a read lock, writes take
/// the write lock for the duration of one batch.
pub struct IndexManager {
    storage: Arc<StorageManager>,
    index_name: String,
    vector_dim: usize,
    hnsw: HnswParams,
    open: RwLock<Option<OpenIndex>>,
}

impl IndexManager {
    pub fn new(
        storage: Arc<StorageManager>,
        index_name: impl Into<String>,
        vector_dim: usize,
        hnsw: HnswParams,
    ) -> Self {
        Self {
            storage,
            index_name: index_name.into(),
            vector_dim,
            hnsw,
            open: RwLock::new(None),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn vector_dim(&self) -> usize {
        self.vector_dim
    }

    /// Create the index if absent and open it
    ///
    /// Safe to call repeatedly; an existing index is opened as-is and its
    /// vector graph rebuilt from the stored rows.
    pub async fn create_index(&self) -> Result<()> {
        let mut open = self.open.write().await;
        if open.is_some() {
            return Ok(());
        }

        let database = &self.storage.database;
        if database.register_index(&self.index_name, self.vector_dim)? {
            tracing::info!(
                "Created index '{}' ({} dimensions)",
                self.index_name,
                self.vector_dim
            );
        } else if let Some(stored_dim) = database.index_dimension(&self.index_name)? {
            if stored_dim != self.vector_dim {
                return Err(BodhiError::Config(format!(
                    "Index '{}' stores {}-dimensional vectors but the embedder produces {}",
                    self.index_name, stored_dim, self.vector_dim
                )));
            }
        }

        let keyword_dir = self.storage.index_dir(&self.index_name).join("keywords");
        let keyword = KeywordIndex::open_or_create(keyword_dir)
            .map_err(|e| BodhiError::StoreConnection(e.to_string()))?;

        let vectors = database.all_vectors(&self.index_name)?;
        let vector = VectorIndex::rebuild(self.vector_dim, self.hnsw, &vectors)?;

        tracing::debug!(
            "Opened index '{}': {} keyword docs, {} vectors",
            self.index_name,
            keyword.len(),
            vector.len()
        );

        *open = Some(OpenIndex { keyword, vector });
        Ok(())
    }

    /// Whether the index is registered in the store
    pub fn index_exists(&self) -> Result<bool> {
        Ok(self
            .storage
            .database
            .index_dimension(&self.index_name)?
            .is_some())
    }

    fn missing(&self) -> BodhiError {
        BodhiError::IndexMissing {
            name: self.index_name.clone(),
        }
    }

    fn validate(&self, chunk: &Chunk) -> std::result::Result<(), String> {
        if chunk.doc_id.trim().is_empty() {
            return Err("doc_id is empty".to_string());
        }
        if chunk.document_name.trim().is_empty() {
            return Err("document_name is empty".to_string());
        }
        if chunk.text.trim().is_empty() {
            return Err("text is empty".to_string());
        }
        if chunk.embedding.len() != self.vector_dim {
            return Err(format!(
                "embedding has {} dimensions, index expects {}",
                chunk.embedding.len(),
                self.vector_dim
            ));
        }
        if chunk.embedding.iter().any(|v| !v.is_finite()) {
            return Err("embedding contains non-finite values".to_string());
        }
        Ok(())
    }

    /// Write a batch of chunks
    ///
    /// Not atomic: a chunk that fails validation or a store constraint is
    /// reported in the returned report and the rest are still written.
    /// A keyword index failure fails the whole batch and leaves no rows behind.
    pub async fn bulk_index(&self, chunks: Vec<Chunk>) -> Result<BulkIndexReport> {
        let mut guard = self.open.write().await;
        let open = guard.as_mut().ok_or_else(|| self.missing())?;

        let mut report = BulkIndexReport::default();
        let mut valid = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            match self.validate(chunk) {
                Ok(()) => valid.push(chunk),
                Err(reason) => report.failed.push(ChunkFailure {
                    doc_id: chunk.doc_id.clone(),
                    reason,
                }),
            }
        }

        if valid.is_empty() {
            return Ok(report);
        }

        let outcomes = self.storage.database.insert_chunks(&self.index_name, &valid)?;

        let mut written = Vec::with_capacity(valid.len());
        for (chunk, outcome) in valid.into_iter().zip(outcomes) {
            match outcome {
                ChunkInsert::Inserted(key) => written.push((key, chunk)),
                ChunkInsert::Rejected(reason) => report.failed.push(ChunkFailure {
                    doc_id: chunk.doc_id.clone(),
                    reason,
                }),
            }
        }

        if let Err(e) = Self::write_keywords(&mut open.keyword, &written) {
            // Chunk rows never outlive a failed keyword write
            open.keyword.rollback();
            let keys: Vec<u64> = written.iter().map(|(key, _)| *key).collect();
            let removed = self
                .storage
                .database
                .delete_chunks_by_keys(&self.index_name, &keys)?;
            tracing::warn!("Keyword write failed, removed {} chunk rows: {}", removed, e);
            return Err(e.into());
        }

        for (key, chunk) in written {
            open.vector.insert(key, &chunk.embedding)?;
            report.indexed.push(chunk.doc_id.clone());
        }

        if report.is_complete() {
            tracing::debug!("Indexed {} chunks", report.indexed.len());
        } else {
            tracing::warn!(
                "Indexed {} chunks, {} rejected",
                report.indexed.len(),
                report.failed.len()
            );
        }

        Ok(report)
    }

    fn write_keywords(
        keyword: &mut KeywordIndex,
        written: &[(u64, &Chunk)],
    ) -> std::result::Result<(), KeywordIndexError> {
        for (key, chunk) in written {
            keyword.insert(*key, &chunk.doc_id, &chunk.text, &chunk.document_name)?;
        }
        keyword.commit()
    }

    /// Remove every chunk of a document; a no-op if none match
    pub async fn delete_by_document_name(&self, name: &str) -> Result<DeleteReport> {
        let mut guard = self.open.write().await;
        let open = guard.as_mut().ok_or_else(|| self.missing())?;

        let keys = self
            .storage
            .database
            .delete_chunks_by_document(&self.index_name, name)?;

        if !keys.is_empty() {
            open.keyword.delete_document(name)?;
            open.keyword.commit()?;
            open.vector.remove(&keys);
        }

        let released_blob = self.storage.database.release_document(&self.index_name, name)?;

        if !keys.is_empty() {
            tracing::info!("Deleted '{}' ({} chunks)", name, keys.len());
        }

        Ok(DeleteReport {
            chunks_removed: keys.len(),
            released_blob,
        })
    }

    /// Distinct document names currently indexed
    pub async fn list_document_names(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .document_buckets()
            .await?
            .into_iter()
            .map(|bucket| bucket.name)
            .collect())
    }

    /// Chunk counts per document, in upload order
    pub async fn document_buckets(&self) -> Result<Vec<DocumentBucket>> {
        let guard = self.open.read().await;
        if guard.is_none() {
            return Err(self.missing());
        }
        self.storage.database.document_buckets(&self.index_name)
    }

    /// BM25 keyword search, best first
    pub async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<KeywordHit>> {
        let guard = self.open.read().await;
        let open = guard.as_ref().ok_or_else(|| self.missing())?;
        Ok(open.keyword.search(query, k)?)
    }

    /// Approximate nearest neighbours by cosine similarity, best first
    pub async fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        let guard = self.open.read().await;
        let open = guard.as_ref().ok_or_else(|| self.missing())?;
        Ok(open.vector.search(query, k)?)
    }

    /// Load chunk rows by key, in the order given
    pub fn fetch_chunks(&self, keys: &[u64]) -> Result<Vec<IndexedChunk>> {
        self.storage.database.get_chunks(&self.index_name, keys)
    }

    /// Reserve a document name; `false` if it is already taken
    pub fn claim_document(&self, name: &str, blob_hash: Option<&str>) -> Result<bool> {
        self.storage
            .database
            .claim_document(&self.index_name, name, blob_hash)
    }

    /// Content hash of the stored upload behind a document name
    pub fn document_blob(&self, name: &str) -> Result<Option<String>> {
        self.storage.database.document_blob(&self.index_name, name)
    }

    /// Drop a name reservation, returning the blob it referenced
    pub fn release_document(&self, name: &str) -> Result<Option<String>> {
        self.storage.database.release_document(&self.index_name, name)
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 4;

    fn manager() -> (IndexManager, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(StorageManager::new(temp.path().to_path_buf(), 1024).unwrap());
        (
            IndexManager::new(storage, "documents", DIM, HnswParams::default()),
            temp,
        )
    }

    fn chunk(document: &str, ordinal: usize, text: &str, axis: usize) -> Chunk {
        let mut embedding = vec![0.0; DIM];
        embedding[axis] = 1.0;
        Chunk {
            doc_id: format!("{}_{}", document, ordinal),
            text: text.to_string(),
            embedding,
            document_name: document.to_string(),
        }
    }

    #[tokio::test]
    async fn test_operations_require_index() {
        let (index, _temp) = manager();
        assert!(!index.index_exists().unwrap());

        let err = index.bulk_index(vec![]).await.unwrap_err();
        assert!(matches!(err, BodhiError::IndexMissing { .. }));
        assert!(index.keyword_search("x", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_create_index_is_idempotent() {
        let (index, _temp) = manager();
        index.create_index().await.unwrap();
        index.create_index().await.unwrap();
        assert!(index.index_exists().unwrap());
        assert!(index.list_document_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_index_and_search() {
        let (index, _temp) = manager();
        index.create_index().await.unwrap();

        let report = index
            .bulk_index(vec![
                chunk("a.pdf", 0, "quarterly revenue grew", 0),
                chunk("a.pdf", 1, "operating costs fell", 1),
                chunk("b.pdf", 0, "revenue guidance for next year", 2),
            ])
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.indexed.len(), 3);

        let names = index.list_document_names().await.unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["a.pdf", "b.pdf"]);

        let hits = index.keyword_search("revenue", 10).await.unwrap();
        assert_eq!(hits.len(), 2);

        let hits = index.vector_search(&[0.0, 1.0, 0.0, 0.0], 1).await.unwrap();
        let rows = index.fetch_chunks(&[hits[0].key]).unwrap();
        assert_eq!(rows[0].doc_id, "a.pdf_1");
    }

    #[tokio::test]
    async fn test_partial_batch_failure() {
        let (index, _temp) = manager();
        index.create_index().await.unwrap();

        let mut wrong_dim = chunk("a.pdf", 1, "second", 0);
        wrong_dim.embedding.push(0.0);
        let empty = chunk("a.pdf", 2, "   ", 0);

        let report = index
            .bulk_index(vec![chunk("a.pdf", 0, "first", 0), wrong_dim, empty])
            .await
            .unwrap();

        assert_eq!(report.indexed, vec!["a.pdf_0".to_string()]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].doc_id, "a.pdf_1");

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, BodhiError::PartialBatchFailure { indexed: 1, .. }));

        // The valid chunk stays indexed
        assert_eq!(index.keyword_search("first", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_doc_id_is_rejected() {
        let (index, _temp) = manager();
        index.create_index().await.unwrap();

        index.bulk_index(vec![chunk("a.pdf", 0, "first", 0)]).await.unwrap();
        let report = index
            .bulk_index(vec![chunk("a.pdf", 0, "again", 1)])
            .await
            .unwrap();

        assert!(report.indexed.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(index.keyword_search("again", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_document_name() {
        let (index, _temp) = manager();
        index.create_index().await.unwrap();
        index
            .bulk_index(vec![
                chunk("a.pdf", 0, "alpha revenue", 0),
                chunk("b.pdf", 0, "beta revenue", 1),
            ])
            .await
            .unwrap();

        let report = index.delete_by_document_name("a.pdf").await.unwrap();
        assert_eq!(report.chunks_removed, 1);

        let names = index.list_document_names().await.unwrap();
        assert!(!names.contains("a.pdf"));

        let keys: Vec<u64> = index
            .keyword_search("revenue", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.key)
            .collect();
        let rows = index.fetch_chunks(&keys).unwrap();
        assert!(rows.iter().all(|r| r.document_name == "b.pdf"));

        let hits = index.vector_search(&[1.0, 0.0, 0.0, 0.0], 5).await.unwrap();
        let rows = index
            .fetch_chunks(&hits.iter().map(|h| h.key).collect::<Vec<_>>())
            .unwrap();
        assert!(rows.iter().all(|r| r.document_name == "b.pdf"));

        // Deleting again is a no-op
        let report = index.delete_by_document_name("a.pdf").await.unwrap();
        assert_eq!(report, DeleteReport::default());
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_vectors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().to_path_buf();

        {
            let storage = Arc::new(StorageManager::new(path.clone(), 1024).unwrap());
            let index = IndexManager::new(storage, "documents", DIM, HnswParams::default());
            index.create_index().await.unwrap();
            index
                .bulk_index(vec![chunk("a.pdf", 0, "persisted text", 3)])
                .await
                .unwrap();
        }

        let storage = Arc::new(StorageManager::new(path, 1024).unwrap());
        let index = IndexManager::new(storage, "documents", DIM, HnswParams::default());
        index.create_index().await.unwrap();

        let hits = index.vector_search(&[0.0, 0.0, 0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(index.keyword_search("persisted", 1).await.unwrap().len(), 1);
    }

    fn manager_at(path: &std::path::Path) -> IndexManager {
        let storage = Arc::new(StorageManager::new(path.to_path_buf(), 1024).unwrap());
        IndexManager::new(storage, "documents", DIM, HnswParams::default())
    }

    #[tokio::test]
    async fn test_second_manager_searches_while_first_holds_writer() {
        let temp = TempDir::new().unwrap();
        let writer = manager_at(temp.path());
        writer.create_index().await.unwrap();
        writer
            .bulk_index(vec![chunk("a.pdf", 0, "shared revenue figures", 0)])
            .await
            .unwrap();

        let reader = manager_at(temp.path());
        reader.create_index().await.unwrap();
        let hits = reader.keyword_search("revenue", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(reader.vector_search(&[1.0, 0.0, 0.0, 0.0], 1).await.unwrap().len(), 1);

        // Later commits from the writer show up without reopening
        writer
            .bulk_index(vec![chunk("b.pdf", 0, "more revenue detail", 1)])
            .await
            .unwrap();
        assert_eq!(reader.keyword_search("revenue", 5).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_keyword_failure_removes_chunk_rows() {
        let temp = TempDir::new().unwrap();
        let holder = manager_at(temp.path());
        holder.create_index().await.unwrap();
        holder
            .bulk_index(vec![chunk("a.pdf", 0, "kept alpha text", 0)])
            .await
            .unwrap();

        let blocked = manager_at(temp.path());
        blocked.create_index().await.unwrap();
        let err = blocked
            .bulk_index(vec![
                chunk("b.pdf", 0, "blocked beta text", 1),
                chunk("b.pdf", 1, "blocked gamma text", 2),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, BodhiError::KeywordIndex(_)));

        let names = blocked.list_document_names().await.unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["a.pdf"]);
        let keys: Vec<u64> = blocked
            .vector_search(&[0.0, 1.0, 0.0, 0.0], 5)
            .await
            .unwrap()
            .iter()
            .map(|hit| hit.key)
            .collect();
        let rows = blocked.fetch_chunks(&keys).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].document_name, "a.pdf");
        assert!(blocked.keyword_search("blocked", 5).await.unwrap().is_empty());

        // Once the lock is free the same chunks go in cleanly
        drop(holder);
        let report = blocked
            .bulk_index(vec![chunk("b.pdf", 0, "blocked beta text", 1)])
            .await
            .unwrap();
        assert_eq!(report.indexed, vec!["b.pdf_0".to_string()]);
        assert_eq!(blocked.keyword_search("blocked", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_on_open() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(StorageManager::new(temp.path().to_path_buf(), 1024).unwrap());

        IndexManager::new(storage.clone(), "documents", DIM, HnswParams::default())
            .create_index()
            .await
            .unwrap();

        let err = IndexManager::new(storage, "documents", DIM + 1, HnswParams::default())
            .create_index()
            .await
            .unwrap_err();
        assert!(matches!(err, BodhiError::Config(_)));
    }
}
