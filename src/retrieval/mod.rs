//! Hybrid retrieval
//!
//! Keyword (BM25) and semantic (HNSW) hits are fused with Reciprocal Rank
//! Fusion into one ranked list of chunks.

mod fusion;
mod hybrid;

pub use fusion::{reciprocal_rank_fusion, sort_by_score, FusionConfig};
pub use hybrid::HybridRetriever;

use serde::Serialize;

/// A chunk with its relevance score for one query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    #[serde(skip)]
    pub key: u64,
    pub doc_id: String,
    pub document_name: String,
    pub text: String,
    pub score: f32,
}

/// Ranked chunks for one query, best first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub hybrid: bool,
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            hybrid: false,
            chunks: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn document_names(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(|c| c.document_name.as_str())
    }
}
