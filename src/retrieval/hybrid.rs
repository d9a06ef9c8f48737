//! Hybrid search combining keyword and semantic search

use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::IndexManager;
use crate::retrieval::{
    reciprocal_rank_fusion, sort_by_score, FusionConfig, RetrievalResult, RetrievedChunk,
};
use ahash::AHashMap;
use std::sync::Arc;

/// Hybrid retriever over one index
#[derive(Clone)]
pub struct HybridRetriever {
    embedder: Arc<Embedder>,
    index: Arc<IndexManager>,
    fusion: FusionConfig,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<Embedder>, index: Arc<IndexManager>, fusion: FusionConfig) -> Self {
        Self {
            embedder,
            index,
            fusion,
        }
    }

    /// Retrieve up to `k` chunks for `query`
    ///
    /// With `use_hybrid` off the ranking is pure BM25 and the query is never
    /// embedded. An empty query yields an empty result.
    pub async fn retrieve(&self, query: &str, k: usize, use_hybrid: bool) -> Result<RetrievalResult> {
        let query = query.trim();
        if query.is_empty() || k == 0 {
            return Ok(RetrievalResult::empty(query));
        }

        let keyword_results: Vec<(u64, f32)> = self
            .index
            .keyword_search(query, k)
            .await?
            .into_iter()
            .map(|hit| (hit.key, hit.score))
            .collect();

        let mut ranked = if use_hybrid {
            let query_embedding = self.embedder.embed_query(query).await?;
            let semantic_results: Vec<(u64, f32)> = self
                .index
                .vector_search(&query_embedding, k)
                .await?
                .into_iter()
                .map(|hit| (hit.key, hit.score))
                .collect();

            tracing::debug!(
                "Query '{}': {} keyword hits, {} semantic hits",
                query,
                keyword_results.len(),
                semantic_results.len()
            );

            reciprocal_rank_fusion(&keyword_results, &semantic_results, &self.fusion)
        } else {
            tracing::debug!("Query '{}': {} keyword hits", query, keyword_results.len());

            let mut lexical = keyword_results;
            sort_by_score(&mut lexical);
            lexical
        };

        ranked.truncate(k);

        let chunks = self.hydrate(ranked)?;
        Ok(RetrievalResult {
            query: query.to_string(),
            hybrid: use_hybrid,
            chunks,
        })
    }

    /// Load chunk rows for ranked keys, keeping rank order
    fn hydrate(&self, ranked: Vec<(u64, f32)>) -> Result<Vec<RetrievedChunk>> {
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<u64> = ranked.iter().map(|(key, _)| *key).collect();
        let score_map: AHashMap<u64, f32> = ranked.into_iter().collect();

        let chunks = self
            .index
            .fetch_chunks(&keys)?
            .into_iter()
            .map(|row| RetrievedChunk {
                score: score_map.get(&row.key).copied().unwrap_or(0.0),
                key: row.key,
                doc_id: row.doc_id,
                document_name: row.document_name,
                text: row.text,
            })
            .collect();

        Ok(chunks)
    }
}
