/// HNSW vector index for similarity search
use ahash::AHashSet;
use hnsw_rs::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Search failed: {0}")]
    SearchError(String),
}

/// Search hit with chunk key and cosine similarity
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub key: u64,
    /// Cosine similarity (1.0 is identical direction)
    pub score: f32,
}

/// HNSW construction parameters
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Connections per layer (M)
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
        }
    }
}

const MAX_LAYERS: usize = 16;
const MIN_CAPACITY: usize = 10_000;

/// In-memory HNSW graph keyed by chunk key
///
/// The graph cannot drop points, so removed keys are tombstoned and filtered
/// out of results. The graph is rebuilt from the database on open, which
/// clears the tombstones.
pub struct VectorIndex {
    hnsw: Hnsw<'static, f32, DistCosine>,
    dimension: usize,
    params: HnswParams,
    inserted: usize,
    tombstones: AHashSet<u64>,
}

impl VectorIndex {
    pub fn new(dimension: usize, params: HnswParams) -> Self {
        Self::with_capacity(dimension, params, MIN_CAPACITY)
    }

    fn with_capacity(dimension: usize, params: HnswParams, capacity: usize) -> Self {
        let hnsw = Hnsw::<f32, DistCosine>::new(
            params.m,
            capacity.max(MIN_CAPACITY),
            MAX_LAYERS,
            params.ef_construction,
            DistCosine,
        );

        Self {
            hnsw,
            dimension,
            params,
            inserted: 0,
            tombstones: AHashSet::new(),
        }
    }

    /// Build a graph from stored `(key, vector)` pairs
    pub fn rebuild(
        dimension: usize,
        params: HnswParams,
        vectors: &[(u64, Vec<f32>)],
    ) -> Result<Self, VectorIndexError> {
        let mut index = Self::with_capacity(dimension, params, vectors.len());
        for (key, vector) in vectors {
            index.insert(*key, vector)?;
        }
        Ok(index)
    }

    pub fn insert(&mut self, key: u64, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        self.hnsw.insert_slice((vector, key as usize));
        self.inserted += 1;
        self.tombstones.remove(&key);

        Ok(())
    }

    /// Hide keys from future searches
    pub fn remove(&mut self, keys: &[u64]) {
        self.tombstones.extend(keys.iter().copied());
    }

    /// k nearest live neighbours, best first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        if query.iter().any(|v| !v.is_finite()) {
            return Err(VectorIndexError::SearchError(
                "Query vector contains non-finite values".to_string(),
            ));
        }

        // Oversample so tombstoned neighbours do not starve the result
        let wanted = (k + self.tombstones.len()).min(self.inserted);
        let ef = self.params.ef_search.max(wanted);

        let mut hits: Vec<VectorHit> = self
            .hnsw
            .search(query, wanted, ef)
            .into_iter()
            .map(|n| VectorHit {
                key: n.d_id as u64,
                score: 1.0 - n.distance,
            })
            .filter(|hit| !self.tombstones.contains(&hit.key))
            .collect();

        hits.truncate(k);
        Ok(hits)
    }

    /// Number of live vectors
    pub fn len(&self) -> usize {
        self.inserted.saturating_sub(self.tombstones.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
