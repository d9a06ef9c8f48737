//! Storage layer for Bodhi
//!
//! Provides content-addressed blob storage for uploads and the SQLite
//! database backing the index store

pub mod blob;
pub mod database;

use crate::error::{BodhiError, Result};
use std::path::{Path, PathBuf};

pub use blob::{BlobStore, BlobWrite};
pub use database::{ChunkInsert, Database, DbPool, DbStats};

/// Storage manager that coordinates blob and database storage
pub struct StorageManager {
    pub blob_store: BlobStore,
    pub database: Database,
    base_path: PathBuf,
}

impl StorageManager {
    /// Create a new storage manager rooted at `base_path`
    ///
    /// Layout: `store/db.sqlite`, `store/blobs/`, `store/indexes/<name>/`.
    pub fn new(base_path: PathBuf, compression_threshold: usize) -> Result<Self> {
        let store = base_path.join("store");

        for dir in [store.clone(), store.join("indexes")] {
            std::fs::create_dir_all(&dir).map_err(|e| BodhiError::Io {
                source: e,
                context: format!("Failed to create storage directory: {}", dir.display()),
            })?;
        }

        let blob_store = BlobStore::new(store.clone(), compression_threshold)?;
        let database = Database::new(&store.join("db.sqlite"))?;

        Ok(Self {
            blob_store,
            database,
            base_path,
        })
    }

    /// Root of all persisted state
    pub fn store_dir(&self) -> PathBuf {
        self.base_path.join("store")
    }

    /// Directory holding the on-disk files of one index
    pub fn index_dir(&self, index_name: &str) -> PathBuf {
        self.store_dir().join("indexes").join(index_name)
    }

    /// Get combined storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            db: self.database.stats()?,
            blob_bytes: self.blob_store.total_size()?,
            store_bytes: blob::dir_size(&self.store_dir())?,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// Combined storage statistics
#[derive(Debug)]
pub struct StorageStats {
    pub db: DbStats,
    pub blob_bytes: u64,
    pub store_bytes: u64,
}

impl StorageStats {
    /// Format bytes as human-readable size
    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}
