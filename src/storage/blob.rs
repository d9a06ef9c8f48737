//! Content-addressed storage for uploaded files
//!
//! Uploads are named by their BLAKE3 hash, so re-uploading identical bytes
//! under another document name stores them once.

use crate::error::{BodhiError, Result};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Result of writing a blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobWrite {
    pub hash: String,
    pub compressed: bool,
    pub is_new: bool,
}

/// Content-addressed blob storage
pub struct BlobStore {
    base_path: PathBuf,
    compression_threshold: usize,
}

fn io_err(context: String) -> impl FnOnce(std::io::Error) -> BodhiError {
    move |source| BodhiError::Io { source, context }
}

impl BlobStore {
    /// Create a new blob store at the given base path
    pub fn new(base_path: PathBuf, compression_threshold: usize) -> Result<Self> {
        let blobs_dir = base_path.join("blobs");
        fs::create_dir_all(&blobs_dir).map_err(io_err(format!(
            "Failed to create blobs directory: {}",
            blobs_dir.display()
        )))?;

        Ok(Self {
            base_path,
            compression_threshold,
        })
    }

    /// Write data to blob storage
    pub fn write(&self, data: &[u8]) -> Result<BlobWrite> {
        let hash = Self::hash_data(data);

        let blob_path = self.blob_path(&hash);
        if blob_path.exists() {
            return Ok(BlobWrite {
                hash,
                compressed: false,
                is_new: false,
            });
        }

        let compressed = data.len() >= self.compression_threshold;
        let payload = if compressed {
            zstd::encode_all(data, 3)
                .map_err(io_err("Failed to compress blob data".to_string()))?
        } else {
            data.to_vec()
        };

        let parent = blob_path
            .parent()
            .ok_or_else(|| BodhiError::Config("Invalid blob path".to_string()))?;
        fs::create_dir_all(parent).map_err(io_err(format!(
            "Failed to create blob directory: {}",
            parent.display()
        )))?;

        // Write to a temp file, then rename into place
        let temp_path = blob_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).map_err(io_err(format!(
            "Failed to create temp blob file: {}",
            temp_path.display()
        )))?;
        file.write_all(&payload).map_err(io_err(format!(
            "Failed to write blob data: {}",
            temp_path.display()
        )))?;
        file.sync_all().map_err(io_err(format!(
            "Failed to sync blob file: {}",
            temp_path.display()
        )))?;
        drop(file);

        fs::rename(&temp_path, &blob_path).map_err(io_err(format!(
            "Failed to move blob into place: {}",
            blob_path.display()
        )))?;

        Ok(BlobWrite {
            hash,
            compressed,
            is_new: true,
        })
    }

    /// Read data from blob storage
    pub fn read(&self, hash: &str) -> Result<Vec<u8>> {
        let blob_path = self.blob_path(hash);

        if !blob_path.exists() {
            return Err(BodhiError::Config(format!("Blob not found: {}", hash)));
        }

        let data = fs::read(&blob_path).map_err(io_err(format!(
            "Failed to read blob file: {}",
            blob_path.display()
        )))?;

        // Uncompressed blobs fail to decode and are returned as-is
        match zstd::decode_all(&data[..]) {
            Ok(decompressed) => Ok(decompressed),
            Err(_) => Ok(data),
        }
    }

    /// Check if a blob exists
    pub fn exists(&self, hash: &str) -> bool {
        self.blob_path(hash).exists()
    }

    /// Delete a blob; callers check that no document still references it
    pub fn delete(&self, hash: &str) -> Result<()> {
        let blob_path = self.blob_path(hash);
        if blob_path.exists() {
            fs::remove_file(&blob_path).map_err(io_err(format!(
                "Failed to delete blob: {}",
                blob_path.display()
            )))?;
        }
        Ok(())
    }

    /// Total bytes used by stored blobs
    pub fn total_size(&self) -> Result<u64> {
        dir_size(&self.base_path.join("blobs"))
    }

    fn hash_data(data: &[u8]) -> String {
        let hash = blake3::hash(data);
        format!("{:.32}", hash.to_hex())
    }

    /// Two-level sharding: blobs/ab/cd/abcdef123456...
    fn blob_path(&self, hash: &str) -> PathBuf {
        let shard1 = hash.get(0..2).unwrap_or("__");
        let shard2 = hash.get(2..4).unwrap_or("__");
        self.base_path
            .join("blobs")
            .join(shard1)
            .join(shard2)
            .join(hash)
    }
}

pub(crate) fn dir_size(path: &std::path::Path) -> Result<u64> {
    let mut size = 0u64;

    if path.is_dir() {
        let entries = fs::read_dir(path).map_err(io_err(format!(
            "Failed to read directory for size calculation: {}",
            path.display()
        )))?;

        for entry in entries {
            let entry = entry.map_err(io_err("Failed to read directory entry".to_string()))?;
            let path = entry.path();

            if path.is_dir() {
                size += dir_size(&path)?;
            } else if let Ok(metadata) = entry.metadata() {
                size += metadata.len();
            }
        }
    }

    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_blob_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = BlobStore::new(temp_dir.path().to_path_buf(), 1024).unwrap();

        let data = b"%PDF-1.4 tiny";
        let written = store.write(data).unwrap();

        assert!(written.is_new);
        assert!(!written.compressed);
        assert_eq!(store.read(&written.hash).unwrap(), data);
    }

    #[test]
    fn test_blob_deduplication() {
        let temp_dir = TempDir::new().unwrap();
        let store = BlobStore::new(temp_dir.path().to_path_buf(), 1024).unwrap();

        let first = store.write(b"same bytes").unwrap();
        let second = store.write(b"same bytes").unwrap();

        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn test_blob_compression() {
        let temp_dir = TempDir::new().unwrap();
        let store = BlobStore::new(temp_dir.path().to_path_buf(), 10).unwrap();

        let data = vec![b'A'; 2000];
        let written = store.write(&data).unwrap();

        assert!(written.compressed);
        assert_eq!(store.read(&written.hash).unwrap(), data);
        assert!(store.total_size().unwrap() < 2000);
    }

    #[test]
    fn test_blob_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = BlobStore::new(temp_dir.path().to_path_buf(), 1024).unwrap();

        let written = store.write(b"to be removed").unwrap();
        assert!(store.exists(&written.hash));

        store.delete(&written.hash).unwrap();
        assert!(!store.exists(&written.hash));
        assert!(store.read(&written.hash).is_err());
    }

    #[test]
    fn test_blob_path_sharding() {
        let temp_dir = TempDir::new().unwrap();
        let store = BlobStore::new(temp_dir.path().to_path_buf(), 1024).unwrap();

        let path = store.blob_path("abcdef1234567890");
        let path_str = path.to_str().unwrap();
        assert!(path_str.contains("/blobs/ab/cd/"));
    }
}
