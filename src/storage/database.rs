//! SQLite database management with migrations
//!
//! Source of truth for index registrations, the uploaded-document registry
//! and chunk rows (text plus embedding). The keyword and vector indexes are
//! derived from the rows stored here.

use crate::error::{BodhiError, Result};
use crate::index::{Chunk, DocumentBucket, IndexedChunk};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Outcome of inserting one chunk row
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkInsert {
    /// Row written; carries the internal key shared with the search indexes
    Inserted(u64),
    /// Row refused by a store constraint
    Rejected(String),
}

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BodhiError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| {
                BodhiError::StoreConnection(format!("Failed to create connection pool: {}", e))
            })?;

        {
            let conn = pool.get().map_err(|e| {
                BodhiError::StoreConnection(format!("Failed to get connection: {}", e))
            })?;

            // WAL is a database-level setting, once is enough
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                ",
            )?;
        }

        let db = Self { pool };

        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| BodhiError::StoreConnection(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Register an index by name. Returns `false` if it was already registered.
    pub fn register_index(&self, name: &str, vector_dim: usize) -> Result<bool> {
        let conn = self.get_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO indexes (name, vector_dim, created_at) VALUES (?1, ?2, ?3)",
            params![name, vector_dim as i64, chrono::Utc::now().timestamp()],
        )?;
        Ok(inserted == 1)
    }

    /// Vector dimension of a registered index
    pub fn index_dimension(&self, name: &str) -> Result<Option<usize>> {
        let conn = self.get_conn()?;
        let dim: Option<i64> = conn
            .query_row(
                "SELECT vector_dim FROM indexes WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(dim.map(|d| d as usize))
    }

    /// Insert chunk rows in one transaction
    ///
    /// A row that violates a constraint is reported and skipped; the other
    /// rows are still committed.
    pub fn insert_chunks(&self, index: &str, chunks: &[&Chunk]) -> Result<Vec<ChunkInsert>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let mut outcomes = Vec::with_capacity(chunks.len());

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (index_name, doc_id, document_name, text, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for chunk in chunks {
                let result = stmt.execute(params![
                    index,
                    chunk.doc_id,
                    chunk.document_name,
                    chunk.text,
                    encode_vector(&chunk.embedding),
                ]);

                match result {
                    Ok(_) => outcomes.push(ChunkInsert::Inserted(tx.last_insert_rowid() as u64)),
                    Err(rusqlite::Error::SqliteFailure(err, msg))
                        if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        outcomes.push(ChunkInsert::Rejected(
                            msg.unwrap_or_else(|| "constraint violation".to_string()),
                        ));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        tx.commit()?;
        Ok(outcomes)
    }

    /// Delete every chunk of a document, returning the removed keys
    pub fn delete_chunks_by_document(&self, index: &str, document_name: &str) -> Result<Vec<u64>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let keys = {
            let mut stmt =
                tx.prepare("SELECT key FROM chunks WHERE index_name = ?1 AND document_name = ?2")?;
            let rows = stmt.query_map(params![index, document_name], |row| row.get::<_, i64>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        tx.execute(
            "DELETE FROM chunks WHERE index_name = ?1 AND document_name = ?2",
            params![index, document_name],
        )?;
        tx.commit()?;

        Ok(keys.into_iter().map(|k| k as u64).collect())
    }

    /// Delete chunk rows by key, returning how many were removed
    pub fn delete_chunks_by_keys(&self, index: &str, keys: &[u64]) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM chunks WHERE index_name = ?1 AND key = ?2")?;
            for key in keys {
                removed += stmt.execute(params![index, *key as i64])?;
            }
        }
        tx.commit()?;

        Ok(removed)
    }

    /// Terms aggregation over `document_name`
    pub fn document_buckets(&self, index: &str) -> Result<Vec<DocumentBucket>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT document_name, COUNT(*) AS doc_count, MIN(key) AS first_key
             FROM chunks WHERE index_name = ?1
             GROUP BY document_name
             ORDER BY first_key",
        )?;

        let buckets = stmt
            .query_map(params![index], |row| {
                Ok(DocumentBucket {
                    name: row.get(0)?,
                    chunk_count: row.get::<_, i64>(1)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(buckets)
    }

    /// Fetch chunk rows by key, in the order of `keys`. Unknown keys are skipped.
    pub fn get_chunks(&self, index: &str, keys: &[u64]) -> Result<Vec<IndexedChunk>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, doc_id, document_name, text FROM chunks
             WHERE index_name = ?1 AND key = ?2",
        )?;

        let mut chunks = Vec::with_capacity(keys.len());
        for key in keys {
            let chunk = stmt
                .query_row(params![index, *key as i64], |row| {
                    Ok(IndexedChunk {
                        key: row.get::<_, i64>(0)? as u64,
                        doc_id: row.get(1)?,
                        document_name: row.get(2)?,
                        text: row.get(3)?,
                    })
                })
                .optional()?;

            if let Some(chunk) = chunk {
                chunks.push(chunk);
            }
        }

        Ok(chunks)
    }

    /// All stored vectors of an index, used to rebuild the ANN graph
    pub fn all_vectors(&self, index: &str) -> Result<Vec<(u64, Vec<f32>)>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, embedding FROM chunks WHERE index_name = ?1 ORDER BY key")?;

        let vectors = stmt
            .query_map(params![index], |row| {
                let key: i64 = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((key as u64, decode_vector(&blob)))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(vectors)
    }

    /// Reserve a document name. Returns `false` if the name is already taken.
    pub fn claim_document(&self, index: &str, name: &str, blob_hash: Option<&str>) -> Result<bool> {
        let conn = self.get_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO documents (index_name, name, blob_hash, uploaded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![index, name, blob_hash, chrono::Utc::now().timestamp()],
        )?;
        Ok(inserted == 1)
    }

    /// Drop a document registration, returning the blob it referenced
    pub fn release_document(&self, index: &str, name: &str) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let blob_hash: Option<Option<String>> = conn
            .query_row(
                "SELECT blob_hash FROM documents WHERE index_name = ?1 AND name = ?2",
                params![index, name],
                |row| row.get(0),
            )
            .optional()?;

        conn.execute(
            "DELETE FROM documents WHERE index_name = ?1 AND name = ?2",
            params![index, name],
        )?;

        Ok(blob_hash.flatten())
    }

    /// Blob a registered document points at
    pub fn document_blob(&self, index: &str, name: &str) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let blob_hash: Option<Option<String>> = conn
            .query_row(
                "SELECT blob_hash FROM documents WHERE index_name = ?1 AND name = ?2",
                params![index, name],
                |row| row.get(0),
            )
            .optional()?;

        Ok(blob_hash.flatten())
    }

    /// Number of registered documents still pointing at a blob
    pub fn blob_references(&self, hash: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE blob_hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let index_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM indexes", [], |row| row.get(0))?;

        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;

        let chunk_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;

        Ok(DbStats {
            index_count: index_count as usize,
            document_count: document_count as usize,
            chunk_count: chunk_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub index_count: usize,
    pub document_count: usize,
    pub chunk_count: usize,
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Registered indexes
    CREATE TABLE indexes (
        name TEXT PRIMARY KEY,
        vector_dim INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    );

    -- Uploaded documents; the primary key closes the duplicate-upload race
    CREATE TABLE documents (
        index_name TEXT NOT NULL,
        name TEXT NOT NULL,
        blob_hash TEXT,
        uploaded_at INTEGER NOT NULL,
        PRIMARY KEY (index_name, name),
        FOREIGN KEY (index_name) REFERENCES indexes(name) ON DELETE CASCADE
    );

    CREATE INDEX idx_documents_blob ON documents(blob_hash);

    -- Chunks (retrieval units)
    CREATE TABLE chunks (
        key INTEGER PRIMARY KEY AUTOINCREMENT,
        index_name TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        document_name TEXT NOT NULL,
        text TEXT NOT NULL,
        embedding BLOB NOT NULL,
        UNIQUE (index_name, doc_id),
        FOREIGN KEY (index_name) REFERENCES indexes(name) ON DELETE CASCADE
    );

    CREATE INDEX idx_chunks_document ON chunks(index_name, document_name);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(doc_id: &str, document_name: &str) -> Chunk {
        Chunk {
            doc_id: doc_id.to_string(),
            text: format!("text of {}", doc_id),
            embedding: vec![0.5, -0.25, 1.0],
            document_name: document_name.to_string(),
        }
    }

    fn test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
        db.register_index("documents", 3).unwrap();
        (db, temp_dir)
    }

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let _db = Database::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations() {
        let (db, _temp) = test_db();
        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();

        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_schema_exists() {
        let (db, _temp) = test_db();
        let conn = db.get_conn().unwrap();

        for table in ["indexes", "documents", "chunks"] {
            let count: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();

            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let (db, _temp) = test_db();
        let conn = db.get_conn().unwrap();

        let fk_enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();

        assert_eq!(fk_enabled, 1);
    }

    #[test]
    fn test_register_index_is_idempotent() {
        let (db, _temp) = test_db();
        assert!(!db.register_index("documents", 3).unwrap());
        assert_eq!(db.index_dimension("documents").unwrap(), Some(3));
        assert_eq!(db.index_dimension("missing").unwrap(), None);
    }

    #[test]
    fn test_duplicate_doc_id_rejected_without_aborting_batch() {
        let (db, _temp) = test_db();
        let a = chunk("a.pdf_0", "a.pdf");
        let b = chunk("a.pdf_1", "a.pdf");

        db.insert_chunks("documents", &[&a]).unwrap();
        let outcomes = db.insert_chunks("documents", &[&a, &b]).unwrap();

        assert!(matches!(outcomes[0], ChunkInsert::Rejected(_)));
        assert!(matches!(outcomes[1], ChunkInsert::Inserted(_)));
        assert_eq!(db.stats().unwrap().chunk_count, 2);
    }

    #[test]
    fn test_vectors_round_trip_through_blob() {
        let (db, _temp) = test_db();
        let a = chunk("a.pdf_0", "a.pdf");
        db.insert_chunks("documents", &[&a]).unwrap();

        let vectors = db.all_vectors("documents").unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].1, vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn test_document_buckets_and_delete() {
        let (db, _temp) = test_db();
        let chunks = [
            chunk("a.pdf_0", "a.pdf"),
            chunk("a.pdf_1", "a.pdf"),
            chunk("b.pdf_0", "b.pdf"),
        ];
        let refs: Vec<&Chunk> = chunks.iter().collect();
        db.insert_chunks("documents", &refs).unwrap();

        let buckets = db.document_buckets("documents").unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].name, "a.pdf");
        assert_eq!(buckets[0].chunk_count, 2);

        let removed = db.delete_chunks_by_document("documents", "a.pdf").unwrap();
        assert_eq!(removed.len(), 2);

        let buckets = db.document_buckets("documents").unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].name, "b.pdf");
    }

    #[test]
    fn test_get_chunks_preserves_requested_order() {
        let (db, _temp) = test_db();
        let chunks = [chunk("a.pdf_0", "a.pdf"), chunk("a.pdf_1", "a.pdf")];
        let refs: Vec<&Chunk> = chunks.iter().collect();
        let keys: Vec<u64> = db
            .insert_chunks("documents", &refs)
            .unwrap()
            .into_iter()
            .filter_map(|o| match o {
                ChunkInsert::Inserted(k) => Some(k),
                ChunkInsert::Rejected(_) => None,
            })
            .collect();

        let fetched = db
            .get_chunks("documents", &[keys[1], 9999, keys[0]])
            .unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].doc_id, "a.pdf_1");
        assert_eq!(fetched[1].doc_id, "a.pdf_0");
    }

    #[test]
    fn test_document_claims() {
        let (db, _temp) = test_db();
        assert!(db.claim_document("documents", "a.pdf", Some("abcd")).unwrap());
        assert!(!db.claim_document("documents", "a.pdf", None).unwrap());
        assert_eq!(db.blob_references("abcd").unwrap(), 1);

        let released = db.release_document("documents", "a.pdf").unwrap();
        assert_eq!(released.as_deref(), Some("abcd"));
        assert_eq!(db.blob_references("abcd").unwrap(), 0);
        assert!(db.claim_document("documents", "a.pdf", None).unwrap());
    }

    #[test]
    fn test_delete_chunks_by_keys() {
        let (db, _temp) = test_db();
        let chunks = [chunk("a.pdf_0", "a.pdf"), chunk("b.pdf_0", "b.pdf")];
        let refs: Vec<&Chunk> = chunks.iter().collect();
        let outcomes = db.insert_chunks("documents", &refs).unwrap();
        let ChunkInsert::Inserted(b_key) = outcomes[1] else {
            panic!("b.pdf_0 should insert");
        };

        assert_eq!(db.delete_chunks_by_keys("documents", &[b_key, 9999]).unwrap(), 1);
        let buckets = db.document_buckets("documents").unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].name, "a.pdf");

        // The doc_id is free again
        let outcomes = db.insert_chunks("documents", &[&chunks[1]]).unwrap();
        assert!(matches!(outcomes[0], ChunkInsert::Inserted(_)));
    }

    #[test]
    fn test_document_blob_lookup() {
        let (db, _temp) = test_db();
        db.claim_document("documents", "a.pdf", Some("abcd")).unwrap();
        db.claim_document("documents", "b.pdf", None).unwrap();

        assert_eq!(db.document_blob("documents", "a.pdf").unwrap().as_deref(), Some("abcd"));
        assert_eq!(db.document_blob("documents", "b.pdf").unwrap(), None);
        assert_eq!(db.document_blob("documents", "missing.pdf").unwrap(), None);
    }
}
