/// Tantivy keyword index for full-text search
use regex::Regex;
use std::path::PathBuf;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};
use thiserror::Error;

const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),

    #[error("Query parsing error: {0}")]
    QueryParseError(String),
}

/// Search hit with the chunk key and its BM25 score
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub key: u64,
    pub score: f32,
}

/// Tantivy keyword index wrapper
///
/// Fields: `key` (link to the chunk row), `doc_id` and `document_name`
/// (exact-match terms), `text` (analyzed for BM25).
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    /// Taken on the first write; holding it locks the directory
    writer: Option<IndexWriter>,
    key_field: Field,
    doc_id_field: Field,
    text_field: Field,
    document_name_field: Field,
    word_pattern: Regex,
}

impl KeywordIndex {
    /// Open the index at `index_path`, creating it if absent
    pub fn open_or_create(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        if index_path.join("meta.json").exists() {
            Self::load(index_path)
        } else {
            Self::create(index_path)
        }
    }

    fn schema() -> Schema {
        let mut schema_builder = Schema::builder();
        schema_builder.add_u64_field("key", INDEXED | STORED);
        schema_builder.add_text_field("doc_id", STRING | STORED);
        schema_builder.add_text_field("text", TEXT);
        schema_builder.add_text_field("document_name", STRING | STORED);
        schema_builder.build()
    }

    fn create(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        std::fs::create_dir_all(&index_path)?;

        let index = Index::create_in_dir(&index_path, Self::schema())
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Self::from_index(index)
    }

    fn load(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        let index = Index::open_in_dir(&index_path)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Self::from_index(index)
    }

    fn from_index(index: Index) -> Result<Self, KeywordIndexError> {
        let schema = index.schema();
        let field = |name: &str| {
            schema.get_field(name).map_err(|_| {
                KeywordIndexError::InitializationError(format!(
                    "Missing '{}' field in schema",
                    name
                ))
            })
        };

        let key_field = field("key")?;
        let doc_id_field = field("doc_id")?;
        let text_field = field("text")?;
        let document_name_field = field("document_name")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        let word_pattern = Regex::new(r"[\p{L}\p{N}]+")
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: None,
            key_field,
            doc_id_field,
            text_field,
            document_name_field,
            word_pattern,
        })
    }

    fn writer(&mut self) -> Result<&mut IndexWriter, KeywordIndexError> {
        if self.writer.is_none() {
            let writer = self
                .index
                .writer(WRITER_HEAP_BYTES)
                .map_err(|e| KeywordIndexError::InsertError(format!("Index is locked: {}", e)))?;
            self.writer = Some(writer);
        }

        self.writer
            .as_mut()
            .ok_or_else(|| KeywordIndexError::InsertError("Writer unavailable".to_string()))
    }

    /// Stage a chunk for indexing; visible to search after `commit`
    pub fn insert(
        &mut self,
        key: u64,
        doc_id: &str,
        text: &str,
        document_name: &str,
    ) -> Result<(), KeywordIndexError> {
        let doc = doc!(
            self.key_field => key,
            self.doc_id_field => doc_id,
            self.text_field => text,
            self.document_name_field => document_name,
        );

        self.writer()?
            .add_document(doc)
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        Ok(())
    }

    /// Stage removal of every chunk belonging to `document_name`
    pub fn delete_document(&mut self, document_name: &str) -> Result<(), KeywordIndexError> {
        let term = Term::from_field_text(self.document_name_field, document_name);
        self.writer()?.delete_term(term);
        Ok(())
    }

    /// Commit pending changes and refresh the reader
    pub fn commit(&mut self) -> Result<(), KeywordIndexError> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .commit()
                .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        }

        self.refresh()
    }

    /// Drop changes staged since the last commit
    pub fn rollback(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.rollback() {
                tracing::warn!("Keyword index rollback failed: {}", e);
            }
        }
    }

    /// Pick up commits made by this or another process
    pub fn refresh(&self) -> Result<(), KeywordIndexError> {
        self.reader
            .reload()
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))
    }

    /// Keyword match against `text`
    ///
    /// The query is reduced to its word tokens and matched with OR semantics,
    /// so user input never trips the query syntax. Returns an empty list when
    /// the query has no words.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<KeywordHit>, KeywordIndexError> {
        let Some(query) = match_query(&self.word_pattern, query) else {
            return Ok(Vec::new());
        };

        if limit == 0 {
            return Ok(Vec::new());
        }

        self.refresh()?;
        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let query = query_parser
            .parse_query(&query)
            .map_err(|e| KeywordIndexError::QueryParseError(e.to_string()))?;

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved_doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let key = retrieved_doc
                .get_first(self.key_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid key field".to_string())
                })?;

            hits.push(KeywordHit { key, score });
        }

        Ok(hits)
    }

    /// Number of committed documents
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turn free text into a parser-safe disjunction of its words
fn match_query(word: &Regex, query: &str) -> Option<String> {
    let terms: Vec<String> = word
        .find_iter(query)
        .map(|m| m.as_str().to_lowercase())
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}
