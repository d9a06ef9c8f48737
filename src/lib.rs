//! Bodhi - conversational assistant over uploaded PDF documents
//!
//! Uploaded documents are chunked, embedded and written to a combined
//! keyword and vector index. Questions are answered by retrieving the most
//! relevant chunks with hybrid search and streaming a grounded answer from a
//! locally served language model.

pub mod chunking;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod retrieval;
pub mod services;
pub mod session;
pub mod storage;

pub use error::{BodhiError, Result};
