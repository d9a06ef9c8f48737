//! Shared fixtures for integration tests
//!
//! A deterministic bag-of-words embedder, a scripted responder and a plain
//! text extractor stand in for the model download, the Ollama server and
//! PDF parsing.
#![allow(dead_code)]

use async_trait::async_trait;
use bodhi::config::Config;
use bodhi::embedding::{Embedder, EmbeddingError, EmbeddingProvider};
use bodhi::error::{BodhiError, Result};
use bodhi::ingest::{TextExtractor, UploadedDocument};
use bodhi::llm::{ChatMessage, FragmentStream, Responder};
use bodhi::services::Services;
use bodhi::storage::StorageManager;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const DIM: usize = 64;

/// Hashes each lowercase word into one of `DIM` buckets, then L2-normalizes
pub struct HashingEmbedder;

impl HashingEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&hash.as_bytes()[..8]);
            v[(u64::from_le_bytes(bytes) % DIM as u64) as usize] += 1.0;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            v[0] = 1.0;
        } else {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        Ok(Self::vector(text))
    }

    fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "hashing-bow"
    }
}

/// Embeds passages fine but fails every query
pub struct QueryFailingEmbedder;

impl EmbeddingProvider for QueryFailingEmbedder {
    fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::GenerationError("embedding backend offline".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        HashingEmbedder.embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "query-failing"
    }
}

/// Replays a fixed fragment script for every chat request
pub struct ScriptedResponder {
    fragments: Vec<std::result::Result<serde_json::Value, String>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
    pulls: Mutex<usize>,
}

impl ScriptedResponder {
    /// Answers with `parts` as content deltas followed by a final fragment
    pub fn answering(parts: &[&str]) -> Self {
        let mut fragments: Vec<_> = parts.iter().map(|p| delta(p)).collect();
        fragments.push(Ok(json!({ "done": true })));
        Self::with_fragments(fragments)
    }

    /// `Err("bad")` becomes a malformed fragment, any other `Err` a fatal one
    pub fn with_fragments(fragments: Vec<std::result::Result<serde_json::Value, String>>) -> Self {
        Self {
            fragments,
            prompts: Mutex::new(Vec::new()),
            pulls: Mutex::new(0),
        }
    }

    /// Messages of every chat request so far
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn pulls(&self) -> usize {
        *self.pulls.lock().unwrap()
    }
}

pub fn delta(text: &str) -> std::result::Result<serde_json::Value, String> {
    Ok(json!({ "message": { "role": "assistant", "content": text }, "done": false }))
}

#[async_trait]
impl Responder for ScriptedResponder {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn ensure_model_pulled(&self) -> Result<()> {
        *self.pulls.lock().unwrap() += 1;
        Ok(())
    }

    fn stream_chat(&self, messages: Vec<ChatMessage>, _temperature: f32) -> FragmentStream<'_> {
        self.prompts.lock().unwrap().push(messages);
        let items: Vec<Result<serde_json::Value>> = self
            .fragments
            .iter()
            .map(|f| match f {
                Ok(v) => Ok(v.clone()),
                Err(m) if m == "bad" => Err(BodhiError::StreamFormat(m.clone())),
                Err(m) => Err(BodhiError::Generation(m.clone())),
            })
            .collect();
        Box::pin(futures::stream::iter(items))
    }
}

/// Treats uploads as UTF-8 text; anything else fails extraction
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, name: &str, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| BodhiError::Extraction {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

pub fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = temp.path().to_path_buf();
    config.index.vector_dim = DIM;
    config
}

pub async fn services_with(
    temp: &TempDir,
    provider: Arc<dyn EmbeddingProvider>,
    responder: Arc<dyn Responder>,
) -> Services {
    let config = test_config(temp);
    let storage = Arc::new(StorageManager::new(temp.path().to_path_buf(), 64 * 1024).unwrap());

    Services::with_components(
        config,
        storage,
        Arc::new(Embedder::from_provider(provider)),
        responder,
        Arc::new(PlainTextExtractor),
    )
    .await
    .unwrap()
}

pub async fn services(temp: &TempDir, responder: Arc<dyn Responder>) -> Services {
    services_with(temp, Arc::new(HashingEmbedder), responder).await
}

pub fn text_upload(name: &str, text: &str) -> UploadedDocument {
    UploadedDocument::new(name, text.as_bytes().to_vec())
}

/// `n` chars of filler text made of distinct words
pub fn filler(prefix: &str, n: usize) -> String {
    let mut out = String::new();
    let mut i = 0;
    while out.len() < n {
        out.push_str(&format!("{}{} ", prefix, i));
        i += 1;
    }
    out.truncate(n);
    out
}
