//! Ollama chat responder
use crate::error::{BodhiError, Result};
use crate::llm::{ChatMessage, FragmentStream, Responder};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Responder backed by a local Ollama server
pub struct OllamaResponder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    request_timeout: Duration,
    pulled: OnceCell<()>,
}

impl OllamaResponder {
    pub fn new(base_url: &str, model: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| BodhiError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            request_timeout,
            pulled: OnceCell::new(),
        })
    }

    fn unavailable(&self, reason: impl Into<String>) -> BodhiError {
        BodhiError::ModelUnavailable {
            model: self.model.clone(),
            reason: reason.into(),
        }
    }

    /// Whether the server already has the model
    async fn has_model(&self) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.request_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.unavailable(format!("Cannot reach Ollama: {}", e)))?;

        let tags: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| self.unavailable(format!("Invalid /api/tags response: {}", e)))?;

        Ok(model_listed(&tags, &self.model))
    }

    async fn pull(&self) -> Result<()> {
        tracing::info!("Pulling model {} (this may take a while)", self.model);

        let resp = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .json(&json!({ "model": self.model, "stream": false }))
            .send()
            .await
            .map_err(|e| self.unavailable(format!("Pull request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("Pull failed ({}): {}", status, body)));
        }

        let status: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| self.unavailable(format!("Invalid /api/pull response: {}", e)))?;

        if let Some(error) = status.get("error").and_then(|v| v.as_str()) {
            return Err(self.unavailable(error.to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl Responder for OllamaResponder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn ensure_model_pulled(&self) -> Result<()> {
        self.pulled
            .get_or_try_init(|| async {
                if self.has_model().await? {
                    tracing::debug!("Model {} already available", self.model);
                    return Ok(());
                }

                self.pull().await?;

                if self.has_model().await? {
                    tracing::info!("Model {} pulled", self.model);
                    Ok(())
                } else {
                    Err(self.unavailable("Model still missing after pull"))
                }
            })
            .await?;

        Ok(())
    }

    fn stream_chat(&self, messages: Vec<ChatMessage>, temperature: f32) -> FragmentStream<'_> {
        Box::pin(async_stream::stream! {
            let body = json!({
                "model": self.model,
                "messages": messages,
                "stream": true,
                "options": { "temperature": temperature },
            });

            let resp = match self
                .client
                .post(format!("{}/api/chat", self.base_url))
                .json(&body)
                .send()
                .await
            {
                Ok(r) if !r.status().is_success() => {
                    let status = r.status();
                    let body_text = r.text().await.unwrap_or_default();
                    yield Err(BodhiError::Generation(format!("{}: {}", status, body_text)));
                    return;
                }
                Ok(r) => r,
                Err(e) => {
                    yield Err(BodhiError::Generation(e.to_string()));
                    return;
                }
            };

            let mut byte_stream = resp.bytes_stream();
            let mut lines = LineBuffer::default();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(BodhiError::Generation(e.to_string()));
                        return;
                    }
                };

                for line in lines.push(&chunk) {
                    match parse_fragment(&line) {
                        Some(Err(e)) if !e.is_recoverable() => {
                            yield Err(e);
                            return;
                        }
                        Some(item) => yield item,
                        None => {}
                    }
                }
            }

            if let Some(line) = lines.finish() {
                if let Some(item) = parse_fragment(&line) {
                    yield item;
                }
            }
        })
    }
}

/// Whether `/api/tags` lists `model` (an untagged name means `:latest`)
fn model_listed(tags: &serde_json::Value, model: &str) -> bool {
    let wanted_latest = format!("{}:latest", model);
    tags.get("models")
        .and_then(|m| m.as_array())
        .map(|models| {
            models.iter().any(|entry| {
                ["name", "model"].iter().any(|field| {
                    entry
                        .get(field)
                        .and_then(|v| v.as_str())
                        .is_some_and(|name| name == model || name == wanted_latest)
                })
            })
        })
        .unwrap_or(false)
}

/// Decode one NDJSON line; `None` for blank lines
fn parse_fragment(line: &[u8]) -> Option<Result<serde_json::Value>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            return Some(Err(BodhiError::StreamFormat(format!(
                "Undecodable fragment ({}): {}",
                e, text
            ))))
        }
    };

    if let Some(error) = value.get("error") {
        let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
        return Some(Err(BodhiError::Generation(message)));
    }

    Some(Ok(value))
}

/// Splits a byte stream into lines without breaking multi-byte characters
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    fn finish(self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf)
        }
    }
}
