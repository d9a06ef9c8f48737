//! Streaming text generation
//!
//! - `Responder` trait for the external generation service
//! - `OllamaResponder` talking to a local Ollama server
//! - `prompt` assembles role-tagged messages from context and history
//! - `ResponseStreamer` turns raw fragments into answer text

mod ollama;
pub mod prompt;
mod streamer;

pub use ollama::OllamaResponder;
pub use prompt::{build_prompt, ChatMessage, MessageRole};
pub use streamer::{ResponseStreamer, TextStream};

use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Raw fragments as produced by a responder, in arrival order
pub type FragmentStream<'a> =
    Pin<Box<dyn Stream<Item = Result<serde_json::Value>> + Send + 'a>>;

/// External streaming text generator
#[async_trait]
pub trait Responder: Send + Sync {
    /// Model identifier (e.g. "llama3.2:1b")
    fn model_name(&self) -> &str;

    /// Make sure the model is available locally, pulling it if needed
    async fn ensure_model_pulled(&self) -> Result<()>;

    /// Start a streamed chat completion
    ///
    /// Transport failures end the stream with `Generation`; fragments that
    /// cannot be decoded are yielded as `StreamFormat` errors and the stream
    /// carries on. Dropping the stream abandons the request.
    fn stream_chat(&self, messages: Vec<ChatMessage>, temperature: f32) -> FragmentStream<'_>;

    /// Text delta carried by a fragment
    fn delta_text<'f>(&self, fragment: &'f serde_json::Value) -> Option<&'f str> {
        fragment.pointer("/message/content")?.as_str()
    }

    /// Whether the fragment marks the end of the answer
    fn is_final(&self, fragment: &serde_json::Value) -> bool {
        fragment.get("done").and_then(|v| v.as_bool()) == Some(true)
    }
}
