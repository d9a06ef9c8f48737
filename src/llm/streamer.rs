//! Turns responder fragments into answer text
use crate::error::Result;
use crate::llm::{build_prompt, Responder};
use crate::retrieval::RetrievedChunk;
use crate::session::ChatTurn;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;

/// Lazily produced text fragments of one answer
///
/// Concatenating the items yields the full answer. Dropping the stream stops
/// generation without waiting for the responder to finish.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Clone)]
pub struct ResponseStreamer {
    responder: Arc<dyn Responder>,
    system_prompt: String,
}

impl ResponseStreamer {
    pub fn new(responder: Arc<dyn Responder>, system_prompt: impl Into<String>) -> Self {
        Self {
            responder,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn responder(&self) -> &Arc<dyn Responder> {
        &self.responder
    }

    /// Stream an answer to `query`
    ///
    /// `history` holds the turns before `query`. Malformed fragments are
    /// logged and skipped; the first fatal error is yielded and ends the
    /// stream.
    pub fn generate(
        &self,
        query: &str,
        context: &[RetrievedChunk],
        history: &[ChatTurn],
        temperature: f32,
    ) -> TextStream {
        let messages = build_prompt(&self.system_prompt, query, context, history);
        let responder = self.responder.clone();

        tracing::debug!(
            "Generating with {} ({} messages, {} context chunks, temperature {})",
            responder.model_name(),
            messages.len(),
            context.len(),
            temperature
        );

        Box::pin(async_stream::stream! {
            let mut fragments = responder.stream_chat(messages, temperature);
            let mut skipped = 0usize;

            while let Some(fragment) = fragments.next().await {
                let fragment = match fragment {
                    Ok(f) => f,
                    Err(e) if e.is_recoverable() => {
                        skipped += 1;
                        tracing::warn!("Skipping fragment: {}", e);
                        continue;
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                match responder.delta_text(&fragment) {
                    Some(delta) if !delta.is_empty() => yield Ok(delta.to_string()),
                    Some(_) => {}
                    None if responder.is_final(&fragment) => {}
                    None => {
                        skipped += 1;
                        tracing::warn!("Unexpected fragment format: {}", fragment);
                    }
                }
            }

            if skipped > 0 {
                tracing::debug!("Stream finished with {} skipped fragments", skipped);
            }
        })
    }
}
