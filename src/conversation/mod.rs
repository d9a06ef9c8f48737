//! Conversation turns
//!
//! One turn: record the question, retrieve context, stream the answer, and
//! record the answer once streaming stops. A session handles one turn at a
//! time; the `&mut Session` borrow held by [`TurnStream`] enforces it.

use crate::error::{BodhiError, Result};
use crate::llm::{ResponseStreamer, TextStream};
use crate::retrieval::{HybridRetriever, RetrievalResult};
use crate::session::{ChatTurn, Session};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Drives retrieval and generation for a session
#[derive(Clone)]
pub struct ConversationOrchestrator {
    retriever: HybridRetriever,
    streamer: ResponseStreamer,
}

/// Answer and context of a completed turn
#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub answer: String,
    pub retrieval: RetrievalResult,
}

impl ConversationOrchestrator {
    pub fn new(retriever: HybridRetriever, streamer: ResponseStreamer) -> Self {
        Self {
            retriever,
            streamer,
        }
    }

    /// Start a turn and return the answer stream
    ///
    /// The user turn is appended before retrieval and removed again if
    /// retrieval fails. The assistant turn is appended when the stream ends
    /// or is dropped.
    pub async fn begin_turn<'s>(
        &self,
        session: &'s mut Session,
        query: &str,
    ) -> Result<TurnStream<'s>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(BodhiError::Validation("Message is empty".to_string()));
        }

        self.streamer.responder().ensure_model_pulled().await?;

        let prior = session.history().to_vec();
        session.push(ChatTurn::user(query));

        let options = session.options.clone();
        let retrieval = match self
            .retriever
            .retrieve(query, options.num_results, options.use_hybrid)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                session.pop_pending_user_turn();
                return Err(e);
            }
        };

        if retrieval.is_empty() {
            tracing::info!("No document context found; answering without passages");
        }

        let inner = self
            .streamer
            .generate(query, &retrieval.chunks, &prior, options.temperature);

        Ok(TurnStream {
            session,
            retrieval,
            inner,
            answer: String::new(),
            settled: false,
        })
    }

    /// Run a whole turn, handing each fragment to `sink`
    pub async fn respond<F>(
        &self,
        session: &mut Session,
        query: &str,
        mut sink: F,
    ) -> Result<TurnSummary>
    where
        F: FnMut(&str),
    {
        let mut stream = self.begin_turn(session, query).await?;

        while let Some(fragment) = stream.next().await {
            sink(&fragment?);
        }

        Ok(TurnSummary {
            answer: stream.answer().to_string(),
            retrieval: stream.retrieval().clone(),
        })
    }
}

/// Answer fragments of the turn in progress
///
/// Yields text fragments in order. When the stream ends the full answer is
/// recorded as the assistant turn. If it fails or is dropped early, the
/// partial answer is recorded instead, or the user turn is removed when
/// nothing was produced.
pub struct TurnStream<'s> {
    session: &'s mut Session,
    retrieval: RetrievalResult,
    inner: TextStream,
    answer: String,
    settled: bool,
}

impl TurnStream<'_> {
    /// Context passages the answer is grounded on
    pub fn retrieval(&self) -> &RetrievalResult {
        &self.retrieval
    }

    /// Text received so far
    pub fn answer(&self) -> &str {
        &self.answer
    }

    fn settle(&mut self, completed: bool) {
        if self.settled {
            return;
        }

        if completed || !self.answer.is_empty() {
            self.session.push(ChatTurn::assistant(self.answer.clone()));
        } else {
            self.session.pop_pending_user_turn();
        }
        self.settled = true;
    }
}

impl Stream for TurnStream<'_> {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.settled {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(fragment))) => {
                this.answer.push_str(&fragment);
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.settle(false);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.settle(true);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TurnStream<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!("Answer stream abandoned after {} chars", self.answer.len());
            self.settle(false);
        }
    }
}
