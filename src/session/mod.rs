//! Chat session state
//!
//! A session holds the ordered chat history and the options that steer
//! chunking, retrieval and generation. It lives in memory only.
use crate::config::Config;
use crate::error::{BodhiError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub const MIN_NUM_RESULTS: usize = 1;
pub const MAX_NUM_RESULTS: usize = 10;

/// Who said a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in the chat history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            at: Utc::now(),
        }
    }
}

/// Per-session tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub num_results: usize,
    pub use_hybrid: bool,
    pub temperature: f32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
            num_results: 5,
            use_hybrid: true,
            temperature: 0.7,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunking.size,
            chunk_overlap: config.chunking.overlap,
            num_results: config.retrieval.num_results,
            use_hybrid: config.retrieval.use_hybrid,
            temperature: config.retrieval.temperature,
        }
    }

    pub fn set_num_results(&mut self, k: usize) -> Result<()> {
        if !(MIN_NUM_RESULTS..=MAX_NUM_RESULTS).contains(&k) {
            return Err(BodhiError::Validation(format!(
                "Number of results must be between {} and {}, got {}",
                MIN_NUM_RESULTS, MAX_NUM_RESULTS, k
            )));
        }
        self.num_results = k;
        Ok(())
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(BodhiError::Validation(format!(
                "Temperature must be between 0.0 and 1.0, got {}",
                temperature
            )));
        }
        self.temperature = temperature;
        Ok(())
    }

    pub fn set_chunking(&mut self, size: usize, overlap: usize) -> Result<()> {
        if size == 0 || overlap >= size {
            return Err(BodhiError::Validation(format!(
                "Chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, size
            )));
        }
        self.chunk_size = size;
        self.chunk_overlap = overlap;
        Ok(())
    }
}

/// An interactive chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub id: Uuid,

    /// When the session was started
    pub started_at: DateTime<Utc>,

    pub options: SessionOptions,

    history: Vec<ChatTurn>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            options,
            history: Vec::new(),
        }
    }

    /// Ordered chat history, oldest first
    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.history.push(turn);
    }

    /// Remove the last turn if it is an unanswered user turn
    pub fn pop_pending_user_turn(&mut self) -> Option<ChatTurn> {
        match self.history.last() {
            Some(turn) if turn.role == Role::User => self.history.pop(),
            _ => None,
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Get session duration
    pub fn duration(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

/// Interactive command typed at the chat prompt
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Hybrid(bool),
    NumResults(usize),
    Temperature(f32),
    Chunking { size: usize, overlap: usize },
    Upload(Vec<PathBuf>),
    History,
    Clear,
    Options,
    Help,
    Exit,
}

impl SessionCommand {
    /// Parse a `/command`; `None` means the line is a question
    pub fn parse(line: &str) -> Option<Result<Self>> {
        let line = line.trim();
        let rest = line.strip_prefix('/')?;

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        Some(Self::from_parts(name, &args))
    }

    fn from_parts(name: &str, args: &[&str]) -> Result<Self> {
        let usage = |text: &str| BodhiError::Validation(format!("Usage: {}", text));

        match (name, args) {
            ("hybrid", ["on"]) => Ok(Self::Hybrid(true)),
            ("hybrid", ["off"]) => Ok(Self::Hybrid(false)),
            ("hybrid", _) => Err(usage("/hybrid on|off")),
            ("k", [n]) => n
                .parse()
                .map(Self::NumResults)
                .map_err(|_| usage("/k N")),
            ("k", _) => Err(usage("/k N")),
            ("temperature" | "temp", [t]) => t
                .parse()
                .map(Self::Temperature)
                .map_err(|_| usage("/temperature T")),
            ("temperature" | "temp", _) => Err(usage("/temperature T")),
            ("chunk", [size, overlap]) => match (size.parse(), overlap.parse()) {
                (Ok(size), Ok(overlap)) => Ok(Self::Chunking { size, overlap }),
                _ => Err(usage("/chunk SIZE OVERLAP")),
            },
            ("chunk", _) => Err(usage("/chunk SIZE OVERLAP")),
            ("upload", []) => Err(usage("/upload FILE...")),
            ("upload", paths) => Ok(Self::Upload(paths.iter().map(PathBuf::from).collect())),
            ("history", []) => Ok(Self::History),
            ("clear", []) => Ok(Self::Clear),
            ("options", []) => Ok(Self::Options),
            ("help", []) => Ok(Self::Help),
            ("exit" | "quit", []) => Ok(Self::Exit),
            _ => Err(BodhiError::Validation(format!(
                "Unknown command '/{}' (try /help)",
                name
            ))),
        }
    }

    /// Apply an option-changing command to the session
    ///
    /// Returns `false` for commands the caller must handle itself.
    pub fn apply(&self, session: &mut Session) -> Result<bool> {
        match self {
            Self::Hybrid(on) => session.options.use_hybrid = *on,
            Self::NumResults(k) => session.options.set_num_results(*k)?,
            Self::Temperature(t) => session.options.set_temperature(*t)?,
            Self::Chunking { size, overlap } => session.options.set_chunking(*size, *overlap)?,
            Self::Clear => session.clear_history(),
            Self::Upload(_) | Self::History | Self::Options | Self::Help | Self::Exit => {
                return Ok(false)
            }
        }
        Ok(true)
    }
}

pub const HELP: &str = "\
/hybrid on|off          toggle semantic search alongside keyword search
/k N                    number of retrieved passages (1-10)
/temperature T          generation temperature (0.0-1.0)
/chunk SIZE OVERLAP     chunking for the next uploads
/upload FILE...         index PDF files
/history                show the conversation so far
/options                show the current options
/clear                  forget the conversation
/exit                   leave the chat";
