//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

#[derive(Parser, Debug)]
#[command(
    name = "bodhi",
    version,
    about = "Chat with your PDF documents using local models",
    long_about = "Bodhi indexes uploaded PDF documents for keyword and semantic search and answers \
                  questions about them with a locally served language model, streaming the answer \
                  as it is generated."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/bodhi/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload and index one or more PDF documents
    Upload {
        /// PDF files to index
        #[arg(required = true, value_name = "PDF")]
        files: Vec<PathBuf>,

        /// Chunk size in characters (defaults to the configured size)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Overlap between consecutive chunks in characters
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// List indexed documents
    Documents {
        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove a document and all of its chunks
    Delete {
        /// Document name as shown by `bodhi documents`
        name: String,
    },

    /// Re-chunk and re-embed a document from its stored upload
    Reindex {
        /// Document name as shown by `bodhi documents`
        name: String,

        /// Chunk size in characters (defaults to the configured size)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Overlap between consecutive chunks in characters
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// Search indexed documents without generating an answer
    Search {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Keyword search only
        #[arg(long)]
        no_hybrid: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Ask a single question about the indexed documents
    Ask {
        /// Question to ask
        question: String,

        /// Number of context passages to retrieve
        #[arg(short = 'n', long)]
        context_size: Option<usize>,

        /// Keyword search only
        #[arg(long)]
        no_hybrid: bool,

        /// Generation temperature (0.0-1.0)
        #[arg(short, long)]
        temperature: Option<f32>,
    },

    /// Start an interactive chat session
    Chat,

    /// Show index and storage status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Read the next prompt line, or `None` on end of input or interrupt
pub async fn read_line_or_interrupt<R, F>(
    lines: &mut Lines<R>,
    interrupt: F,
) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => Ok(None),
    }
}
