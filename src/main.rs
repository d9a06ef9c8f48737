use bodhi::chunking::TextChunker;
use bodhi::cli::{read_line_or_interrupt, Cli, Commands, ConfigAction};
use bodhi::config::{expand_path, Config, ConfigValidator};
use bodhi::conversation::ConversationOrchestrator;
use bodhi::error::{BodhiError, Result};
use bodhi::ingest::UploadedDocument;
use bodhi::retrieval::RetrievalResult;
use bodhi::services::Services;
use bodhi::session::{Session, SessionCommand, HELP};
use bodhi::storage::StorageStats;
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("✗ {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Upload {
            files,
            chunk_size,
            chunk_overlap,
        } => cmd_upload(cli.config, &files, chunk_size, chunk_overlap).await,
        Commands::Documents { json } => cmd_documents(cli.config, json).await,
        Commands::Delete { name } => cmd_delete(cli.config, &name).await,
        Commands::Reindex {
            name,
            chunk_size,
            chunk_overlap,
        } => cmd_reindex(cli.config, &name, chunk_size, chunk_overlap).await,
        Commands::Search {
            query,
            limit,
            no_hybrid,
            json,
        } => cmd_search(cli.config, &query, limit, no_hybrid, json).await,
        Commands::Ask {
            question,
            context_size,
            no_hybrid,
            temperature,
        } => cmd_ask(cli.config, &question, context_size, no_hybrid, temperature).await,
        Commands::Chat => cmd_chat(cli.config).await,
        Commands::Status => cmd_status(cli.config).await,
        Commands::Config { action } => cmd_config(cli.config, action),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "bodhi=debug" } else { "bodhi=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries answers and results
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_services(config_path: Option<PathBuf>) -> Result<Services> {
    let config = load_config(config_path)?;
    Services::init(config).await
}

async fn cmd_upload(
    config_path: Option<PathBuf>,
    files: &[PathBuf],
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
) -> Result<()> {
    let services = open_services(config_path).await?;
    let chunker = TextChunker::new(
        chunk_size.unwrap_or(services.config.chunking.size),
        chunk_overlap.unwrap_or(services.config.chunking.overlap),
    )?;

    let failed = upload_files(&services, files, &chunker).await;
    if failed > 0 {
        return Err(BodhiError::Validation(format!(
            "{} of {} uploads failed",
            failed,
            files.len()
        )));
    }
    Ok(())
}

/// Index files and print one line per file; returns the number of failures
async fn upload_files(services: &Services, files: &[PathBuf], chunker: &TextChunker) -> usize {
    let mut failed = 0;
    let mut uploads = Vec::with_capacity(files.len());

    for path in files {
        match UploadedDocument::from_path(path) {
            Ok(upload) => uploads.push(upload),
            Err(e) => {
                println!("✗ {}: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    for outcome in services.ingestion().ingest(uploads, chunker).await {
        match outcome.result {
            Ok(doc) => println!("✓ {} ({} chunks)", doc.name, doc.chunk_count),
            Err(e) => {
                println!("✗ {}: {}", outcome.name, e);
                failed += 1;
            }
        }
    }

    failed
}

async fn cmd_documents(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let services = open_services(config_path).await?;
    let buckets = services.index.document_buckets().await?;

    if json {
        let out = serde_json::to_string_pretty(&buckets).map_err(|e| BodhiError::Json {
            source: e,
            context: "Failed to serialize document list".to_string(),
        })?;
        println!("{}", out);
        return Ok(());
    }

    if buckets.is_empty() {
        println!("No documents indexed. Upload one with 'bodhi upload <PDF>'.");
        return Ok(());
    }

    println!("Documents in '{}':", services.index.index_name());
    for bucket in &buckets {
        println!("  {} ({} chunks)", bucket.name, bucket.chunk_count);
    }
    Ok(())
}

async fn cmd_delete(config_path: Option<PathBuf>, name: &str) -> Result<()> {
    let services = open_services(config_path).await?;
    let report = services.ingestion().delete_document(name).await?;

    if report.chunks_removed == 0 && report.released_blob.is_none() {
        println!("No document named '{}'", name);
    } else {
        println!("✓ Deleted '{}' ({} chunks)", name, report.chunks_removed);
    }
    Ok(())
}

async fn cmd_reindex(
    config_path: Option<PathBuf>,
    name: &str,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
) -> Result<()> {
    let services = open_services(config_path).await?;
    let chunker = TextChunker::new(
        chunk_size.unwrap_or(services.config.chunking.size),
        chunk_overlap.unwrap_or(services.config.chunking.overlap),
    )?;

    let doc = services.ingestion().reindex_document(name, &chunker).await?;
    println!("✓ {} ({} chunks)", doc.name, doc.chunk_count);
    Ok(())
}

async fn cmd_search(
    config_path: Option<PathBuf>,
    query: &str,
    limit: Option<usize>,
    no_hybrid: bool,
    json: bool,
) -> Result<()> {
    let services = open_services(config_path).await?;
    let k = limit.unwrap_or(services.config.retrieval.num_results);
    let hybrid = services.config.retrieval.use_hybrid && !no_hybrid;

    let result = services.retriever().retrieve(query, k, hybrid).await?;

    if json {
        let out = serde_json::to_string_pretty(&result).map_err(|e| BodhiError::Json {
            source: e,
            context: "Failed to serialize search results".to_string(),
        })?;
        println!("{}", out);
        return Ok(());
    }

    if result.is_empty() {
        println!("No matching passages");
        return Ok(());
    }

    for (rank, chunk) in result.chunks.iter().enumerate() {
        println!(
            "{:>2}. {} [{}] score {:.4}",
            rank + 1,
            chunk.document_name,
            chunk.doc_id,
            chunk.score
        );
        println!("    {}", preview(&chunk.text, 160));
    }
    Ok(())
}

async fn cmd_ask(
    config_path: Option<PathBuf>,
    question: &str,
    context_size: Option<usize>,
    no_hybrid: bool,
    temperature: Option<f32>,
) -> Result<()> {
    let services = open_services(config_path).await?;
    let mut session = services.new_session();

    if let Some(k) = context_size {
        session.options.set_num_results(k)?;
    }
    if let Some(t) = temperature {
        session.options.set_temperature(t)?;
    }
    if no_hybrid {
        session.options.use_hybrid = false;
    }

    stream_answer(&services.conversation(), &mut session, question).await
}

async fn cmd_chat(config_path: Option<PathBuf>) -> Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let services = open_services(config_path).await?;
    let conversation = services.conversation();
    let mut session = services.new_session();

    println!("Bodhi chat (session {})", session.id);
    println!("Ask about your documents, or type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = match read_line_or_interrupt(&mut lines, tokio::signal::ctrl_c())
            .await
            .map_err(|e| BodhiError::Io {
                source: e,
                context: "Failed to read input".to_string(),
            })? {
            Some(line) => line,
            None => {
                println!();
                break;
            }
        };

        let command = match SessionCommand::parse(&line) {
            None => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = stream_answer(&conversation, &mut session, &line).await {
                    println!("✗ {}", e);
                }
                continue;
            }
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                println!("✗ {}", e);
                continue;
            }
        };

        match command.apply(&mut session) {
            Ok(true) => println!("✓ {}", describe_options(&session)),
            Ok(false) => match command {
                SessionCommand::Exit => break,
                SessionCommand::Help => println!("{}", HELP),
                SessionCommand::Options => println!("{}", describe_options(&session)),
                SessionCommand::History => print_history(&session),
                SessionCommand::Upload(files) => {
                    match TextChunker::new(session.options.chunk_size, session.options.chunk_overlap)
                    {
                        Ok(chunker) => {
                            upload_files(&services, &files, &chunker).await;
                        }
                        Err(e) => println!("✗ {}", e),
                    }
                }
                _ => {}
            },
            Err(e) => println!("✗ {}", e),
        }
    }

    tracing::info!(
        "Chat ended after {} turns ({}s)",
        session.history().len(),
        session.duration().num_seconds()
    );
    Ok(())
}

/// Print answer fragments as they arrive; Ctrl-C stops the answer early
async fn stream_answer(
    conversation: &ConversationOrchestrator,
    session: &mut Session,
    query: &str,
) -> Result<()> {
    let mut stream = conversation.begin_turn(session, query).await?;
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            next = stream.next() => match next {
                Some(Ok(fragment)) => {
                    print!("{}", fragment);
                    stdout.flush().ok();
                }
                Some(Err(e)) => {
                    println!();
                    return Err(e);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n[interrupted]");
                break;
            }
        }
    }

    println!();
    print_sources(stream.retrieval());
    Ok(())
}

fn print_sources(retrieval: &RetrievalResult) {
    let mut names: Vec<&str> = Vec::new();
    for name in retrieval.document_names() {
        if !names.contains(&name) {
            names.push(name);
        }
    }

    if !names.is_empty() {
        println!("Sources: {}", names.join(", "));
    }
}

fn print_history(session: &Session) {
    if session.history().is_empty() {
        println!("(no messages yet)");
        return;
    }
    for turn in session.history() {
        println!(
            "[{}] {}: {}",
            turn.at.format("%H:%M:%S"),
            turn.role.as_str(),
            turn.content
        );
    }
}

fn describe_options(session: &Session) -> String {
    let o = &session.options;
    format!(
        "hybrid {}, k {}, temperature {:.2}, chunk {}/{}",
        if o.use_hybrid { "on" } else { "off" },
        o.num_results,
        o.temperature,
        o.chunk_size,
        o.chunk_overlap
    )
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

async fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let services = open_services(config_path).await?;
    let stats = services.storage.stats()?;
    let buckets = services.index.document_buckets().await?;
    let chunks: usize = buckets.iter().map(|b| b.chunk_count).sum();

    println!("Bodhi Status");
    println!("============");
    println!("\nData directory: {}", services.storage.base_path().display());
    println!(
        "Index: {} ({} dimensions)",
        services.index.index_name(),
        services.index.vector_dim()
    );
    println!("  Documents: {}", buckets.len());
    println!("  Chunks: {}", chunks);
    println!(
        "  Uploads stored: {}",
        StorageStats::format_size(stats.blob_bytes)
    );
    println!(
        "  Index files: {}",
        StorageStats::format_size(stats.store_bytes)
    );
    println!("\nEmbedding model: {}", services.embedder.model_name());
    println!(
        "Language model: {} via {}",
        services.responder.model_name(),
        services.config.llm.base_url
    );
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let out = toml::to_string_pretty(&config)?;
            println!("{}", out);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => expand_path(&path)?,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => expand_path(&path)?,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => return Config::load(&expand_path(&path)?),
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'bodhi config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    Config::load(&path)
}
