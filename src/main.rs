use librag::chat::{ChatEvent, ChatMessage, ThinkMode};
use librag::cli::{Cli, Commands, ConfigAction};
use librag::config::Config;
use librag::engine::{Engine, LoadOptions};
use librag::error::{LibragError, Result};
use librag::storage::format_size;
use librag::watch::SignalHandler;
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| LibragError::io(e, "Failed to create tokio runtime"))?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Run => cmd_run(cli.config).await,
            Commands::Ingest { path } => cmd_ingest(cli.config, &path).await,
            Commands::IngestAll { ext } => cmd_ingest_all(cli.config, ext.as_deref()).await,
            Commands::Search { query, top_k, json } => cmd_search(cli.config, &query, top_k, json).await,
            Commands::Ask {
                question,
                top_k,
                think,
                show_context,
            } => cmd_ask(cli.config, &question, top_k, think.as_deref(), show_context).await,
            Commands::Save => cmd_save(cli.config).await,
            Commands::Load {
                no_clear,
                batch_size,
                log_every,
            } => cmd_load(cli.config, no_clear, batch_size, log_every).await,
            Commands::Info { json } => cmd_info(cli.config, json).await,
            Commands::Health => cmd_health(cli.config).await,
            Commands::Config { action } => cmd_config(cli.config, action),
        }
    })
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "librag=debug" } else { "librag=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| LibragError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}

/// Engine with the persisted index loaded, for one-shot commands
async fn loaded_engine(config_path: Option<PathBuf>) -> Result<Engine> {
    let engine = Engine::from_config(load_config(config_path)?)?;
    engine
        .load_now(LoadOptions::from_config(engine.config()))
        .await?;
    Ok(engine)
}

async fn cmd_run(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting librag...");

    let engine = Engine::from_config(load_config(config_path)?)?;
    engine.auto_load().await;

    match engine.health().await {
        Ok(report) => {
            let missing = report.missing(
                &engine.config().ollama.embedding_model,
                &engine.config().ollama.chat_model,
            );
            if !missing.is_empty() {
                tracing::warn!("Models not installed on Ollama: {}", missing.join(", "));
            }
        }
        Err(e) => tracing::warn!("Ollama health check failed: {}", e),
    }

    let mut signals = SignalHandler::new()?;
    let shutdown = CancellationToken::new();
    let handles = engine.start_background(shutdown.clone())?;

    println!("✓ librag running");
    println!("  Library: {}", engine.library().root().display());
    println!("  Store:   {}", engine.store().path().display());
    println!("  Indexed: {} chunk(s)", engine.index_info().count);

    let sig = signals.wait().await;
    tracing::info!("Shutdown signal received ({:?})", sig);
    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Background task ended abnormally: {}", e);
        }
    }

    tracing::info!("librag stopped");
    Ok(())
}

async fn cmd_ingest(config_path: Option<PathBuf>, path: &str) -> Result<()> {
    let engine = Engine::from_config(load_config(config_path)?)?;
    let report = engine.ingest_one(path).await?;

    println!(
        "✓ Ingested {}: {} chunk(s) in {:.2}s (embed {:.2}s, upsert {:.2}s){}",
        report.source,
        report.chunks,
        report.total_seconds,
        report.embed_seconds,
        report.upsert_seconds,
        if report.persisted { "" } else { " [not persisted]" }
    );
    Ok(())
}

async fn cmd_ingest_all(config_path: Option<PathBuf>, ext: Option<&str>) -> Result<()> {
    let engine = Engine::from_config(load_config(config_path)?)?;
    let report = engine.ingest_all(ext).await?;

    for outcome in &report.results {
        match (&outcome.report, &outcome.error) {
            (Some(r), _) => println!("  ✓ {} ({} chunks)", outcome.path, r.chunks),
            (None, Some(e)) => println!("  ✗ {}: {}", outcome.path, e),
            (None, None) => println!("  ? {}", outcome.path),
        }
    }
    println!(
        "Ingested {}/{} file(s) [{}]: {} chunk(s), {} failed, {:.2}s embedding+upsert",
        report.succeeded,
        report.files,
        report.extensions_used,
        report.chunks,
        report.failed,
        report.embed_plus_upsert_seconds
    );
    Ok(())
}

async fn cmd_search(config_path: Option<PathBuf>, query: &str, top_k: Option<usize>, json: bool) -> Result<()> {
    let engine = loaded_engine(config_path).await?;
    let result = engine.retrieve(query, top_k).await?;

    if json {
        println!("{}", to_json(&result)?);
        return Ok(());
    }

    if result.hits.is_empty() {
        println!("No matches");
        return Ok(());
    }
    if !result.hints_used.is_empty() {
        println!("Hints: {}", result.hints_used.join(", "));
    }
    for (rank, hit) in result.hits.iter().enumerate() {
        let preview: String = hit.text.chars().take(160).collect();
        println!(
            "{:>2}. [{}#{}] {:.3}\n    {}",
            rank + 1,
            hit.source,
            hit.chunk_index,
            hit.score,
            preview.replace('\n', " ")
        );
    }
    Ok(())
}

async fn cmd_ask(
    config_path: Option<PathBuf>,
    question: &str,
    top_k: Option<usize>,
    think: Option<&str>,
    show_context: bool,
) -> Result<()> {
    let engine = loaded_engine(config_path).await?;
    let think = ThinkMode::parse(think.unwrap_or(&engine.config().chat.think));
    let messages = vec![ChatMessage::user(question)];

    let cancel = CancellationToken::new();
    let (prepared, mut rx) = engine
        .chat()
        .ask_stream(&messages, top_k, think, cancel.clone())
        .await?;

    if show_context {
        println!("{}\n", prepared.context);
    }
    if !prepared.hits.is_empty() {
        let sources: Vec<String> = prepared
            .hits
            .iter()
            .map(|h| format!("{}#{}", h.source, h.chunk_index))
            .collect();
        println!("Sources: {}\n", sources.join(", "));
    }

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                println!("\n[cancelled]");
                break;
            }
            event = rx.recv() => match event {
                Some(ChatEvent::Delta(text)) => {
                    print!("{}", text);
                    stdout.flush().ok();
                }
                Some(ChatEvent::Done) | None => {
                    println!();
                    break;
                }
                Some(ChatEvent::Error(e)) => {
                    println!();
                    return Err(LibragError::Chat(librag::chat::ChatError::Unavailable(e)));
                }
            }
        }
    }
    Ok(())
}

async fn cmd_save(config_path: Option<PathBuf>) -> Result<()> {
    let engine = Engine::from_config(load_config(config_path)?)?;
    let report = engine.save_now().await?;

    let size = |s: Option<u64>| s.map(format_size).unwrap_or_else(|| "-".to_string());
    println!("✓ Store: {}", report.store_path);
    println!(
        "  Size: {} -> {}",
        size(report.size_bytes_before),
        size(report.size_bytes_after)
    );
    if let Some(c) = &report.compaction {
        println!(
            "  Lines: {} -> {} ({} sources) in {:.2}s",
            c.lines_in, c.records_out, c.sources, c.seconds
        );
    } else {
        println!("  Nothing to compact");
    }
    Ok(())
}

async fn cmd_load(
    config_path: Option<PathBuf>,
    no_clear: bool,
    batch_size: Option<usize>,
    log_every: Option<usize>,
) -> Result<()> {
    let engine = Engine::from_config(load_config(config_path)?)?;
    let defaults = LoadOptions::from_config(engine.config());
    let options = LoadOptions {
        clear: !no_clear,
        batch_size: batch_size.unwrap_or(defaults.batch_size),
        log_every: log_every.unwrap_or(defaults.log_every),
    };
    let report = engine.load_now(options).await?;

    println!(
        "✓ Loaded {} record(s) from {} in {:.2}s ({} skipped)",
        report.load.records, report.load.path, report.load.seconds, report.load.skipped
    );
    println!(
        "  In memory: {} chunk(s), dimension {}",
        report.index.count,
        report
            .index
            .dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    Ok(())
}

async fn cmd_info(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let engine = loaded_engine(config_path).await?;
    let info = engine.index_info();

    if json {
        println!("{}", to_json(&info)?);
        return Ok(());
    }

    println!("librag index");
    println!("============");
    println!("Chunks:    {}", info.count);
    println!(
        "Dimension: {}",
        info.dimension.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
    );
    println!("Sources:   {}", info.sources.len());
    for source in &info.sources {
        println!("  {}", source);
    }
    Ok(())
}

async fn cmd_health(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = Engine::from_config(config)?;
    let report = engine.health().await?;

    println!("Ollama: {} (version {})", report.base_url, report.version.as_deref().unwrap_or("?"));
    println!("Installed models:");
    for model in &report.installed {
        println!("  {}", model);
    }
    let missing = report.missing(
        &engine.config().ollama.embedding_model,
        &engine.config().ollama.chat_model,
    );
    if missing.is_empty() {
        println!("✓ Configured models are installed");
    } else {
        println!("⚠ Missing: {}", missing.join(", "));
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path)?;
            let value = toml::Value::try_from(&config)?;

            let value = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    LibragError::InvalidRequest(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };
            let text = toml::to_string_pretty(&value)?;
            println!("{}", text);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(p) => p,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(p) => p,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let config = Config::default();
            config.save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(p) => p,
        None => Config::default_path()?,
    };
    Config::load_or_default(&path)
}
