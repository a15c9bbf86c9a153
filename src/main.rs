use sift::breaker::CircuitBreakerSnapshot;
use sift::chunking::{ChunkStrategy, Chunker};
use sift::cli::{Cli, Commands, ConfigAction};
use sift::config::{Config, ConfigValidator};
use sift::error::{Result, SiftError};
use sift::ingest::{DocumentStatus, IngestDocument};
use sift::retrieval::{ExecutionMode, SearchResponse};
use sift::timeframe;
use sift::Sift;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    let config_path = cli.config;
    let profile = cli.profile;

    match cli.command {
        Commands::Ingest {
            files,
            tags,
            source_type,
            code,
        } => {
            let config = load_config(config_path, profile)?;
            cmd_ingest(config, files, tags, source_type, code)?;
        }
        Commands::Search {
            query,
            limit,
            threshold,
            timeframe: timeframe_arg,
            tags,
            sequential,
            no_track,
            json,
            breakers,
        } => {
            let config = load_config(config_path, profile)?;
            let sift = Sift::open(config)?;

            let mut request = sift
                .request(query)
                .timeframe(timeframe::parse_value(&serde_json::Value::String(timeframe_arg))?)
                .tags(tags)
                .track(!no_track);
            if let Some(limit) = limit {
                request = request.limit(limit);
            }
            if let Some(threshold) = threshold {
                request = request.threshold(threshold);
            }
            if sequential {
                request = request.execution(ExecutionMode::Sequential);
            }

            let response = runtime()?.block_on(sift.search_with_report(&request))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
            if breakers {
                print_breakers(&sift.breaker_stats());
            }
        }
        Commands::Chunk {
            file,
            size,
            overlap,
            strategy,
            json,
        } => {
            let config = load_config(config_path, profile)?;
            cmd_chunk(&config, &file, size, overlap, strategy, json)?;
        }
        Commands::Timeframe { query } => {
            let extraction = timeframe::extract(&query);
            match &extraction.timeframe {
                Some(range) => {
                    println!("Matched: {}", extraction.matched_expression.as_deref().unwrap_or(""));
                    println!("Range:   {}", range);
                    println!("Query:   {}", extraction.query);
                }
                None => println!("No timeframe found in query"),
            }
        }
        Commands::Stats => {
            let config = load_config(config_path, profile)?;
            let sift = Sift::open(config)?;
            let stats = sift.stats()?;

            println!("Documents:  {}", stats.document_count);
            println!("Chunks:     {}", stats.chunk_count);
            println!("Embeddings: {}", stats.embedding_count);
            println!("Searches:   {}", stats.search_count);
            println!("Clicks:     {}", stats.click_count);
        }
        Commands::Config { action } => {
            cmd_config(config_path, profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "sift=debug" } else { "sift=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| SiftError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_ingest(
    config: Config,
    files: Vec<PathBuf>,
    tags: Vec<String>,
    source_type: Option<String>,
    code: bool,
) -> Result<()> {
    let mut documents = Vec::with_capacity(files.len());
    for path in &files {
        let text = std::fs::read_to_string(path).map_err(|e| SiftError::Io {
            source: e,
            context: format!("Failed to read {:?}", path),
        })?;

        let mut document = IngestDocument::new(path.display().to_string(), text).tags(tags.clone());
        if let Some(name) = path.file_name() {
            document = document.title(name.to_string_lossy());
        }
        if let Some(source_type) = &source_type {
            document = document.source_type(source_type.clone());
        }
        if code {
            document = document.strategy(ChunkStrategy::Code);
        }
        documents.push(document);
    }

    let sift = Sift::open(config)?;
    let report = runtime()?.block_on(sift.ingest_all(documents));

    for detail in &report.details {
        match &detail.status {
            DocumentStatus::Ingested => println!(
                "✓ {} ({} chunks, {} embedded)",
                detail.document_id, detail.chunks_stored, detail.chunks_embedded
            ),
            DocumentStatus::Unchanged => println!("- {} (unchanged)", detail.document_id),
            DocumentStatus::Failed { error } => println!("✗ {}: {}", detail.document_id, error),
        }
    }
    println!(
        "\n{} documents, {} chunks stored, {} embedded, {} without vectors ({}ms)",
        report.documents,
        report.chunks_stored,
        report.chunks_embedded,
        report.chunks_failed,
        report.duration_ms
    );

    Ok(())
}

fn cmd_chunk(
    config: &Config,
    file: &Path,
    size: Option<usize>,
    overlap: Option<usize>,
    strategy: Option<String>,
    json: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(file).map_err(|e| SiftError::Io {
        source: e,
        context: format!("Failed to read {:?}", file),
    })?;

    let configured = config.chunker()?;
    let strategy = match strategy {
        Some(s) => s.parse::<ChunkStrategy>().map_err(SiftError::Config)?,
        None => configured.strategy(),
    };
    let chunker = Chunker::new(
        size.unwrap_or(configured.chunk_size()),
        overlap.unwrap_or(configured.overlap()),
    )
    .with_strategy(strategy);

    let chunks = chunker.chunk(&text);
    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    for chunk in &chunks {
        println!(
            "--- chunk {} [{}..{}] ({} chars)",
            chunk.index,
            chunk.start_offset,
            chunk.end_offset,
            chunk.char_len()
        );
        println!("{}", chunk.content);
    }
    println!("\n{} chunks", chunks.len());
    Ok(())
}

fn print_response(response: &SearchResponse) {
    if let Some(expression) = &response.matched_expression {
        println!("Timeframe: \"{}\"", expression);
    }
    if let Some(filter) = &response.time_filter {
        for range in filter.ranges() {
            println!("  {}", range);
        }
    }

    if response.results.is_empty() {
        println!("No results");
    }
    for (position, result) in response.results.iter().enumerate() {
        let sources: Vec<&str> = result.sources.iter().map(|s| s.as_str()).collect();
        println!(
            "\n{}. [chunk {}] score {:.4} ({})",
            position + 1,
            result.id,
            result.rrf_score,
            sources.join(", ")
        );
        println!("   {}", preview(&result.content, 200));
    }

    println!("\nBranches ({}ms):", response.duration_ms);
    for outcome in &response.branches {
        println!("  {:<8} {:?} ({}ms)", outcome.branch, outcome.status, outcome.duration_ms);
    }
}

fn print_breakers(snapshots: &[CircuitBreakerSnapshot]) {
    println!("\nCircuit breakers:");
    for snapshot in snapshots {
        let stats = &snapshot.stats;
        println!(
            "  {:<10} {} ({}/{} failures)",
            snapshot.name, stats.state, stats.failure_count, stats.failure_threshold
        );
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        format!("{}…", flat.chars().take(max_chars).collect::<String>())
    }
}

fn cmd_config(config_path: Option<PathBuf>, profile: Option<String>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config)?;

            let shown = match section {
                Some(section) => value
                    .get(&section)
                    .cloned()
                    .ok_or_else(|| SiftError::Config(format!("Unknown section: {}", section)))?,
                None => value,
            };
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| SiftError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
        ConfigAction::Path => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };
            println!("{}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!("Config file not found, using defaults. Run 'sift config init' to create one.");
        let mut config = Config::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}
