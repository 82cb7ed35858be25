//! askdb command line.
//!
//! - `askdb index <PATH>` builds the Tantivy index and the vector file from a
//!   JSONL corpus or a directory of `.txt` files
//! - `askdb ask "<question>"` answers from the local indexes (`--stream` prints
//!   one JSON event per line)
//! - `askdb search "<question>"` shows the fused ranking without generation
//! - `askdb health` probes every backend

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use askdb_cache::MemoryCacheStore;
use askdb_core::config::{resolve_with_base, Config, Settings};
use askdb_core::corpus::CorpusLoader;
use askdb_core::QueryRequest;
use askdb_embed::provider_from_settings;
use askdb_generate::backend_from_settings;
use askdb_hybrid::IndexSearchBackend;
use askdb_pipeline::{ComponentStatus, QueryOrchestrator};
use askdb_text::TextIndex;
use askdb_trace::{logging, sink_from_settings};
use askdb_vector::{backfill_embeddings, FlatVectorIndex};

#[derive(Parser)]
#[command(name = "askdb")]
#[command(about = "Grounded question answering over a local document corpus")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml; relative index paths resolve against it
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the lexical and vector indexes
    Index {
        /// JSONL file or directory of .txt files
        path: PathBuf,

        /// Concurrent embedding requests
        #[arg(long, default_value = "16")]
        batch_size: usize,
    },

    /// Answer a question
    Ask {
        query: String,

        #[command(flatten)]
        opts: QueryOpts,

        /// Generation model
        #[arg(short, long)]
        model: Option<String>,

        /// Print stream events as JSON lines
        #[arg(long)]
        stream: bool,
    },

    /// Fused ranking only
    Search {
        query: String,

        #[command(flatten)]
        opts: QueryOpts,
    },

    /// Probe cache, embedding, search and generation
    Health,
}

#[derive(Args)]
struct QueryOpts {
    /// Number of passages
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Lexical search only
    #[arg(long)]
    no_hybrid: bool,

    /// Restrict to a category (repeatable)
    #[arg(long = "category")]
    categories: Vec<String>,
}

impl QueryOpts {
    fn request(&self, query: String) -> QueryRequest {
        let mut request = QueryRequest::new(query).hybrid(!self.no_hybrid);
        request.top_k = self.top_k;
        if !self.categories.is_empty() {
            request = request.categories(self.categories.iter().cloned());
        }
        request
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from(&cli.config_dir).map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let settings = config.settings()?;
    logging::init(&settings.logging);
    let base = cli.config_dir.as_path();

    match cli.command {
        Commands::Index { path, batch_size } => index(&settings, base, &path, batch_size).await?,
        Commands::Ask { query, opts, model, stream } => {
            let orchestrator = orchestrator(&settings, base).await?;
            let mut request = opts.request(query);
            request.model = model;
            if stream {
                ask_stream(&orchestrator, request).await?;
            } else {
                ask(&orchestrator, request).await?;
            }
        }
        Commands::Search { query, opts } => {
            let orchestrator = orchestrator(&settings, base).await?;
            let response = orchestrator.search(opts.request(query)).await?;
            println!("mode: {}", response.search_mode);
            for (i, hit) in response.hits.iter().enumerate() {
                println!("{:>2}. {:.3}  {}", i + 1, hit.score, hit.doc_id);
                println!("    {}", hit.snippet.replace('\n', " "));
            }
        }
        Commands::Health => {
            let orchestrator = orchestrator(&settings, base).await?;
            let report = orchestrator.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.status == ComponentStatus::Down {
                std::process::exit(1);
            }
        }
    }

    // Traces are exported on detached tasks; give them a moment before the runtime stops.
    tokio::time::sleep(settings.trace.export_timeout().min(Duration::from_millis(200))).await;
    Ok(())
}

async fn orchestrator(settings: &Settings, base: &Path) -> Result<QueryOrchestrator> {
    let cache = Arc::new(MemoryCacheStore::new(&settings.cache));
    cache.spawn_sweeper(settings.cache.sweep_interval());
    let search = IndexSearchBackend::open(&settings.search, base)
        .await
        .context("opening indexes failed, run `askdb index <PATH>` first")?;
    let orchestrator = QueryOrchestrator::builder(settings.clone())
        .cache(cache)
        .embedder(provider_from_settings(&settings.embedding)?)
        .search(Arc::new(search))
        .generator(backend_from_settings(&settings.generation)?)
        .trace_sink(sink_from_settings(&settings.trace, base))
        .build()?;
    Ok(orchestrator)
}

async fn ask(orchestrator: &QueryOrchestrator, request: QueryRequest) -> Result<()> {
    let response = tokio::select! {
        r = orchestrator.ask(request) => r?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("cancelled"),
    };
    println!("{}\n", response.answer);
    println!("Sources ({}, {} passages):", response.search_mode, response.chunks_used);
    for (i, source) in response.sources.iter().enumerate() {
        println!("  [{}] {} ({:.3}) {}", i + 1, source.doc_id, source.score, source.url);
    }
    println!("timing_ms: {}", serde_json::to_string(&response.timing_ms)?);
    Ok(())
}

async fn ask_stream(orchestrator: &QueryOrchestrator, request: QueryRequest) -> Result<()> {
    let mut events = orchestrator.ask_stream(request);
    let cancel = events.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    while let Some(event) = events.next_event().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

/// Rebuild the lexical index and bring the vector file up to date. Chunks
/// whose content is unchanged keep their stored embedding.
async fn index(settings: &Settings, base: &Path, source: &Path, batch_size: usize) -> Result<()> {
    println!("askdb indexer\n=============");
    println!("Source: {}", source.display());
    let chunks = CorpusLoader::new().load(source)?;
    if chunks.is_empty() {
        anyhow::bail!("no documents found in {}", source.display());
    }

    let index_dir = resolve_with_base(base, &settings.search.index_dir);
    let text = TextIndex::create(&index_dir)?;
    let indexed = text.index(&chunks)?;
    println!("📊 Indexed {} chunks into Tantivy at {}", indexed, index_dir.display());

    let provider = provider_from_settings(&settings.embedding)?;
    let vector_path = resolve_with_base(base, &settings.search.vector_path);
    let vectors = match FlatVectorIndex::load(&vector_path).await {
        Ok(existing) if existing.dim() == provider.dim() => existing,
        Ok(existing) => {
            warn!(old = existing.dim(), new = provider.dim(), "embedding dimension changed, re-embedding everything");
            FlatVectorIndex::new(provider.dim())
        }
        Err(e) => {
            info!(path = %vector_path.display(), error = %e, "starting a new vector index");
            FlatVectorIndex::new(provider.dim())
        }
    };

    let pb = ProgressBar::new(chunks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%)")?
            .progress_chars("#>-"),
    );
    let report = backfill_embeddings(&vectors, &chunks, provider.as_ref(), batch_size, |n| pb.inc(n as u64)).await?;
    pb.finish_and_clear();
    vectors.save(&vector_path).await?;

    println!(
        "📊 Embedded {} chunks with {} ({} unchanged, {} failed) into {}",
        report.embedded,
        provider.name(),
        report.skipped,
        report.failed,
        vector_path.display()
    );
    println!("\n✅ Indexing completed successfully!");
    println!("💡 Try: askdb ask \"<question>\"");
    Ok(())
}
