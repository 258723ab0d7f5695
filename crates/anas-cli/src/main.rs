mod config;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use anas_api::AppState;
use anas_bench::{BenchmarkPipeline, BenchmarkService, CancellationToken, OpenAiGrader, PromptTemplate};
use anas_core::{
    ttl_from_hours, BenchmarkResult, KvStore, OutputSchema, RunMetadata, RunReceipt, RunRecord,
};
use anas_store::{BenchmarkRepository, RunRepository, SqliteStore};

use config::Config;

#[derive(Parser)]
#[command(
    name = "anas",
    version,
    about = "Audit AI-generated news summaries with an LLM grader"
)]
struct Cli {
    /// Config file (overrides $ANAS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config and $ANAS_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Listen address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Store a run record from a JSON file ("-" for stdin)
    Submit { file: PathBuf },

    /// Inspect stored runs
    Runs {
        #[command(subcommand)]
        command: RunCommands,
    },

    /// Grade runs and inspect results
    Benchmark {
        #[command(subcommand)]
        command: BenchmarkCommands,
    },

    /// Reclaim space held by expired entries
    Gc,

    /// Show the active configuration
    Config,
}

#[derive(Subcommand)]
enum RunCommands {
    /// List stored runs
    List {
        /// Maximum runs to show (0 = all)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print a run record as JSON
    Show { id: String },

    /// Print the most recent run by run date
    Latest,

    /// Delete a run
    Delete { id: String },
}

#[derive(Subcommand)]
enum BenchmarkCommands {
    /// Grade a run now and print the result
    Run { run_id: String },

    /// Print the latest benchmark for a run
    Show {
        id: String,

        /// Treat the argument as a benchmark id instead of a run id
        #[arg(long)]
        by_id: bool,
    },

    /// Mark an unfinished benchmark as cancelled
    Cancel { benchmark_id: String },
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "anas", "anas")
        .map(|dirs| dirs.data_dir().join("anas.db"))
        .unwrap_or_else(|| PathBuf::from("anas.db"))
}

fn open_store(db: Option<PathBuf>, config: &Config) -> Result<Arc<SqliteStore>> {
    let path = db
        .or_else(|| config.store.path.as_ref().map(PathBuf::from))
        .unwrap_or_else(default_db_path);
    let store = SqliteStore::new(&path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct Repos {
    store: Arc<SqliteStore>,
    runs: RunRepository,
    benchmarks: BenchmarkRepository,
}

fn open_repos(db: Option<PathBuf>, config: &Config) -> Result<Repos> {
    let store = open_store(db, config)?;
    let ttl = ttl_from_hours(config.store.ttl_hours);
    Ok(Repos {
        runs: RunRepository::new(store.clone(), ttl),
        benchmarks: BenchmarkRepository::new(store.clone(), ttl),
        store,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    });

    let config = config::load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Config => cmd_config(cli.config.as_ref(), &config),
        Commands::Serve { bind } => cmd_serve(open_repos(cli.db, &config)?, &config, bind),
        Commands::Submit { file } => cmd_submit(&open_repos(cli.db, &config)?.runs, &file),
        Commands::Runs { command } => {
            let runs = open_repos(cli.db, &config)?.runs;
            match command {
                RunCommands::List { limit } => {
                    cmd_runs_list(&runs, limit.unwrap_or(config.server.list_limit))
                }
                RunCommands::Show { id } => print_json(&runs.get(&id)?),
                RunCommands::Latest => print_json(&runs.latest()?),
                RunCommands::Delete { id } => {
                    runs.delete(&id)?;
                    println!("Deleted: {id}");
                    Ok(())
                }
            }
        }
        Commands::Benchmark { command } => {
            let repos = open_repos(cli.db, &config)?;
            match command {
                BenchmarkCommands::Run { run_id } => cmd_benchmark_run(repos, &config, &run_id),
                BenchmarkCommands::Show { id, by_id } => {
                    let result = if by_id {
                        repos.benchmarks.get_by_benchmark_id(&id)?
                    } else {
                        repos.benchmarks.get_by_run_id(&id)?
                    };
                    print_json(&result)
                }
                BenchmarkCommands::Cancel { benchmark_id } => {
                    let pipeline = build_pipeline(repos.runs, repos.benchmarks, &config)?;
                    let service = BenchmarkService::new(pipeline, config.benchmark.estimate());
                    let result = service.cancel(&benchmark_id)?;
                    println!("Cancelled: {} (run {})", result.benchmark_id, result.run_id);
                    Ok(())
                }
            }
        }
        Commands::Gc => {
            let reclaimed = open_repos(cli.db, &config)?.store.compact()?;
            println!("Reclaimed {reclaimed} expired entries.");
            Ok(())
        }
    }
}

// -------- Wiring --------

fn load_template(config: &Config) -> Result<PromptTemplate> {
    match &config.benchmark.prompt_template {
        Some(path) => PromptTemplate::from_file(Path::new(path))
            .with_context(|| format!("loading prompt template {path}")),
        None => Ok(PromptTemplate::default()),
    }
}

fn build_pipeline(
    runs: RunRepository,
    benchmarks: BenchmarkRepository,
    config: &Config,
) -> Result<BenchmarkPipeline> {
    OutputSchema::evaluation()
        .validate_evaluation()
        .context("grading schema is inconsistent")?;
    if config.llm.api_key.is_empty() {
        warn!("no LLM API key configured; grading calls will be unauthenticated");
    }
    let grader = OpenAiGrader::new(
        &config.llm.url,
        &config.llm.api_key,
        &config.llm.model,
        config.llm.timeout(),
    );
    Ok(BenchmarkPipeline::new(
        runs,
        benchmarks,
        Arc::new(grader),
        load_template(config)?,
    ))
}

// -------- Commands --------

fn cmd_serve(repos: Repos, config: &Config, bind: Option<String>) -> Result<()> {
    let Repos {
        store,
        runs,
        benchmarks,
    } = repos;
    let pipeline = build_pipeline(runs.clone(), benchmarks, config)?;
    let service = BenchmarkService::new(pipeline, config.benchmark.estimate());
    let recovered = service
        .recover_interrupted()
        .context("recovering interrupted benchmarks")?;
    if recovered > 0 {
        warn!(recovered, "marked interrupted benchmarks as failed");
    }

    let state = AppState::new(runs, service, config.server.list_limit)
        .with_body_limit(config.server.max_body_bytes);
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let origins = config.server.cors_allowed_origins.clone();
    let gc_every = config.store.gc_interval();

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(async move {
        let kv: Arc<dyn KvStore> = store;
        let compactor = anas_api::spawn_compactor(kv, gc_every);
        let listener = anas_api::bind_listener(&bind)
            .await
            .with_context(|| format!("binding {bind}"))?;
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        };
        let served = anas_api::serve(listener, state, &origins, shutdown).await;
        compactor.abort();
        served.context("HTTP server failed")
    })
}

fn cmd_submit(runs: &RunRepository, file: &Path) -> Result<()> {
    let content = if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading stdin")?;
        buf
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?
    };
    let record: RunRecord = serde_json::from_str(&content).context("parsing run record")?;
    let record = record.accept()?;
    runs.save(&record.run_id, &record)?;
    print_json(&RunReceipt::stored(record.run_id))
}

fn cmd_runs_list(runs: &RunRepository, limit: usize) -> Result<()> {
    let list = runs.list_metadata(limit)?;
    if list.is_empty() {
        println!("No runs stored.");
        return Ok(());
    }
    for meta in &list {
        print_run(meta);
    }
    Ok(())
}

fn cmd_benchmark_run(repos: Repos, config: &Config, run_id: &str) -> Result<()> {
    let run = repos.runs.get(run_id)?;
    let pipeline = build_pipeline(repos.runs, repos.benchmarks, config)?;
    let queued = BenchmarkResult::queued(run_id, &run.persona);
    pipeline.benchmarks().create(&queued)?;
    let result = pipeline.run(queued, &CancellationToken::new());
    print_json(&result)?;
    if let Some(reason) = &result.failure_reason {
        anyhow::bail!("benchmark failed: {reason}");
    }
    Ok(())
}

fn cmd_config(explicit: Option<&PathBuf>, config: &Config) -> Result<()> {
    println!("# {}", config::show_config_path(explicit));
    print!("{}", config.redacted()?);
    Ok(())
}

// -------- Output --------

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_run(meta: &RunMetadata) {
    let date = meta
        .run_date
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into());
    let items = meta
        .total_items
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".into());
    println!("{}  {date}  {:<24} {items} items", meta.id, meta.persona_name);
}
