//! Tabula CLI — generate researched HTML reports from CSV datasets.

mod commands;

use clap::Parser;
use std::path::{Path, PathBuf};
use tabula_core::ArrangementStrategy;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Tabula: LLM-researched data reports from a CSV file
#[derive(Parser, Debug)]
#[command(name = "tabula", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Run the full pipeline and write the HTML report
    Run {
        /// CSV dataset to analyze
        dataset: PathBuf,

        /// Stage cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Output HTML path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of top-level research questions
        #[arg(short, long)]
        breadth: Option<usize>,

        /// Follow-up questions per top-level question
        #[arg(short, long)]
        depth: Option<usize>,

        /// Maximum concurrent research tasks
        #[arg(short, long)]
        workers: Option<usize>,

        /// Section ordering: category_title_length or delegated
        #[arg(long)]
        arrangement: Option<ArrangementStrategy>,

        /// LLM model to use
        #[arg(short, long)]
        model: Option<String>,

        /// Ignore and do not write the stage cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Print the dataset profile as JSON
    Profile {
        /// CSV dataset to profile
        dataset: PathBuf,
    },
    /// Re-render the HTML report from the cached final arrangement
    Render {
        /// Stage cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Output HTML path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Manage the stage cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum CacheAction {
    /// Remove one cached stage, or all of them
    Clear {
        /// Stage key (dataset_profile, research_questions, research_results, final_arrangement)
        stage: Option<String>,
    },
    /// List cached stages
    Status,
}

/// Install stderr logging plus a daily JSON log file under `<cache>/logs`.
fn init_tracing(cache_dir: &Path, verbose: u8, quiet: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    let log_dir = cache_dir.join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tabula.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let overrides = commands::overrides_for(&cli.command);
    let config = tabula_core::load_config(cli.config.as_deref(), Some(&overrides))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let _guard = init_tracing(&config.cache.dir, cli.verbose, cli.quiet);

    commands::handle_command(cli.command, config, cli.quiet).await
}
