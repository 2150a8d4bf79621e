//! # corpus-harvest CLI (`mkcorpus`)
//!
//! ## Usage
//!
//! ```bash
//! mkcorpus --config ./config/mkcorpus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mkcorpus create` | Build or refresh the corpus from the configured sources |
//! | `mkcorpus sources` | List configured sources and their health |
//! | `mkcorpus stats` | Summarize the corpus and index logs |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `corpus_harvest=info,mkcorpus=info`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use corpus_harvest::config::{self, Config};
use corpus_harvest::engine::Harvester;
use corpus_harvest::progress::ProgressMode;
use corpus_harvest::registry::SourceRegistry;
use corpus_harvest::state::StateLayout;
use corpus_harvest::workers::WorkerPool;
use corpus_harvest::{sources, stats};

/// mkcorpus: build an incremental, deduplicated document corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file describing the corpus location, state directory and sources.
#[derive(Parser)]
#[command(
    name = "mkcorpus",
    about = "Build an incremental, deduplicated document corpus from HTTP and file sources",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mkcorpus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or refresh the corpus.
    ///
    /// Safe to interrupt: rerunning resumes from the state left on disk.
    Create {
        /// Only process these sources (comma-separated). Defaults to all.
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,

        /// Corpus file. Overrides `[corpus].path`.
        #[arg(long)]
        output: Option<PathBuf>,

        /// State directory. Overrides `[state].data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Extraction threads. Overrides `[workers].threads`.
        #[arg(long)]
        threads: Option<usize>,

        /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// List configured sources and whether they look usable.
    Sources,

    /// Show corpus and index statistics.
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("corpus_harvest=info,mkcorpus=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = config::load_config(&cli.config)?;

    if let Commands::Create {
        output,
        data_dir,
        threads,
        ..
    } = &cli.command
    {
        if let Some(output) = output {
            cfg.corpus.path = output.clone();
        }
        if let Some(data_dir) = data_dir {
            cfg.state.data_dir = data_dir.clone();
        }
        if let Some(threads) = threads {
            cfg.workers.threads = *threads;
        }
    }

    // Network I/O is multiplexed on one thread. Extraction runs on the
    // blocking pool; the worker pool's semaphore bounds it to `threads`.
    let threads = cfg.worker_threads();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(run(cli.command, cfg, threads))
}

async fn run(command: Commands, cfg: Config, threads: usize) -> Result<()> {
    match command {
        Commands::Create {
            sources, progress, ..
        } => {
            let workers = WorkerPool::new(threads);
            let registry = SourceRegistry::from_config(&cfg, &workers)?;
            let selected = registry.select(&sources)?;
            let layout = StateLayout::new(&cfg.state.data_dir, &cfg.corpus.path);
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);

            let harvester = Harvester::open(selected, layout)
                .await?
                .with_progress(progress.reporter());
            let report = harvester.run().await?;

            println!("create {}", cfg.corpus.path.display());
            println!("{}", report);
            if report.was_up_to_date() {
                println!("  corpus was already up to date");
            }
            println!("ok");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }
    Ok(())
}
