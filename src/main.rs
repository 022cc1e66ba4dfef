use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use photoqueue::config::AppConfig;
use photoqueue::simulate::{render_table, SimulationConfig};

#[derive(Parser)]
#[command(
    name = "photoqueue",
    about = "Admission control for AI photo-enhancement jobs",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (falls back to $PHOTOQUEUE_CONFIG, ./photoqueue.toml, defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Push a synthetic workload through the admission queue
    Simulate {
        /// Number of jobs to submit
        #[arg(long, default_value = "40")]
        jobs: usize,

        /// Shortest simulated enhancement time
        #[arg(long, default_value = "50")]
        min_work_ms: u64,

        /// Longest simulated enhancement time
        #[arg(long, default_value = "400")]
        max_work_ms: u64,

        /// Delay between consecutive submissions
        #[arg(long, default_value = "5")]
        arrival_gap_ms: u64,

        /// Fraction of submissions that reuse an earlier job id
        #[arg(long, default_value = "0.1")]
        duplicates: f64,

        /// RNG seed for a reproducible workload
        #[arg(long)]
        seed: Option<u64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Validate the configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = tracing::subscriber::with_default(photoqueue::logging::bootstrap(), || {
        AppConfig::resolve(cli.config.as_deref())
    })?;
    photoqueue::logging::init(&config.logging)?;

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Check => {
                println!(
                    "Configuration OK: {} concurrent, {} waiting, {}ms timeout",
                    config.queue.max_concurrent,
                    config.queue.max_queue_size,
                    config.queue.processing_timeout_ms
                );
            }
        },
        Commands::Simulate {
            jobs,
            min_work_ms,
            max_work_ms,
            arrival_gap_ms,
            duplicates,
            seed,
            json,
        } => {
            let sim = SimulationConfig {
                jobs,
                min_work_ms,
                max_work_ms,
                arrival_gap_ms,
                duplicate_ratio: duplicates,
                seed,
            };
            tracing::info!(%jobs, ?seed, "Running simulation");
            let report = photoqueue::simulate(&config, &sim).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_table(&report));
            }
        }
    }

    Ok(())
}
