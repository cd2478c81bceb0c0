//! strato - declarative infrastructure reconciliation.

mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use output::OutputFormat;

#[derive(Parser)]
#[command(name = "strato")]
#[command(author, version, about = "Reconcile declared infrastructure resources against a backend", long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show what an apply would change, without touching the backend
  Plan {
    /// Path to the declaration file
    #[arg(default_value = "strato.toml")]
    config: PathBuf,

    /// Directory holding apply records
    #[arg(long, default_value = ".strato/state")]
    state_dir: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
  },

  /// Reconcile declared resources against the backend
  Apply {
    /// Path to the declaration file
    #[arg(default_value = "strato.toml")]
    config: PathBuf,

    /// Directory holding apply records
    #[arg(long, default_value = ".strato/state")]
    state_dir: PathBuf,

    /// Directory the local backend provisions into
    #[arg(long, default_value = ".strato/resources")]
    backend_dir: PathBuf,

    /// Maximum concurrent backend operations
    #[arg(long)]
    parallelism: Option<usize>,
  },

  /// List recorded resource state
  State {
    /// Directory holding apply records
    #[arg(long, default_value = ".strato/state")]
    state_dir: PathBuf,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .init();

  let cli = Cli::parse();

  match cli.command {
    Commands::Plan {
      config,
      state_dir,
      format,
    } => cmd::cmd_plan(&config, &state_dir, format),
    Commands::Apply {
      config,
      state_dir,
      backend_dir,
      parallelism,
    } => cmd::cmd_apply(&config, &state_dir, &backend_dir, parallelism),
    Commands::State { state_dir } => cmd::cmd_state(&state_dir),
  }
}
