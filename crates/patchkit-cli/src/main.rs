use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

mod dispatch;
mod render;

#[cfg(test)]
mod tests;

const LOG_ENV_VAR: &str = "PATCHKIT_LOG";

#[derive(Parser, Debug)]
#[command(name = "patchkit")]
#[command(
    about = "Provision throwaway dotnet installations patched with locally built packages",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Clone, patch and warm up an environment, then print its descriptor.
    Provision {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Leave the environment on disk instead of tearing it down.
        #[arg(long)]
        keep: bool,
        #[arg(long)]
        json: bool,
    },
    /// Provision an environment and run one tool invocation inside it.
    Exec {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = ".")]
        working_dir: PathBuf,
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long)]
        keep: bool,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// List the packages in a feed directory, or resolve one package id.
    Feed {
        dir: PathBuf,
        #[arg(long)]
        id: Option<String>,
    },
    /// Apply the runtime manifest patch to an existing SDK directory.
    PatchManifest {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        sdk_dir: PathBuf,
    },
    /// Print the built-in configuration as TOML.
    ConfigTemplate,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    dispatch::run_cli(cli)
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
