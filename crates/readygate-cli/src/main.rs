use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use readygate_core::ReadyGateConfig;
use tracing_subscriber::{EnvFilter, fmt};

mod commands;

#[derive(Parser)]
#[command(
    name = "readygate",
    about = "Readiness gate for the local inference runtime: install, serve, pull"
)]
struct Cli {
    /// Path to readygate.toml (default: ./readygate.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Runtime base URL, overriding config and READYGATE_BASE_URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Runtime binary name or path
    #[arg(long, global = true)]
    binary: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Make sure the runtime is installed, serving, and has the model
    Ensure {
        /// Model to provision (default: OLLAMA_MODEL, then config)
        #[arg(long)]
        model: Option<String>,

        /// Keep a server started by this command running until Ctrl-C
        #[arg(long)]
        hold: bool,
    },
    /// Show installed version, server liveness and local models
    Status,
    /// Install the runtime binary if it is missing
    Install,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // stdout carries command output; logs go to stderr.
    fmt()
        .with_env_filter(EnvFilter::from_env("READYGATE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ReadyGateConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    if let Some(base_url) = cli.base_url {
        config.runtime.base_url = base_url;
    }
    if let Some(binary) = cli.binary {
        config.runtime.binary = binary;
    }

    match cli.command {
        Command::Ensure { model, hold } => {
            if let Some(model) = model {
                config.model.name = model;
            }
            commands::ensure(&config, hold).await
        }
        Command::Status => commands::status(&config).await,
        Command::Install => commands::install(&config).await,
    }
}
