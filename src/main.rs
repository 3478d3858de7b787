use std::process::ExitCode;

use clap::Parser;

mod cli;
mod commands;
mod config;
mod db;
mod error;
mod feed;
mod ingest;
mod models;
mod scheduler;

use cli::Cli;
use commands::Context;
use config::Config;
use db::Repository;
use error::Result;

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so command output on stdout stays clean.
    // RUST_LOG overrides the default of info for gator, warn for dependencies.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gator=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    // Usage errors (including a bad `agg` interval) exit here, before any polling.
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path)?;
    let repo = Repository::new(&config.prepare_db_path()?).await?;

    let ctx = Context {
        repo,
        config,
        config_path,
    };
    commands::run(cli.command, &ctx).await
}
