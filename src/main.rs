// src/main.rs

//! The benchmarker entry point.

use anyhow::Result;
use clap::Parser;
use isubench::config::{Cli, Config};
use isubench::runner;
use std::fs;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging with compact format and ANSI colors.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .with_ansi(true)
        .init();

    // A broken configuration is the only thing worth a nonzero exit; a
    // failing benchmark still produces a result document.
    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    info!("remotes {:?}", config.remotes);

    let result = runner::run(&config).await?;

    let encoded = serde_json::to_string(&result)?;
    println!("{encoded}");

    if let Some(path) = &config.output {
        fs::write(path, &encoded)?;
        info!("result json saved to {}", path.display());
    }

    Ok(())
}
