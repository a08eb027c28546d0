// src/config.rs

//! Command-line surface and the resolved, validated benchmark configuration.

use anyhow::{Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Load benchmarker for the Isubata chat service.
#[derive(Parser, Debug)]
#[command(name = "isubench", version, about)]
pub struct Cli {
    /// Comma-separated `host:port` targets to benchmark.
    #[arg(long, value_delimiter = ',', required = true)]
    pub remotes: Vec<String>,

    /// Path to the fixture data directory.
    #[arg(long, default_value = "./data")]
    pub data: PathBuf,

    /// Total duration of the benchmark window (e.g. `60s`, `2m`).
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub duration: Duration,

    /// Where to write the result JSON; stdout always mirrors it.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Opaque job id echoed into the result.
    #[arg(long, default_value = "")]
    pub jobid: String,

    /// Run the preflight validation only, then exit with score zero.
    #[arg(long)]
    pub test: bool,

    /// Tag requests with X-Request-ID / X-Username and log request lines.
    #[arg(long)]
    pub debug: bool,

    /// Disable the once-per-second load-level promoter.
    #[arg(long)]
    pub nolevelup: bool,
}

/// The resolved configuration the runner consumes.
#[derive(Debug, Clone)]
pub struct Config {
    pub remotes: Vec<String>,
    pub data_dir: PathBuf,
    pub duration: Duration,
    pub output: Option<PathBuf>,
    pub job_id: String,
    pub test_only: bool,
    pub debug: bool,
    pub no_levelup: bool,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let config = Self {
            remotes: cli.remotes,
            data_dir: cli.data,
            duration: cli.duration,
            output: cli.output,
            job_id: cli.jobid,
            test_only: cli.test,
            debug: cli.debug,
            no_levelup: cli.nolevelup,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration for logical consistency.
    fn validate(&self) -> Result<()> {
        if self.remotes.is_empty() {
            return Err(anyhow!("at least one remote is required"));
        }
        for remote in &self.remotes {
            if remote.trim().is_empty() {
                return Err(anyhow!("remotes must not contain empty entries"));
            }
        }
        if self.duration.is_zero() {
            return Err(anyhow!("duration cannot be 0"));
        }
        Ok(())
    }
}
