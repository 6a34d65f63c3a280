//! Binary crate for the `weather-relay` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Interactive configuration
//! - Running the companion and device ends of the relay
//! - Human-friendly output formatting

use anyhow::Result;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;

fn init_logging() -> Result<()> {
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env()?,
            )
            .with_writer(std::io::stderr)
            .finish(),
    )?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cmd = cli::Cli::parse();
    cmd.run().await
}
