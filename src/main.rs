//! Guest Runtime CLI entry point.
//!
//! Runs one exported function of a WebAssembly guest module and prints the
//! decoded result together with the recorded host calls as JSON.

mod cli;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use guest_runtime_common::{ConfigFile, LogConfig};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let mut file = match &args.config {
                Some(path) => ConfigFile::from_file(path)
                    .with_context(|| format!("Invalid configuration file {}", path.display()))?,
                None => ConfigFile::default(),
            };
            args.apply(&mut file);

            init_tracing(&file.log);
            info!("Starting Guest Runtime");

            let output = cli::run(args, &file).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Initialize tracing on stderr; stdout carries the result document.
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let registry = tracing_subscriber::registry().with(filter);

    if log.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
