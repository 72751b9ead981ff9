//! Gatecheck: authorization conformance probes for S3-compatible gateways.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use gatecheck_core::{Config, LogFormat};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
mod commands;

use cli::{Cli, Commands};

/// Exit code for failures before any scenario could run.
const EXIT_SETUP: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_SETUP)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let overrides = LogOverrides { level: cli.log_level, format: cli.log_format.map(Into::into) };

    match cli.command {
        Commands::Run(args) => commands::run(args, &overrides).await,
        Commands::Rehearse(args) => commands::rehearse(args, &overrides).await,
        Commands::Validate(args) => commands::validate(&args),
        Commands::List(args) => commands::list(&args),
        Commands::Version => {
            println!("gatecheck {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Logging settings given on the command line.
pub(crate) struct LogOverrides {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path).context("Failed to load configuration")?,
        None => Config::default(),
    };
    Ok(config)
}

/// Installs the global subscriber. Logs go to stderr so reports on stdout stay parseable.
fn init_logging(config: &Config, overrides: &LogOverrides) -> Result<()> {
    let level = overrides.level.as_deref().unwrap_or(&config.logging.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level {level:?}"))?;

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match overrides.format.unwrap_or(config.logging.format) {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }

    Ok(())
}
