//! Command line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use gatecheck_core::LogFormat;

/// Gatecheck: authorization conformance probes for S3-compatible gateways.
#[derive(Parser)]
#[command(name = "gatecheck")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (overrides config; RUST_LOG overrides both).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (overrides config).
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormatArg>,

    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run a scenario against a live gateway.
    Run(RunArgs),
    /// Run a scenario against the in-memory reference gateway.
    Rehearse(RehearseArgs),
    /// Parse and check a scenario file without running it.
    Validate(ValidateArgs),
    /// List the built-in scenarios.
    List(ListArgs),
    /// Print version information.
    Version,
}

/// Which scenario to run.
#[derive(Args)]
pub struct ScenarioSource {
    /// Scenario file (TOML).
    #[arg(conflicts_with = "builtin", required_unless_present = "builtin")]
    pub file: Option<PathBuf>,

    /// Name of a built-in scenario.
    #[arg(short, long)]
    pub builtin: Option<String>,
}

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: ScenarioSource,

    /// Path to configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// S3 endpoint URL (overrides config).
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Deadline for every adapter call in milliseconds (overrides config).
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Leave provisioned principals in place after the run.
    #[arg(long)]
    pub no_teardown: bool,

    /// Suffix for every principal id and bucket name (overrides config).
    #[arg(long, conflicts_with = "isolate")]
    pub namespace: Option<String>,

    /// Use a fresh random namespace.
    #[arg(long)]
    pub isolate: bool,

    /// Base directory for file payloads (overrides config).
    #[arg(long)]
    pub payload_dir: Option<PathBuf>,

    /// Output format (text, json).
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the rehearse command.
#[derive(Args)]
pub struct RehearseArgs {
    #[command(flatten)]
    pub source: ScenarioSource,

    /// Base directory for file payloads.
    #[arg(long)]
    pub payload_dir: Option<PathBuf>,

    /// Output format (text, json).
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the validate command.
#[derive(Args)]
pub struct ValidateArgs {
    /// Scenario file (TOML).
    pub file: PathBuf,
}

/// Arguments for the list command.
#[derive(Args)]
pub struct ListArgs {
    /// Output format (text, json).
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for CLI commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format as accepted on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable format.
    Pretty,
    /// JSON format.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}
