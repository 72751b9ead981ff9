//! Command handlers.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use gatecheck_adapters::{MemoryGateway, ProcessRunner, RadosgwAdmin, S3Gateway};
use gatecheck_core::Config;
use gatecheck_harness::{builtin, builtin_names, Namespace, Report, RunOptions, Runner, Scenario};
use tracing::info;
use uuid::Uuid;

use crate::cli::{ListArgs, OutputFormat, RehearseArgs, RunArgs, ScenarioSource, ValidateArgs};
use crate::{init_logging, load_config, LogOverrides};

fn load_scenario(source: &ScenarioSource) -> Result<Scenario> {
    match (&source.file, &source.builtin) {
        (Some(path), None) => Scenario::from_file(path)
            .with_context(|| format!("Failed to load scenario {}", path.display())),
        (None, Some(name)) => Ok(builtin(name)?),
        _ => bail!("give either a scenario file or --builtin"),
    }
}

fn print_report(report: &Report, format: OutputFormat) -> Result<ExitCode> {
    match format {
        OutputFormat::Text => println!("{report}"),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    Ok(ExitCode::from(report.exit_code()))
}

/// Applies command line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if let Some(endpoint) = &args.endpoint {
        config.endpoint.url.clone_from(endpoint);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.run.call_timeout_ms = timeout_ms;
    }
    if args.no_teardown {
        config.run.teardown = false;
    }
    if let Some(namespace) = &args.namespace {
        config.run.namespace = Some(namespace.clone());
    }
    if args.isolate {
        let id = Uuid::new_v4().simple().to_string();
        config.run.namespace = Some(format!("gc{}", &id[..8]));
    }
    if let Some(dir) = &args.payload_dir {
        config.run.payload_dir.clone_from(dir);
    }
}

/// Runs a scenario against the configured gateway and admin command.
pub(crate) async fn run(args: RunArgs, overrides: &LogOverrides) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate()?;
    init_logging(&config, overrides)?;

    let scenario = load_scenario(&args.source)?;
    let call_timeout = config.run.call_timeout();

    let admin = RadosgwAdmin::new(ProcessRunner::new(&config.admin, call_timeout)?);
    let gateway = S3Gateway::new(&config.endpoint, call_timeout)?;

    info!(
        scenario = scenario.name(),
        endpoint = %config.endpoint.url,
        namespace = config.run.namespace.as_deref().unwrap_or("-"),
        "starting run"
    );

    let runner = Runner::new(Arc::new(admin), Arc::new(gateway), RunOptions::from(&config.run));
    let report = runner.run(&scenario).await;
    print_report(&report, args.format)
}

/// Runs a scenario against the in-memory reference gateway.
pub(crate) async fn rehearse(args: RehearseArgs, overrides: &LogOverrides) -> Result<ExitCode> {
    let config = Config::default();
    init_logging(&config, overrides)?;

    let scenario = load_scenario(&args.source)?;
    let mut options = RunOptions::from(&config.run);
    if let Some(dir) = args.payload_dir {
        options.payload_dir = dir;
    }

    info!(scenario = scenario.name(), "rehearsing against the in-memory gateway");

    let gateway = MemoryGateway::new();
    let runner = Runner::new(Arc::new(gateway.clone()), Arc::new(gateway), options);
    let report = runner.run(&scenario).await;
    print_report(&report, args.format)
}

/// Parses a scenario file and renders its policies.
pub(crate) fn validate(args: &ValidateArgs) -> Result<ExitCode> {
    let scenario = Scenario::from_file(&args.file)
        .with_context(|| format!("Invalid scenario {}", args.file.display()))?;
    let policies = scenario.render_policies(&Namespace::default())?;

    println!(
        "ok: {} ({} principals, {} buckets, {} payloads, {} policies, {} probes)",
        scenario.name(),
        scenario.principals().len(),
        scenario.buckets().len(),
        scenario.payloads().len(),
        policies.len(),
        scenario.probes().len()
    );
    Ok(ExitCode::SUCCESS)
}

/// Lists the built-in scenarios.
pub(crate) fn list(args: &ListArgs) -> Result<ExitCode> {
    let scenarios =
        builtin_names().iter().map(|name| builtin(name)).collect::<Result<Vec<_>, _>>()?;

    match args.format {
        OutputFormat::Text => {
            for scenario in &scenarios {
                println!(
                    "{:<20} {:>3} probes  {}",
                    scenario.name(),
                    scenario.probes().len(),
                    scenario.description()
                );
            }
        }
        OutputFormat::Json => {
            let entries: Vec<_> = scenarios
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "name": s.name(),
                        "description": s.description(),
                        "probes": s.probes().len(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}
