//! Assembly Runner - parallel-by-assembly test scheduler
//!
//! Runs test assemblies through an external runner program, scheduling
//! parallel-safe assemblies concurrently and the rest one at a time, and
//! collects the reported results into a single run report.
//!
//! ## Features
//!
//! - Parallel phase bounded by a maximum degree of parallelism
//! - Assembly classification by name pattern or marker attribute
//! - Per-test output capture, categorized into result messages
//! - Cooperative cancellation (Ctrl-C) at test boundaries
//! - Multiple output formats (Table, JSON, CSV)
//!
//! ## Usage
//!
//! ```bash
//! # Run assemblies, *.Tests.dll ones in parallel
//! assembly-runner run bin/*.dll --runner nunit-host --catalog tests.json --parallel --pattern '*.Tests.dll'
//!
//! # Run selected tests from a catalog
//! assembly-runner select T1 T2 --catalog tests.json --runner nunit-host
//!
//! # Show how assemblies would be scheduled
//! assembly-runner classify bin/*.dll --parallel
//!
//! # Write default settings
//! assembly-runner config init
//! ```

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

mod cli;
mod collector;
mod config;
mod executor;
mod models;
mod output;
mod sink;
mod utils;

use cli::{Args, ReportArgs, RunnerArgs};
use config::{EnvConfig, RunSettings, FORCE_ERROR_VERBOSITY};
use executor::{
    Classifier, ProcessRunnerFactory, RunContext, RunState, Scheduler, SidecarMetadataReader,
};
use models::{AssemblyDescriptor, RunReport, TestCatalog};
use output::{write_report_to_file, OutputFormat, ResultFormatter};
use sink::{ConsoleSink, HostLogger};
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_verbose(args.verbose));
    init_logger(level);

    let config_path = args.config.clone();
    let success = match args.command {
        cli::Command::Run(run_args) => run_assemblies(run_args, config_path.as_deref()).await?,
        cli::Command::Select(select_args) => {
            run_selection(select_args, config_path.as_deref()).await?
        }
        cli::Command::Classify(classify_args) => {
            classify(classify_args, config_path.as_deref())?;
            true
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, config_path.as_deref())?;
            true
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

/// File (or discovered) settings with environment overrides applied
fn load_settings(config_path: Option<&str>) -> Result<RunSettings> {
    let env = EnvConfig::load();
    let path = config_path.map(String::from).or_else(|| env.config_file.clone());

    let mut settings = match path {
        Some(path) => RunSettings::load(&path)?,
        None => RunSettings::load_default()?,
    };
    env.apply_to(&mut settings);
    Ok(settings)
}

fn build_scheduler(runner: RunnerArgs) -> Arc<Scheduler> {
    let factory = ProcessRunnerFactory::new(runner.runner).with_args(runner.runner_args);
    Arc::new(Scheduler::new(
        Arc::new(factory),
        Arc::new(SidecarMetadataReader),
    ))
}

/// First Ctrl-C cancels the run at the next test boundary, a second one
/// kills the runners still going. Stops when the returned handle is aborted.
fn cancel_on_interrupt(scheduler: &Arc<Scheduler>) -> tokio::task::JoinHandle<()> {
    let scheduler = scheduler.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, cancelling test run (press Ctrl-C again to stop runners)");
        scheduler.cancel().await;

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted again, stopping runners");
            scheduler.dispose().await;
        }
    })
}

fn finish_run(sink: &ConsoleSink, started_at: DateTime<Utc>, args: &ReportArgs) -> Result<RunReport> {
    if sink.shutdown_after_run() == Some(false) {
        info!("Runner engine kept alive at host request");
    }
    let report = sink.take_report(started_at);
    emit_report(&report, args)?;
    Ok(report)
}

async fn run_assemblies(args: cli::RunArgs, config_path: Option<&str>) -> Result<bool> {
    let mut settings = load_settings(config_path)?;
    args.settings.apply_to(&mut settings);

    let catalog = TestCatalog::load(&args.catalog)?;
    if catalog.is_empty() {
        warn!("Test catalog {} is empty, no results will be reported", args.catalog);
    }
    let verbosity = settings.verbosity;

    let scheduler = build_scheduler(args.runner);
    let sink = Arc::new(ConsoleSink::new());
    let ctx = RunContext::new(settings, catalog, sink.clone()).with_keep_alive(args.report.keep_alive);
    let assemblies: Vec<AssemblyDescriptor> =
        args.assemblies.into_iter().map(AssemblyDescriptor::from).collect();

    info!("Running {} assemblies", assemblies.len());
    let started_at = Utc::now();
    let interrupt = cancel_on_interrupt(&scheduler);
    let state = scheduler.run_tests(assemblies, &ctx).await;
    interrupt.abort();

    let report = finish_run(&sink, started_at, &args.report)?;
    Ok(finished_cleanly(state, &report, verbosity))
}

async fn run_selection(args: cli::SelectArgs, config_path: Option<&str>) -> Result<bool> {
    let mut settings = load_settings(config_path)?;
    if let Some(verbosity) = args.verbosity {
        settings.verbosity = verbosity;
    }
    let verbosity = settings.verbosity;

    let catalog = TestCatalog::load(&args.catalog)?;
    let tests = catalog.select(args.test_ids.iter().map(String::as_str));
    for id in &args.test_ids {
        if catalog.resolve(id).is_none() {
            warn!("Test {} is not in catalog {}", id, args.catalog);
        }
    }
    if tests.is_empty() {
        bail!("None of the selected tests are in catalog {}", args.catalog);
    }

    let scheduler = build_scheduler(args.runner);
    let sink = Arc::new(ConsoleSink::new());
    let ctx = RunContext::new(settings, catalog, sink.clone()).with_keep_alive(args.report.keep_alive);

    info!("Running {} selected tests", tests.len());
    let started_at = Utc::now();
    let interrupt = cancel_on_interrupt(&scheduler);
    let state = scheduler.run_selected(&tests, &ctx).await;
    interrupt.abort();

    let report = finish_run(&sink, started_at, &args.report)?;
    Ok(finished_cleanly(state, &report, verbosity))
}

/// At verbosity 99 every host message is an error, so only failed tests count
fn finished_cleanly(state: RunState, report: &RunReport, verbosity: u32) -> bool {
    if state != RunState::Completed {
        warn!("Test run {}", state);
        return false;
    }
    if verbosity >= FORCE_ERROR_VERBOSITY {
        report.failed == 0
    } else {
        report.is_success()
    }
}

fn emit_report(report: &RunReport, args: &ReportArgs) -> Result<()> {
    let format = OutputFormat::from_str(&args.format).unwrap_or(OutputFormat::Table);
    let formatter = ResultFormatter::new(format);
    println!("{}", formatter.format_report(report));

    if let Some(path) = &args.output {
        write_report_to_file(path, report, format)?;
        info!("Report saved to {}", path);
    }
    Ok(())
}

fn classify(args: cli::ClassifyArgs, config_path: Option<&str>) -> Result<()> {
    let mut settings = load_settings(config_path)?;
    args.settings.apply_to(&mut settings);
    settings.validate().context("Invalid run settings")?;

    let classifier = Classifier::new(&settings, Arc::new(SidecarMetadataReader))?;
    let logger = HostLogger::new(Arc::new(ConsoleSink::new()), settings.verbosity);
    let base = std::env::current_dir().context("Failed to read working directory")?;

    println!("\nAssembly Classification:");
    println!("─────────────────────────────────────────────────────────────");
    for assembly in args.assemblies {
        let assembly = AssemblyDescriptor::from(assembly).resolve_against(&base);
        let classification = classifier.classify(&assembly, &logger);
        println!(
            "  {:10} {} ({})",
            classification.mode.to_string(),
            assembly,
            classification.reason
        );
    }
    println!("─────────────────────────────────────────────────────────────");
    println!(
        "Parallel phase: {} | Max parallelism: {}",
        if settings.parallelize_assemblies { "enabled" } else { "disabled" },
        settings.max_degree_of_parallelism
    );

    Ok(())
}

fn manage_config(args: cli::ConfigArgs, config_path: Option<&str>) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { path, force } => {
            if Path::new(&path).exists() && !force {
                bail!("Configuration file already exists: {path}. Use --force to overwrite.");
            }

            RunSettings::default().save(&path)?;
            println!("✓ Configuration file created: {path}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { format } => {
            let settings = load_settings(config_path)?;
            let output = if format == "json" {
                serde_json::to_string_pretty(&settings)?
            } else {
                serde_yaml::to_string(&settings)?
            };
            println!("{output}");
        }
    }

    Ok(())
}
