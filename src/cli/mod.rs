//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::config::RunSettings;
use crate::utils::LogLevel;

/// Test assembly scheduler and result collector
#[derive(Parser, Debug)]
#[command(name = "assembly-runner")]
#[command(version = "0.1.0")]
#[command(about = "Run test assemblies in parallel and sequential phases")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error), overrides --verbose
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Settings file (overrides discovery and ASSEMBLY_RUNNER_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run whole assemblies
    Run(RunArgs),

    /// Run selected tests, grouped by source assembly
    Select(SelectArgs),

    /// Show how each assembly would be scheduled
    Classify(ClassifyArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// External runner invocation
#[derive(ClapArgs, Debug)]
pub struct RunnerArgs {
    /// Program launched once per assembly
    #[arg(short, long)]
    pub runner: String,

    /// Extra argument passed to the runner before the assembly
    #[arg(long = "runner-arg", allow_hyphen_values = true)]
    pub runner_args: Vec<String>,
}

/// Overrides applied on top of file and environment settings
#[derive(ClapArgs, Debug, Default)]
pub struct SettingsArgs {
    /// Enable the parallel phase
    #[arg(short, long)]
    pub parallel: bool,

    /// Maximum assemblies running at once in the parallel phase
    #[arg(short, long)]
    pub max_parallel: Option<usize>,

    /// Glob of assembly paths to run in parallel (repeatable)
    #[arg(long = "pattern")]
    pub patterns: Vec<String>,

    /// Attribute name marking an assembly as parallel-safe
    #[arg(long)]
    pub marker: Option<String>,

    /// Route all captured output into the stdout message
    #[arg(long)]
    pub combine_output: bool,

    /// Host message verbosity (99 reports everything as errors)
    #[arg(long)]
    pub verbosity: Option<u32>,
}

impl SettingsArgs {
    pub fn apply_to(&self, settings: &mut RunSettings) {
        if self.parallel {
            settings.parallelize_assemblies = true;
        }
        if let Some(max) = self.max_parallel {
            settings.max_degree_of_parallelism = max;
        }
        if !self.patterns.is_empty() {
            settings.parallelize_assemblies_names = self.patterns.clone();
        }
        if let Some(marker) = &self.marker {
            settings.parallelize_assemblies_marker_attribute = marker.clone();
        }
        if self.combine_output {
            settings.combine_output_into_stdout = true;
        }
        if let Some(verbosity) = self.verbosity {
            settings.verbosity = verbosity;
        }
    }
}

/// Report rendering options
#[derive(ClapArgs, Debug)]
pub struct ReportArgs {
    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Save the report to file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Ask the host to keep the engine alive after the run
    #[arg(long)]
    pub keep_alive: bool,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Assembly paths, relative ones resolved against the working directory
    #[arg(required = true)]
    pub assemblies: Vec<String>,

    #[command(flatten)]
    pub runner: RunnerArgs,

    /// JSON test catalog used to resolve reported test ids
    #[arg(long)]
    pub catalog: String,

    #[command(flatten)]
    pub settings: SettingsArgs,

    #[command(flatten)]
    pub report: ReportArgs,
}

/// Arguments for select command
#[derive(Parser, Debug)]
pub struct SelectArgs {
    /// Unique test ids to run
    #[arg(required = true)]
    pub test_ids: Vec<String>,

    /// JSON test catalog the ids are looked up in
    #[arg(long)]
    pub catalog: String,

    #[command(flatten)]
    pub runner: RunnerArgs,

    /// Host message verbosity
    #[arg(long)]
    pub verbosity: Option<u32>,

    #[command(flatten)]
    pub report: ReportArgs,
}

/// Arguments for classify command
#[derive(Parser, Debug)]
pub struct ClassifyArgs {
    #[arg(required = true)]
    pub assemblies: Vec<String>,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective settings
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Write default settings to a file
    Init {
        /// Output path
        #[arg(default_value = "./assembly-runner.yaml")]
        path: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
