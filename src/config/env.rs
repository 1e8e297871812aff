//! Environment variable configuration
//!
//! Provides environment variable overrides for run settings.

use std::env;

use super::RunSettings;

/// Environment variable prefix
const ENV_PREFIX: &str = "ASSEMBLY_RUNNER";

/// Overrides read from ASSEMBLY_RUNNER_* variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// From ASSEMBLY_RUNNER_PARALLEL
    pub parallel: Option<bool>,
    /// From ASSEMBLY_RUNNER_MAX_PARALLEL
    pub max_parallel: Option<usize>,
    /// From ASSEMBLY_RUNNER_PATTERNS (comma-separated)
    pub patterns: Option<Vec<String>>,
    /// From ASSEMBLY_RUNNER_MARKER
    pub marker: Option<String>,
    /// From ASSEMBLY_RUNNER_COMBINE_OUTPUT
    pub combine_output: Option<bool>,
    /// From ASSEMBLY_RUNNER_EMIT_OUTPUT
    pub emit_output: Option<bool>,
    /// From ASSEMBLY_RUNNER_VERBOSITY
    pub verbosity: Option<u32>,
    /// From ASSEMBLY_RUNNER_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            parallel: get_env_bool("PARALLEL"),
            max_parallel: get_env_parse("MAX_PARALLEL"),
            patterns: get_env("PATTERNS").map(|v| split_list(&v)),
            marker: get_env("MARKER"),
            combine_output: get_env_bool("COMBINE_OUTPUT"),
            emit_output: get_env_bool("EMIT_OUTPUT"),
            verbosity: get_env_parse("VERBOSITY"),
            config_file: get_env("CONFIG"),
        }
    }

    /// Apply every override that is set
    pub fn apply_to(&self, settings: &mut RunSettings) {
        if let Some(parallel) = self.parallel {
            settings.parallelize_assemblies = parallel;
        }
        if let Some(max) = self.max_parallel {
            settings.max_degree_of_parallelism = max;
        }
        if let Some(patterns) = &self.patterns {
            settings.parallelize_assemblies_names = patterns.clone();
        }
        if let Some(marker) = &self.marker {
            settings.parallelize_assemblies_marker_attribute = marker.clone();
        }
        if let Some(combine) = self.combine_output {
            settings.combine_output_into_stdout = combine;
        }
        if let Some(emit) = self.emit_output {
            settings.emit_output_as_message = emit;
        }
        if let Some(verbosity) = self.verbosity {
            settings.verbosity = verbosity;
        }
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| parse_bool(&v))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
