//! Configuration module
//!
//! Run settings consumed by the scheduler and collector, plus loading,
//! saving and validation.

mod env;
mod file;

pub use env::EnvConfig;
pub use file::find_config;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Marker attribute searched for when no name pattern matches
pub const DEFAULT_MARKER_ATTRIBUTE: &str = "AssemblyParallelize";

/// Verbosity at which every host message is escalated to error level
pub const FORCE_ERROR_VERBOSITY: u32 = 99;

/// Settings validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("max_degree_of_parallelism must be at least 1")]
    ZeroParallelism,

    #[error("parallelize_assemblies_marker_attribute must not be empty")]
    EmptyMarkerAttribute,

    #[error("Invalid assembly name pattern: {0:?}")]
    EmptyPattern(String),
}

/// Run settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Glob patterns selecting assemblies for parallel execution
    pub parallelize_assemblies_names: Vec<String>,

    /// Assembly attribute name that marks an assembly as parallel
    pub parallelize_assemblies_marker_attribute: String,

    /// Master switch for parallel-by-assembly mode
    pub parallelize_assemblies: bool,

    /// Maximum number of assemblies running at once
    pub max_degree_of_parallelism: usize,

    /// Fold every output channel into stdout
    pub combine_output_into_stdout: bool,

    /// Also forward test output to the host log as it arrives
    pub emit_output_as_message: bool,

    /// Keep the test engine alive between runs when the host allows it
    pub keep_engine_running: bool,

    /// Host log verbosity; 0 hides debug messages
    pub verbosity: u32,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            parallelize_assemblies_names: Vec::new(),
            parallelize_assemblies_marker_attribute: DEFAULT_MARKER_ATTRIBUTE.to_string(),
            parallelize_assemblies: false,
            max_degree_of_parallelism: num_cpus::get(),
            combine_output_into_stdout: false,
            emit_output_as_message: true,
            keep_engine_running: false,
            verbosity: 0,
        }
    }
}

impl RunSettings {
    /// Load settings from file (YAML by extension, JSON otherwise)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        Ok(settings)
    }

    /// Load from the first config file found, falling back to defaults
    pub fn load_default() -> Result<Self> {
        match find_config() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Save settings to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), SettingsError> {
        if self.max_degree_of_parallelism == 0 {
            return Err(SettingsError::ZeroParallelism);
        }
        if self.parallelize_assemblies_marker_attribute.trim().is_empty() {
            return Err(SettingsError::EmptyMarkerAttribute);
        }
        if let Some(pattern) = self
            .parallelize_assemblies_names
            .iter()
            .find(|p| p.trim().is_empty())
        {
            return Err(SettingsError::EmptyPattern(pattern.clone()));
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn with_parallel(mut self, enabled: bool) -> Self {
        self.parallelize_assemblies = enabled;
        self
    }

    #[cfg(test)]
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parallelize_assemblies_names = patterns.into_iter().map(Into::into).collect();
        self
    }

    #[cfg(test)]
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_degree_of_parallelism = max;
        self
    }
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_settings() {
        let settings = RunSettings::default();
        assert_eq!(
            settings.parallelize_assemblies_marker_attribute,
            DEFAULT_MARKER_ATTRIBUTE
        );
        assert!(!settings.parallelize_assemblies);
        assert!(settings.emit_output_as_message);
        assert!(settings.max_degree_of_parallelism >= 1);
        assert_eq!(settings.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let settings = RunSettings::default().with_max_parallelism(0);
        assert_eq!(settings.validate(), Err(SettingsError::ZeroParallelism));
    }

    #[test]
    fn test_validate_rejects_blank_pattern() {
        let settings = RunSettings::default().with_patterns(["*.Tests.dll", " "]);
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::EmptyPattern(_))
        ));
    }

    #[test]
    fn test_save_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/settings.yaml");

        let settings = RunSettings::default()
            .with_parallel(true)
            .with_patterns(["*.Tests.dll"])
            .with_max_parallelism(3);
        settings.save(&path).unwrap();

        let loaded = RunSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"parallelize_assemblies": true}"#).unwrap();

        let loaded = RunSettings::load(&path).unwrap();
        assert!(loaded.parallelize_assemblies);
        assert_eq!(
            loaded.parallelize_assemblies_marker_attribute,
            DEFAULT_MARKER_ATTRIBUTE
        );
    }
}
