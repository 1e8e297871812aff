//! Configuration file discovery
//!
//! Finds the settings file in the standard locations.

use std::path::PathBuf;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./assembly-runner.yaml",
    "./assembly-runner.yml",
    "./.assembly-runner.yaml",
    "./assembly-runner.json",
];

/// Directory under the user config dir holding `config.yaml`
const USER_CONFIG_DIR: &str = "assembly-runner";

/// Find a configuration file in the standard locations
pub fn find_config() -> Option<PathBuf> {
    candidates().into_iter().find(|path| path.exists())
}

fn candidates() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = CONFIG_LOCATIONS.iter().map(PathBuf::from).collect();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join(USER_CONFIG_DIR).join("config.yaml"));
    }
    paths
}
