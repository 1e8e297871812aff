//! Test execution engine
//!
//! Classifies assemblies, runs them through per-assembly execution units
//! and schedules the units across the parallel and sequential phases.

mod classifier;
mod process;
mod runner;
mod scheduler;
mod unit;

#[cfg(test)]
pub mod testing;

pub use classifier::{Classifier, SidecarMetadataReader};
pub use process::ProcessRunnerFactory;
pub use scheduler::{RunContext, RunState, Scheduler};
