//! Data models for assembly test runs
//!
//! This module contains all data structures used throughout the application.

mod assembly;
mod event;
mod test_result;

pub use assembly::{
    group_by_source, AssemblyDescriptor, ExecutionMode, TestCatalog, TestDescriptor, TestFilter,
};
pub use event::{OutputChannel, RawEvent, RawTestResult};
#[cfg(test)]
pub use event::{FailureSite, ResultState};
pub use test_result::{
    MessageCategory, NormalizedResult, ResultMessage, RunReport, TestOutcome,
};
