//! Console result sink
//!
//! Sink used by the CLI: logs lifecycle events through `tracing` and
//! collects results for the final report.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use super::{MessageLevel, ResultSink};
use crate::models::{NormalizedResult, RunReport, TestDescriptor, TestOutcome};

#[derive(Debug, Default)]
pub struct ConsoleSink {
    results: Mutex<Vec<NormalizedResult>>,
    errors: Mutex<Vec<String>>,
    shutdown_after_run: Mutex<Option<bool>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn result_count(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn shutdown_after_run(&self) -> Option<bool> {
        *self
            .shutdown_after_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain collected results and errors into a report
    pub fn take_report(&self, started_at: DateTime<Utc>) -> RunReport {
        let results = std::mem::take(&mut *self.results.lock().unwrap_or_else(PoisonError::into_inner));
        let errors = std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner));
        RunReport::new(started_at, results, errors)
    }
}

impl ResultSink for ConsoleSink {
    fn record_start(&self, test: &TestDescriptor) {
        debug!("Started {}", test);
    }

    fn record_end(&self, test: &TestDescriptor, outcome: TestOutcome) {
        info!("  {} {} {}", outcome.symbol(), outcome, test);
    }

    fn record_result(&self, result: NormalizedResult) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result);
    }

    fn send_message(&self, level: MessageLevel, message: &str) {
        // HostLogger already mirrored the message to tracing
        if level == MessageLevel::Error {
            self.errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message.to_string());
        }
    }

    fn enable_shutdown_after_run(&self, enabled: bool) {
        *self
            .shutdown_after_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(enabled);
    }
}
