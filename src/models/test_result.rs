//! Normalized test result models
//!
//! Defines outcomes, categorized result messages, normalized results and
//! the aggregate run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::event::{OutputChannel, RawTestResult, ResultState};
use super::TestDescriptor;

/// Host-facing test outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
    Inconclusive,
}

impl TestOutcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "✓",
            TestOutcome::Failed => "✗",
            TestOutcome::Skipped => "○",
            TestOutcome::Inconclusive => "?",
        }
    }
}

impl From<ResultState> for TestOutcome {
    fn from(state: ResultState) -> Self {
        match state {
            ResultState::Success => TestOutcome::Passed,
            ResultState::Failure
            | ResultState::Error
            | ResultState::Cancelled
            | ResultState::NotRunnable => TestOutcome::Failed,
            ResultState::Ignored | ResultState::Skipped => TestOutcome::Skipped,
            ResultState::Inconclusive => TestOutcome::Inconclusive,
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => write!(f, "PASS"),
            TestOutcome::Failed => write!(f, "FAIL"),
            TestOutcome::Skipped => write!(f, "SKIP"),
            TestOutcome::Inconclusive => write!(f, "INCONCLUSIVE"),
        }
    }
}

/// Category of a message attached to a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    StdOut,
    StdErr,
    DebugTrace,
    AdditionalInfo,
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageCategory::StdOut => write!(f, "stdout"),
            MessageCategory::StdErr => write!(f, "stderr"),
            MessageCategory::DebugTrace => write!(f, "trace"),
            MessageCategory::AdditionalInfo => write!(f, "info"),
        }
    }
}

impl From<OutputChannel> for MessageCategory {
    fn from(channel: OutputChannel) -> Self {
        match channel {
            OutputChannel::Out => MessageCategory::StdOut,
            OutputChannel::Error => MessageCategory::StdErr,
            OutputChannel::Trace => MessageCategory::DebugTrace,
            OutputChannel::Log => MessageCategory::AdditionalInfo,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub category: MessageCategory,
    pub text: String,
}

impl ResultMessage {
    pub fn new(category: MessageCategory, text: impl Into<String>) -> Self {
        Self {
            category,
            text: text.into(),
        }
    }
}

/// Fully populated result for one finished test
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub test: TestDescriptor,
    pub outcome: TestOutcome,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub messages: Vec<ResultMessage>,
}

impl NormalizedResult {
    /// Convert a framework result for a registered test
    pub fn from_raw(test: TestDescriptor, raw: &RawTestResult) -> Self {
        Self {
            test,
            outcome: raw.state.into(),
            duration_ms: raw.duration_ms,
            error_message: raw.message.clone(),
            stack_trace: raw.stack_trace.clone(),
            messages: Vec::new(),
        }
    }
}

impl fmt::Display for NormalizedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.outcome.symbol(),
            self.test,
            self.duration_ms
        )?;
        if let Some(msg) = &self.error_message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Aggregate over every result of one scheduler run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub inconclusive: usize,
    pub total_duration_ms: u64,
    pub results: Vec<NormalizedResult>,
    /// Error-level host messages, including setup/teardown failures
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Utc>,
        results: Vec<NormalizedResult>,
        errors: Vec<String>,
    ) -> Self {
        let count = |outcome: TestOutcome| results.iter().filter(|r| r.outcome == outcome).count();

        Self {
            started_at,
            completed_at: Utc::now(),
            total: results.len(),
            passed: count(TestOutcome::Passed),
            failed: count(TestOutcome::Failed),
            skipped: count(TestOutcome::Skipped),
            inconclusive: count(TestOutcome::Inconclusive),
            total_duration_ms: results.iter().map(|r| r.duration_ms).sum(),
            results,
            errors,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    /// No failed tests and no error-level messages
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errors.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Test Run - {}", self.started_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Inconclusive: {}",
            self.total, self.passed, self.failed, self.skipped, self.inconclusive
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}
