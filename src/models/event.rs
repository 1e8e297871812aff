//! Raw framework events
//!
//! The event stream a runner emits for one assembly. Events are also the
//! newline-delimited JSON wire format read from external runner processes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel a line of test output was written to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputChannel {
    Out,
    Error,
    Trace,
    Log,
}

/// Framework-native result state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultState {
    Success,
    Failure,
    Error,
    Cancelled,
    Ignored,
    Skipped,
    NotRunnable,
    Inconclusive,
}

impl ResultState {
    /// Failure or error, as opposed to skipped or passed
    pub fn is_failure(&self) -> bool {
        matches!(self, ResultState::Failure | ResultState::Error)
    }
}

/// Where in a fixture a failure occurred
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSite {
    #[default]
    Test,
    SetUp,
    TearDown,
    Parent,
    Child,
}

impl FailureSite {
    pub fn is_fixture_lifecycle(&self) -> bool {
        matches!(self, FailureSite::SetUp | FailureSite::TearDown)
    }
}

impl fmt::Display for FailureSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureSite::Test => write!(f, "Test"),
            FailureSite::SetUp => write!(f, "SetUp"),
            FailureSite::TearDown => write!(f, "TearDown"),
            FailureSite::Parent => write!(f, "Parent"),
            FailureSite::Child => write!(f, "Child"),
        }
    }
}

/// Result payload of a finished test or suite
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawTestResult {
    /// Unique name of the test or suite
    pub id: String,
    pub full_name: String,
    pub state: ResultState,
    #[serde(default)]
    pub site: FailureSite,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
}

#[cfg(test)]
impl RawTestResult {
    pub fn new(id: impl Into<String>, state: ResultState) -> Self {
        let id = id.into();
        Self {
            full_name: id.clone(),
            id,
            state,
            site: FailureSite::Test,
            duration_ms: 0,
            message: None,
            stack_trace: None,
        }
    }

    pub fn with_full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = name.into();
        self
    }

    pub fn with_site(mut self, site: FailureSite) -> Self {
        self.site = site;
        self
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }
}

/// Low-level event emitted by a runner
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RawEvent {
    RunStarted {
        name: String,
        #[serde(default)]
        test_count: usize,
    },
    RunFinished {
        #[serde(default)]
        error: Option<String>,
    },
    SuiteStarted {
        name: String,
    },
    SuiteFinished {
        result: RawTestResult,
    },
    TestStarted {
        id: String,
    },
    TestFinished {
        result: RawTestResult,
    },
    TestOutput {
        channel: OutputChannel,
        text: String,
    },
    UnhandledException {
        message: String,
    },
}

#[cfg(test)]
impl RawEvent {
    pub fn test_started(id: impl Into<String>) -> Self {
        RawEvent::TestStarted { id: id.into() }
    }

    pub fn test_finished(result: RawTestResult) -> Self {
        RawEvent::TestFinished { result }
    }

    pub fn output(channel: OutputChannel, text: impl Into<String>) -> Self {
        RawEvent::TestOutput {
            channel,
            text: text.into(),
        }
    }
}

impl RawEvent {
    /// Whether this event closes a test, the point where runners
    /// may safely stop after a cancellation request
    pub fn is_test_boundary(&self) -> bool {
        matches!(
            self,
            RawEvent::TestFinished { .. } | RawEvent::SuiteFinished { .. }
        )
    }
}
