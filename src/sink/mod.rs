//! Host reporting surface
//!
//! The `ResultSink` trait is what the host implements to receive test
//! lifecycle events, results and log messages. `HostLogger` wraps a sink
//! with verbosity handling and mirrors every message to `tracing`.

mod console;

pub use console::ConsoleSink;

use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::FORCE_ERROR_VERBOSITY;
use crate::models::{NormalizedResult, TestDescriptor, TestOutcome};

/// Severity of a host log message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageLevel {
    Informational,
    Warning,
    Error,
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageLevel::Informational => write!(f, "info"),
            MessageLevel::Warning => write!(f, "warning"),
            MessageLevel::Error => write!(f, "error"),
        }
    }
}

/// Host-side receiver of test events, shared by every running assembly
pub trait ResultSink: Send + Sync {
    /// A registered test started running
    fn record_start(&self, test: &TestDescriptor);

    /// A registered test finished, sent before its result
    fn record_end(&self, test: &TestDescriptor, outcome: TestOutcome);

    fn record_result(&self, result: NormalizedResult);

    fn send_message(&self, level: MessageLevel, message: &str);

    /// Whether the host may shut the test engine down after this run
    fn enable_shutdown_after_run(&self, _enabled: bool) {}
}

/// Verbosity-aware message helper around a shared sink
#[derive(Clone)]
pub struct HostLogger {
    sink: Arc<dyn ResultSink>,
    verbosity: u32,
}

impl HostLogger {
    pub fn new(sink: Arc<dyn ResultSink>, verbosity: u32) -> Self {
        Self { sink, verbosity }
    }

    pub fn sink(&self) -> &dyn ResultSink {
        self.sink.as_ref()
    }

    fn effective_level(&self, level: MessageLevel) -> MessageLevel {
        // Makes sure the message shows up in CI build reports
        if self.verbosity >= FORCE_ERROR_VERBOSITY {
            MessageLevel::Error
        } else {
            level
        }
    }

    pub fn send(&self, level: MessageLevel, message: &str) {
        match level {
            MessageLevel::Informational => info!("{}", message),
            MessageLevel::Warning => warn!("{}", message),
            MessageLevel::Error => error!("{}", message),
        }
        self.sink.send_message(self.effective_level(level), message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.send(MessageLevel::Informational, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.send(MessageLevel::Warning, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.send(MessageLevel::Error, message.as_ref());
    }

    /// Error message followed by the full error chain as a second message
    pub fn error_with(&self, message: impl AsRef<str>, err: &dyn std::error::Error) {
        self.error(message);
        let mut chain = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push_str(&format!(": {cause}"));
            source = cause.source();
        }
        self.error(chain);
    }

    /// Forwarded to the host only when verbosity is above zero
    pub fn debug(&self, message: impl AsRef<str>) {
        debug!("{}", message.as_ref());
        if self.verbosity > 0 {
            self.sink
                .send_message(self.effective_level(MessageLevel::Informational), message.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::RecordingSink;

    #[test]
    fn test_debug_hidden_at_zero_verbosity() {
        let sink = Arc::new(RecordingSink::default());
        let logger = HostLogger::new(sink.clone(), 0);

        logger.debug("details");
        logger.info("notice");

        assert_eq!(
            sink.messages(),
            vec![(MessageLevel::Informational, "notice".to_string())]
        );
    }

    #[test]
    fn test_debug_forwarded_when_verbose() {
        let sink = Arc::new(RecordingSink::default());
        let logger = HostLogger::new(sink.clone(), 1);

        logger.debug("details");
        assert_eq!(
            sink.messages(),
            vec![(MessageLevel::Informational, "details".to_string())]
        );
    }

    #[test]
    fn test_max_verbosity_escalates_to_error() {
        let sink = Arc::new(RecordingSink::default());
        let logger = HostLogger::new(sink.clone(), FORCE_ERROR_VERBOSITY);

        logger.info("notice");
        logger.warn("careful");
        assert!(sink
            .messages()
            .iter()
            .all(|(level, _)| *level == MessageLevel::Error));
    }

    #[test]
    fn test_error_with_sends_chain() {
        let sink = Arc::new(RecordingSink::default());
        let logger = HostLogger::new(sink.clone(), 0);
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.dll");

        logger.error_with("Exception thrown executing tests", &err);
        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].1, "missing.dll");
    }
}
