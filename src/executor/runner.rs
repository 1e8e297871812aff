//! Runner interfaces
//!
//! A runner is the black box that executes one assembly's tests and emits
//! raw events. The scheduler only sees it through these traits.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{AssemblyDescriptor, RawEvent, TestFilter};

/// Runner failures, reported per assembly
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to launch runner for {assembly}: {source}")]
    Launch {
        assembly: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running {assembly}: {source}")]
    Io {
        assembly: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed event from {assembly}: {reason}")]
    Protocol { assembly: String, reason: String },

    #[error("Runner for {assembly} exited with {status}")]
    Exited { assembly: String, status: String },

    #[error("Assembly not supported: {0}")]
    Unsupported(String),
}

/// Cooperative cancellation flag shared between a unit and its runner
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receiver of a runner's events. `Break` asks the runner to stop emitting.
pub trait EventListener {
    fn on_event(&mut self, event: RawEvent) -> ControlFlow<()>;
}

/// Executes one assembly. `run` blocks until the assembly is done, the
/// listener breaks, or the token is observed cancelled.
pub trait Runner: Send + Sync {
    fn run(
        &self,
        listener: &mut dyn EventListener,
        filter: Option<&TestFilter>,
        cancel: &CancelToken,
    ) -> Result<(), RunnerError>;

    /// Release underlying resources; may be called while `run` is in progress
    fn release(&self) {}
}

/// Creates one runner per assembly
pub trait RunnerFactory: Send + Sync {
    fn create(&self, assembly: &AssemblyDescriptor) -> Result<Arc<dyn Runner>, RunnerError>;
}
