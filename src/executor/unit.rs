//! Execution units
//!
//! One unit per assembly run: it owns the cancellation token, drives the
//! runner on a blocking thread and feeds the collector it exclusively owns.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::runner::{CancelToken, EventListener, Runner, RunnerError};
use crate::collector::ResultCollector;
use crate::models::{AssemblyDescriptor, RawEvent, TestFilter};

pub struct ExecutionUnit {
    id: u64,
    assembly: AssemblyDescriptor,
    runner: Arc<dyn Runner>,
    cancel: CancelToken,
    released: AtomicBool,
}

impl ExecutionUnit {
    pub fn new(id: u64, assembly: AssemblyDescriptor, runner: Arc<dyn Runner>) -> Self {
        Self {
            id,
            assembly,
            runner,
            cancel: CancelToken::new(),
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    #[cfg(test)]
    pub fn assembly(&self) -> &AssemblyDescriptor {
        &self.assembly
    }

    /// Signal cancellation; the unit stops at its next test boundary
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Cancelling run of {}", self.assembly);
        }
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run the assembly to completion on the calling thread.
    /// Returns the number of results the collector emitted.
    pub fn execute(
        &self,
        collector: ResultCollector,
        filter: Option<&TestFilter>,
    ) -> Result<usize, RunnerError> {
        let mut listener = UnitListener {
            collector,
            cancel: &self.cancel,
        };
        let outcome = self.runner.run(&mut listener, filter, &self.cancel);
        self.release();
        outcome.map(|_| listener.collector.results_emitted())
    }

    /// Release runner resources once
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.runner.release();
        }
    }

    /// Cancel and force release, whether or not the run has finished
    pub fn dispose(&self) {
        self.cancel();
        self.release();
    }

    #[cfg(test)]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Listener handed to the runner. Cancellation is observed between events:
/// no new test starts once cancelled, and the stream is stopped at the
/// next boundary.
struct UnitListener<'a> {
    collector: ResultCollector,
    cancel: &'a CancelToken,
}

impl EventListener for UnitListener<'_> {
    fn on_event(&mut self, event: RawEvent) -> ControlFlow<()> {
        if self.cancel.is_cancelled() && matches!(event, RawEvent::TestStarted { .. }) {
            return ControlFlow::Break(());
        }

        let boundary = event.is_test_boundary();
        self.collector.handle(event);

        if self.cancel.is_cancelled() && (boundary || self.collector.active_test().is_none()) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}
