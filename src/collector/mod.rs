//! Result event collector
//!
//! Translates one assembly's raw event stream into normalized results.
//! Output and completion arrive as separate events, so output is buffered
//! per active test and attached when that test finishes.

mod buffers;

pub use buffers::{strip_line_ending, OutputBuffers};

use std::sync::Arc;

use crate::config::RunSettings;
use crate::models::{
    MessageCategory, NormalizedResult, OutputChannel, RawEvent, RawTestResult, TestCatalog,
    TestDescriptor,
};
use crate::sink::HostLogger;

/// Per-assembly event translator. Events must be delivered in order from a
/// single thread; the collector is owned by exactly one execution unit.
pub struct ResultCollector {
    catalog: Arc<TestCatalog>,
    logger: HostLogger,
    buffers: OutputBuffers,
    active: Option<TestDescriptor>,
    combine_output_into_stdout: bool,
    emit_output_as_message: bool,
    results_emitted: usize,
}

impl ResultCollector {
    pub fn new(catalog: Arc<TestCatalog>, logger: HostLogger, settings: &RunSettings) -> Self {
        Self {
            catalog,
            logger,
            buffers: OutputBuffers::new(),
            active: None,
            combine_output_into_stdout: settings.combine_output_into_stdout,
            emit_output_as_message: settings.emit_output_as_message,
            results_emitted: 0,
        }
    }

    pub fn handle(&mut self, event: RawEvent) {
        match event {
            RawEvent::RunStarted { name, .. } => {
                self.logger.info(format!("Run started: {name}"));
            }
            RawEvent::RunFinished { error } => {
                if let Some(error) = error {
                    self.logger.debug(format!("Run finished with exception: {error}"));
                }
            }
            RawEvent::SuiteStarted { .. } => {}
            RawEvent::SuiteFinished { result } => self.suite_finished(&result),
            RawEvent::TestStarted { id } => self.test_started(&id),
            RawEvent::TestOutput { channel, text } => self.test_output(channel, &text),
            RawEvent::TestFinished { result } => self.test_finished(&result),
            RawEvent::UnhandledException { message } => {
                self.logger.debug(format!("Unhandled exception: {message}"));
            }
        }
    }

    fn test_started(&mut self, id: &str) {
        // Tests the host did not register are ignored until the next start
        self.active = self.catalog.resolve(id).cloned();
        if let Some(test) = &self.active {
            self.logger.sink().record_start(test);
        }
    }

    fn test_output(&mut self, channel: OutputChannel, text: &str) {
        let line = strip_line_ending(text);

        if self.emit_output_as_message && !line.trim().is_empty() {
            self.logger.info(line);
        }

        if self.active.is_none() {
            return;
        }

        let category = if self.combine_output_into_stdout {
            MessageCategory::StdOut
        } else {
            channel.into()
        };
        self.buffers.append_line(category, line);
    }

    fn test_finished(&mut self, raw: &RawTestResult) {
        let messages = self.buffers.take_messages();
        let Some(test) = self.active.take().filter(|t| t.unique_name == raw.id) else {
            return;
        };

        let mut result = NormalizedResult::from_raw(test, raw);
        result.messages = messages;

        let sink = self.logger.sink();
        sink.record_end(&result.test, result.outcome);
        sink.record_result(result);
        self.results_emitted += 1;
    }

    fn suite_finished(&self, raw: &RawTestResult) {
        if !(raw.state.is_failure() && raw.site.is_fixture_lifecycle()) {
            return;
        }

        self.logger.error(format!(
            "{} failed for test fixture {}",
            raw.site, raw.full_name
        ));
        if let Some(message) = &raw.message {
            self.logger.error(message);
        }
        if let Some(trace) = &raw.stack_trace {
            self.logger.error(trace);
        }
    }

    pub fn active_test(&self) -> Option<&TestDescriptor> {
        self.active.as_ref()
    }

    #[cfg(test)]
    pub fn buffers(&self) -> &OutputBuffers {
        &self.buffers
    }

    pub fn results_emitted(&self) -> usize {
        self.results_emitted
    }
}
