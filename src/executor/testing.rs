//! Test doubles for runners, metadata and the host sink

use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::classifier::MetadataReader;
use super::runner::{CancelToken, EventListener, Runner, RunnerError, RunnerFactory};
use crate::models::{AssemblyDescriptor, NormalizedResult, RawEvent, TestFilter, TestOutcome};
use crate::sink::{MessageLevel, ResultSink};

/// File name of an assembly path, or the whole identifier
pub fn short_name(assembly: &AssemblyDescriptor) -> String {
    Path::new(assembly.as_str())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| assembly.to_string())
}

#[derive(Clone, Debug, PartialEq)]
pub enum SinkCall {
    Start(String),
    End(String, TestOutcome),
    Result(NormalizedResult),
    Message(MessageLevel, String),
    Shutdown(bool),
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    fn push(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn results(&self) -> Vec<NormalizedResult> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Result(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<(MessageLevel, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Message(level, text) => Some((level, text)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(level, _)| *level == MessageLevel::Error)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn shutdown(&self) -> Option<bool> {
        self.calls().into_iter().find_map(|c| match c {
            SinkCall::Shutdown(enabled) => Some(enabled),
            _ => None,
        })
    }
}

impl ResultSink for RecordingSink {
    fn record_start(&self, test: &crate::models::TestDescriptor) {
        self.push(SinkCall::Start(test.unique_name.clone()));
    }

    fn record_end(&self, test: &crate::models::TestDescriptor, outcome: TestOutcome) {
        self.push(SinkCall::End(test.unique_name.clone(), outcome));
    }

    fn record_result(&self, result: NormalizedResult) {
        self.push(SinkCall::Result(result));
    }

    fn send_message(&self, level: MessageLevel, message: &str) {
        self.push(SinkCall::Message(level, message.to_string()));
    }

    fn enable_shutdown_after_run(&self, enabled: bool) {
        self.push(SinkCall::Shutdown(enabled));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Enter,
    Exit,
}

/// Shared observation point for every runner a factory creates
#[derive(Debug, Default)]
pub struct Probe {
    current: AtomicUsize,
    max: AtomicUsize,
    releases: AtomicUsize,
    timeline: Mutex<Vec<(String, Phase)>>,
    tokens: Mutex<Vec<(String, CancelToken)>>,
    filters: Mutex<Vec<(String, Vec<String>)>>,
    created: Mutex<Vec<String>>,
}

impl Probe {
    fn enter(&self, name: &str, cancel: &CancelToken, filter: Option<&TestFilter>) {
        self.tokens
            .lock()
            .unwrap()
            .push((name.to_string(), cancel.clone()));
        if let Some(filter) = filter {
            let names = filter.names().into_iter().map(String::from).collect();
            self.filters.lock().unwrap().push((name.to_string(), names));
        }
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        self.timeline
            .lock()
            .unwrap()
            .push((name.to_string(), Phase::Enter));
    }

    fn exit(&self, name: &str) {
        self.timeline
            .lock()
            .unwrap()
            .push((name.to_string(), Phase::Exit));
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn running(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn timeline(&self) -> Vec<(String, Phase)> {
        self.timeline.lock().unwrap().clone()
    }

    pub fn tokens(&self) -> Vec<(String, CancelToken)> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn filters(&self) -> Vec<(String, Vec<String>)> {
        self.filters.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    /// Poll until `running()` reaches `count`, giving up after a few seconds
    pub async fn wait_running(&self, count: usize) -> bool {
        for _ in 0..500 {
            if self.running() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// Runner that replays a fixed event list
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    name: String,
    events: Vec<RawEvent>,
    delay: Duration,
    block_until_cancelled: bool,
    fail: bool,
    probe: Option<Arc<Probe>>,
    delivered: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Runner for ScriptedRunner {
    fn run(
        &self,
        listener: &mut dyn EventListener,
        filter: Option<&TestFilter>,
        cancel: &CancelToken,
    ) -> Result<(), RunnerError> {
        if let Some(probe) = &self.probe {
            probe.enter(&self.name, cancel, filter);
        }

        if self.block_until_cancelled {
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
        }

        for event in &self.events {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            if let ControlFlow::Break(()) = listener.on_event(event.clone()) {
                break;
            }
        }

        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        if let Some(probe) = &self.probe {
            probe.exit(&self.name);
        }

        if self.fail {
            return Err(RunnerError::Exited {
                assembly: self.name.clone(),
                status: "exit status: 1".to_string(),
            });
        }
        Ok(())
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if let Some(probe) = &self.probe {
            probe.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Factory creating scripted runners, keyed by assembly file name
#[derive(Debug, Default)]
pub struct ScriptedFactory {
    scripts: HashMap<String, Vec<RawEvent>>,
    blocking: HashSet<String>,
    failing_launch: HashSet<String>,
    failing_run: HashSet<String>,
    delay: Duration,
    pub probe: Arc<Probe>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, name: &str, events: Vec<RawEvent>) -> Self {
        self.scripts.insert(name.to_string(), events);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn blocking(mut self, name: &str) -> Self {
        self.blocking.insert(name.to_string());
        self
    }

    pub fn failing_launch(mut self, name: &str) -> Self {
        self.failing_launch.insert(name.to_string());
        self
    }

    pub fn failing_run(mut self, name: &str) -> Self {
        self.failing_run.insert(name.to_string());
        self
    }
}

impl RunnerFactory for ScriptedFactory {
    fn create(&self, assembly: &AssemblyDescriptor) -> Result<Arc<dyn Runner>, RunnerError> {
        let name = short_name(assembly);
        if self.failing_launch.contains(&name) {
            return Err(RunnerError::Unsupported(name));
        }
        self.probe.created.lock().unwrap().push(name.clone());

        Ok(Arc::new(ScriptedRunner {
            events: self.scripts.get(&name).cloned().unwrap_or_default(),
            delay: self.delay,
            block_until_cancelled: self.blocking.contains(&name),
            fail: self.failing_run.contains(&name),
            probe: Some(self.probe.clone()),
            name,
            ..Default::default()
        }))
    }
}

/// In-memory metadata keyed by assembly file name
#[derive(Debug, Default)]
pub struct StaticMetadata {
    attributes: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
}

impl StaticMetadata {
    pub fn with_attributes(mut self, name: &str, attributes: &[&str]) -> Self {
        self.attributes.insert(
            name.to_string(),
            attributes.iter().map(|a| a.to_string()).collect(),
        );
        self
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }
}

impl MetadataReader for StaticMetadata {
    fn custom_attributes(&self, assembly: &AssemblyDescriptor) -> Result<Vec<String>> {
        let name = short_name(assembly);
        if self.failing.contains(&name) {
            bail!("Bad image format: {name}");
        }
        Ok(self.attributes.get(&name).cloned().unwrap_or_default())
    }
}
