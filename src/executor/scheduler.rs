//! Assembly scheduler
//!
//! Runs a batch of assemblies in two phases: every parallel-classified
//! assembly under a bounded worker pool, then the rest one at a time.
//! Explicit test selections always run sequentially, one unit per source
//! assembly.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info};

use super::classifier::{Classifier, MetadataReader};
use super::runner::{CancelToken, RunnerFactory};
use super::unit::ExecutionUnit;
use crate::collector::ResultCollector;
use crate::config::RunSettings;
use crate::models::{group_by_source, AssemblyDescriptor, TestCatalog, TestDescriptor, TestFilter};
use crate::sink::{HostLogger, ResultSink};
use crate::utils::Timer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Completed => write!(f, "completed"),
            RunState::Cancelled => write!(f, "cancelled"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// Everything a run needs besides the assembly list
#[derive(Clone)]
pub struct RunContext {
    pub settings: Arc<RunSettings>,
    pub catalog: Arc<TestCatalog>,
    pub sink: Arc<dyn ResultSink>,
    /// The host asked to keep the engine alive after this run
    pub keep_alive: bool,
}

impl RunContext {
    pub fn new(settings: RunSettings, catalog: TestCatalog, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            settings: Arc::new(settings),
            catalog: Arc::new(catalog),
            sink,
            keep_alive: false,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    fn logger(&self) -> HostLogger {
        HostLogger::new(self.sink.clone(), self.settings.verbosity)
    }

    fn shutdown_enabled(&self) -> bool {
        !self.settings.keep_engine_running || !self.keep_alive
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Active,
    Current,
}

/// Units that may be running right now. Locks are held only to insert,
/// remove or iterate.
#[derive(Default)]
struct UnitRegistry {
    active: Mutex<HashMap<u64, Arc<ExecutionUnit>>>,
    current: Mutex<Option<Arc<ExecutionUnit>>>,
    next_id: AtomicU64,
}

impl UnitRegistry {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn register(&self, unit: &Arc<ExecutionUnit>, slot: Slot) {
        match slot {
            Slot::Active => {
                self.active.lock().await.insert(unit.id(), unit.clone());
            }
            Slot::Current => {
                *self.current.lock().await = Some(unit.clone());
            }
        }
    }

    async fn deregister(&self, unit: &ExecutionUnit, slot: Slot) {
        match slot {
            Slot::Active => {
                self.active.lock().await.remove(&unit.id());
            }
            Slot::Current => {
                let mut current = self.current.lock().await;
                if current.as_ref().map(|u| u.id()) == Some(unit.id()) {
                    *current = None;
                }
            }
        }
    }

    async fn cancel_all(&self) {
        for unit in self.active.lock().await.values() {
            unit.cancel();
        }
        if let Some(unit) = self.current.lock().await.as_ref() {
            unit.cancel();
        }
    }

    async fn dispose_all(&self) {
        for (_, unit) in self.active.lock().await.drain() {
            unit.dispose();
        }
        if let Some(unit) = self.current.lock().await.take() {
            unit.dispose();
        }
    }

    /// Best-effort disposal from a synchronous context
    fn try_dispose_all(&self) {
        if let Ok(mut active) = self.active.try_lock() {
            for (_, unit) in active.drain() {
                unit.dispose();
            }
        }
        if let Ok(mut current) = self.current.try_lock() {
            if let Some(unit) = current.take() {
                unit.dispose();
            }
        }
    }

    #[cfg(test)]
    async fn assemblies(&self) -> Vec<AssemblyDescriptor> {
        let mut assemblies: Vec<(u64, AssemblyDescriptor)> = self
            .active
            .lock()
            .await
            .values()
            .map(|u| (u.id(), u.assembly().clone()))
            .collect();
        if let Some(unit) = self.current.lock().await.as_ref() {
            assemblies.push((unit.id(), unit.assembly().clone()));
        }
        assemblies.sort_by_key(|(id, _)| *id);
        assemblies.into_iter().map(|(_, a)| a).collect()
    }
}

struct RunStatus {
    state: RunState,
    cancel: CancelToken,
}

/// Shared handles a spawned unit task needs
#[derive(Clone)]
struct UnitLauncher {
    factory: Arc<dyn RunnerFactory>,
    registry: Arc<UnitRegistry>,
    ctx: RunContext,
    logger: HostLogger,
    cancel: CancelToken,
}

impl UnitLauncher {
    /// Create, register, execute and release one unit. Every failure is
    /// reported to the host and swallowed.
    async fn run(&self, assembly: AssemblyDescriptor, filter: Option<TestFilter>, slot: Slot) {
        if self.cancel.is_cancelled() {
            debug!("Run cancelled, not starting {}", assembly);
            return;
        }

        let timer = Timer::start(format!("Assembly {assembly}"));
        let runner = match self.factory.create(&assembly) {
            Ok(runner) => runner,
            Err(e) => {
                self.logger
                    .error_with(format!("Failed to start runner for '{assembly}'"), &e);
                return;
            }
        };

        let unit = Arc::new(ExecutionUnit::new(
            self.registry.next_id(),
            assembly.clone(),
            runner,
        ));
        self.registry.register(&unit, slot).await;

        // cancel() may have swept the registry just before this unit joined it
        if self.cancel.is_cancelled() {
            unit.dispose();
            self.registry.deregister(&unit, slot).await;
            return;
        }

        let collector = ResultCollector::new(
            self.ctx.catalog.clone(),
            self.logger.clone(),
            &self.ctx.settings,
        );
        let worker = unit.clone();
        let outcome =
            tokio::task::spawn_blocking(move || worker.execute(collector, filter.as_ref())).await;

        self.registry.deregister(&unit, slot).await;
        unit.release();

        match outcome {
            Ok(Ok(count)) => info!(
                "{} finished with {} results in {}ms",
                assembly,
                count,
                timer.elapsed_ms()
            ),
            Ok(Err(e)) => self
                .logger
                .error_with(format!("Exception thrown executing tests in '{assembly}'"), &e),
            Err(e) => self
                .logger
                .error(format!("Runner for '{assembly}' aborted: {e}")),
        }
        timer.stop();
    }
}

pub struct Scheduler {
    factory: Arc<dyn RunnerFactory>,
    metadata: Arc<dyn MetadataReader>,
    registry: Arc<UnitRegistry>,
    status: Mutex<RunStatus>,
}

impl Scheduler {
    pub fn new(factory: Arc<dyn RunnerFactory>, metadata: Arc<dyn MetadataReader>) -> Self {
        Self {
            factory,
            metadata,
            registry: Arc::new(UnitRegistry::default()),
            status: Mutex::new(RunStatus {
                state: RunState::Idle,
                cancel: CancelToken::new(),
            }),
        }
    }

    #[cfg(test)]
    pub async fn state(&self) -> RunState {
        self.status.lock().await.state
    }

    /// Assemblies with a registered unit, in creation order
    #[cfg(test)]
    pub async fn active_units(&self) -> Vec<AssemblyDescriptor> {
        self.registry.assemblies().await
    }

    /// Run whole assemblies, parallel phase first
    pub async fn run_tests(&self, assemblies: Vec<AssemblyDescriptor>, ctx: &RunContext) -> RunState {
        let logger = ctx.logger();
        let Some(cancel) = self.begin(&logger).await else {
            return RunState::Failed;
        };

        let outcome = self.execute_assemblies(assemblies, ctx, &logger, &cancel).await;
        self.conclude(outcome, &logger, &cancel).await
    }

    /// Run an explicit test selection, one sequential unit per source assembly
    pub async fn run_selected(&self, tests: &[TestDescriptor], ctx: &RunContext) -> RunState {
        let logger = ctx.logger();
        let Some(cancel) = self.begin(&logger).await else {
            return RunState::Failed;
        };

        let outcome = self.execute_selected(tests, ctx, &logger, &cancel).await;
        self.conclude(outcome, &logger, &cancel).await
    }

    /// Signal every running unit and stop queued ones from starting.
    /// Returns once the signals are sent, without waiting for the units.
    pub async fn cancel(&self) {
        self.status.lock().await.cancel.cancel();
        self.registry.cancel_all().await;
    }

    /// Cancel and release every registered unit
    pub async fn dispose(&self) {
        self.status.lock().await.cancel.cancel();
        self.registry.dispose_all().await;
    }

    async fn begin(&self, logger: &HostLogger) -> Option<CancelToken> {
        let mut status = self.status.lock().await;
        if status.state == RunState::Running {
            logger.error("A test run is already in progress");
            return None;
        }
        status.state = RunState::Running;
        status.cancel = CancelToken::new();
        let cancel = status.cancel.clone();
        drop(status);

        logger.info("executing tests is started");
        Some(cancel)
    }

    async fn conclude(&self, outcome: Result<()>, logger: &HostLogger, cancel: &CancelToken) -> RunState {
        let state = match outcome {
            Ok(()) if cancel.is_cancelled() => RunState::Cancelled,
            Ok(()) => RunState::Completed,
            Err(e) => {
                logger.error_with("Exception thrown executing tests", &*e);
                self.registry.dispose_all().await;
                RunState::Failed
            }
        };

        self.status.lock().await.state = state;
        logger.info("executing tests is finished");
        state
    }

    fn launcher(&self, ctx: &RunContext, logger: &HostLogger, cancel: &CancelToken) -> UnitLauncher {
        UnitLauncher {
            factory: self.factory.clone(),
            registry: self.registry.clone(),
            ctx: ctx.clone(),
            logger: logger.clone(),
            cancel: cancel.clone(),
        }
    }

    fn prepare(ctx: &RunContext, logger: &HostLogger) -> Result<()> {
        let enabled = ctx.shutdown_enabled();
        logger.debug(format!("EnableShutdown set to {enabled}"));
        ctx.sink.enable_shutdown_after_run(enabled);
        ctx.settings.validate().context("Invalid run settings")?;
        Ok(())
    }

    async fn execute_assemblies(
        &self,
        assemblies: Vec<AssemblyDescriptor>,
        ctx: &RunContext,
        logger: &HostLogger,
        cancel: &CancelToken,
    ) -> Result<()> {
        Self::prepare(ctx, logger)?;
        let classifier = Classifier::new(&ctx.settings, self.metadata.clone())?;
        let base = std::env::current_dir().context("Failed to read working directory")?;

        let assemblies: Vec<AssemblyDescriptor> = assemblies
            .into_iter()
            .map(|a| a.resolve_against(&base))
            .collect();
        let (parallel, sequential) = classifier.partition(assemblies, logger);
        info!(
            "Scheduling {} parallel and {} sequential assemblies",
            parallel.len(),
            sequential.len()
        );

        let launcher = self.launcher(ctx, logger, cancel);
        if !parallel.is_empty() {
            logger.info("using parallel by assembly mode");
            Self::run_parallel(&launcher, parallel, ctx.settings.max_degree_of_parallelism).await;
        }

        let units = sequential.into_iter().map(|a| (a, None)).collect();
        Self::run_sequential(&launcher, units).await;
        Ok(())
    }

    async fn execute_selected(
        &self,
        tests: &[TestDescriptor],
        ctx: &RunContext,
        logger: &HostLogger,
        cancel: &CancelToken,
    ) -> Result<()> {
        Self::prepare(ctx, logger)?;

        let units = group_by_source(tests)
            .into_iter()
            .map(|(assembly, tests)| {
                let filter: TestFilter = tests.iter().collect();
                (assembly, Some(filter))
            })
            .collect();

        let launcher = self.launcher(ctx, logger, cancel);
        Self::run_sequential(&launcher, units).await;
        Ok(())
    }

    /// Drain the whole parallel partition, at most `max_parallel` units at once
    async fn run_parallel(launcher: &UnitLauncher, assemblies: Vec<AssemblyDescriptor>, max_parallel: usize) {
        let semaphore = Arc::new(Semaphore::new(max_parallel.clamp(1, Semaphore::MAX_PERMITS)));
        let mut handles = Vec::with_capacity(assemblies.len());

        for assembly in assemblies {
            let semaphore = semaphore.clone();
            let launcher = launcher.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                launcher.run(assembly, None, Slot::Active).await;
            });

            handles.push(handle);
        }

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                launcher
                    .logger
                    .error(format!("Parallel assembly task aborted: {e}"));
            }
        }
    }

    async fn run_sequential(
        launcher: &UnitLauncher,
        units: Vec<(AssemblyDescriptor, Option<TestFilter>)>,
    ) {
        let total = units.len();
        for (index, (assembly, filter)) in units.into_iter().enumerate() {
            if launcher.cancel.is_cancelled() {
                launcher
                    .logger
                    .warn(format!("Run cancelled, {} assemblies not started", total - index));
                break;
            }
            launcher.run(assembly, filter, Slot::Current).await;
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(status) = self.status.try_lock() {
            status.cancel.cancel();
        }
        self.registry.try_dispose_all();
    }
}
