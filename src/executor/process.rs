//! External process runner
//!
//! Launches `<program> [args..] [--filter id1,id2] <assembly>` and reads one
//! JSON-encoded [`RawEvent`] per stdout line.

use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::runner::{CancelToken, EventListener, Runner, RunnerError, RunnerFactory};
use crate::models::{AssemblyDescriptor, RawEvent, TestFilter};

/// Creates a [`ProcessRunner`] per assembly, all sharing one command line
#[derive(Clone, Debug)]
pub struct ProcessRunnerFactory {
    program: String,
    args: Vec<String>,
}

impl ProcessRunnerFactory {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl RunnerFactory for ProcessRunnerFactory {
    fn create(&self, assembly: &AssemblyDescriptor) -> Result<Arc<dyn Runner>, RunnerError> {
        if assembly.as_str().trim().is_empty() {
            return Err(RunnerError::Unsupported("empty assembly path".to_string()));
        }
        Ok(Arc::new(ProcessRunner {
            program: self.program.clone(),
            args: self.args.clone(),
            assembly: assembly.clone(),
            child: Mutex::new(None),
        }))
    }
}

#[derive(Debug)]
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
    assembly: AssemblyDescriptor,
    child: Mutex<Option<Child>>,
}

impl ProcessRunner {
    fn command(&self, filter: Option<&TestFilter>) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(filter) = filter {
            command.arg("--filter").arg(filter.names().join(","));
        }
        command
            .arg(self.assembly.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        command
    }

    fn child(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward events until EOF or until the listener asks to stop.
    /// Returns true when the stream was cut short.
    fn pump(
        &self,
        stdout: ChildStdout,
        listener: &mut dyn EventListener,
    ) -> Result<bool, RunnerError> {
        for line in BufReader::new(stdout).lines() {
            let line = line.map_err(|source| RunnerError::Io {
                assembly: self.assembly.to_string(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }

            let event: RawEvent =
                serde_json::from_str(&line).map_err(|e| RunnerError::Protocol {
                    assembly: self.assembly.to_string(),
                    reason: format!("{e}: {line}"),
                })?;
            if let ControlFlow::Break(()) = listener.on_event(event) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Store the child where `release` can reach it. A cancel that landed
    /// while the process was spawning kills it here, since `release` may
    /// already have run and found nothing to stop.
    fn adopt(
        &self,
        mut child: Child,
        cancel: &CancelToken,
    ) -> Result<Option<ChildStdout>, RunnerError> {
        let stdout = child.stdout.take();
        *self.child() = Some(child);

        if cancel.is_cancelled() {
            debug!("Run of {} cancelled during launch", self.assembly);
            self.reap(true)?;
            return Ok(None);
        }
        match stdout {
            Some(stdout) => Ok(Some(stdout)),
            None => {
                self.reap(true)?;
                Err(RunnerError::Protocol {
                    assembly: self.assembly.to_string(),
                    reason: "stdout was not captured".to_string(),
                })
            }
        }
    }

    /// Wait for the child, killing it first when the stream was abandoned.
    /// `None` means `release` already took the child.
    fn reap(&self, kill: bool) -> Result<Option<ExitStatus>, RunnerError> {
        let Some(mut child) = self.child().take() else {
            return Ok(None);
        };
        if kill {
            debug!("Stopping runner process for {}", self.assembly);
            if let Err(e) = child.kill() {
                warn!("Failed to kill runner for {}: {}", self.assembly, e);
            }
        }
        child.wait().map(Some).map_err(|source| RunnerError::Io {
            assembly: self.assembly.to_string(),
            source,
        })
    }
}

impl Runner for ProcessRunner {
    fn run(
        &self,
        listener: &mut dyn EventListener,
        filter: Option<&TestFilter>,
        cancel: &CancelToken,
    ) -> Result<(), RunnerError> {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let child = self
            .command(filter)
            .spawn()
            .map_err(|source| RunnerError::Launch {
                assembly: self.assembly.to_string(),
                source,
            })?;
        debug!("Started {} for {}", self.program, self.assembly);

        let Some(stdout) = self.adopt(child, cancel)? else {
            return Ok(());
        };

        let pumped = self.pump(stdout, listener);
        let stopped = !matches!(pumped, Ok(false)) || cancel.is_cancelled();
        let status = self.reap(stopped)?;
        pumped?;

        match status {
            Some(status) if !stopped && !status.success() => Err(RunnerError::Exited {
                assembly: self.assembly.to_string(),
                status: status.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Kill a still-running child
    fn release(&self) {
        if let Err(e) = self.reap(true) {
            warn!("Failed to release runner for {}: {}", self.assembly, e);
        }
    }
}
