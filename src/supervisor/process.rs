//! Ownership of the one engine process.
//!
//! # Responsibilities
//! - Spawn the engine with inherited stdout/stderr
//! - Observe its exit on a background task
//! - Deliver the graceful stop signal exactly once per process
//! - Restart it for configuration reloads
//!
//! # Design Decisions
//! - The supervisor is the only component that signals the engine
//! - State lives behind one mutex that is never held across an await
//! - An exit nobody asked for triggers the session shutdown

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::config::SupervisorConfig;
use crate::lifecycle::{Shutdown, ShutdownReason};
use crate::supervisor::state::ProcessState;

/// Errors while starting the engine. Fatal for the session.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("engine executable not found at {0}")]
    MissingExecutable(PathBuf),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("spawned {0} but no process handle was obtained")]
    NoHandle(PathBuf),

    #[error("engine already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("session is shutting down")]
    ShuttingDown,
}

/// Errors while signalling the engine.
#[derive(Debug, Error)]
#[error("failed to send {signal} to pid {pid}: {source}")]
pub struct StopError {
    pub pid: u32,
    pub signal: Signal,
    #[source]
    pub source: nix::errno::Errno,
}

/// Identity of a live engine process.
///
/// The process inherits the supervisor's stdout and stderr. `generation`
/// increases with every start so a restarted engine is never confused with
/// its predecessor, even if the kernel reuses the pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisedProcess {
    pub pid: u32,
    pub generation: u64,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The graceful stop signal was delivered.
    Signalled(SupervisedProcess),
    /// Nothing running, or a stop was already delivered.
    AlreadyStopped,
}

/// Command line used to launch the engine.
#[derive(Debug, Clone)]
pub struct EngineLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl EngineLauncher {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `<home>/xclash -f <home>/xclash.yaml -d <home> -ext-ui <home>/<ui>`
    pub fn for_engine(config: &SupervisorConfig) -> Self {
        Self::new(
            config.engine_bin_path(),
            [
                OsString::from("-f"),
                config.internal_config_path().into(),
                OsString::from("-d"),
                config.home.clone().into(),
                OsString::from("-ext-ui"),
                config.ui_path().into(),
            ],
        )
    }

    /// Run the engine file through `interpreter` instead of executing it.
    pub fn with_interpreter(self, interpreter: impl Into<PathBuf>) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program.into_os_string());
        args.extend(self.args);
        Self {
            program: interpreter.into(),
            args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

struct Inner {
    state: ProcessState,
    current: Option<SupervisedProcess>,
    generation: u64,
}

impl Inner {
    fn transition(&mut self, next: ProcessState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = ?self.state, to = ?next, "Unexpected engine state transition");
        }
        self.state = next;
    }
}

/// Owner of the engine process.
pub struct ProcessSupervisor {
    launcher: EngineLauncher,
    inner: Arc<Mutex<Inner>>,
    /// Generation of the most recently observed exit.
    exits: Arc<watch::Sender<u64>>,
    shutdown: Shutdown,
}

impl ProcessSupervisor {
    pub fn new(launcher: EngineLauncher, shutdown: Shutdown) -> Self {
        let (exits, _) = watch::channel(0);
        Self {
            launcher,
            inner: Arc::new(Mutex::new(Inner {
                state: ProcessState::NotStarted,
                current: None,
                generation: 0,
            })),
            exits: Arc::new(exits),
            shutdown,
        }
    }

    pub fn state(&self) -> ProcessState {
        lock(&self.inner).state
    }

    /// The live process, if any.
    pub fn current(&self) -> Option<SupervisedProcess> {
        lock(&self.inner).current
    }

    /// Spawn the engine. Refused once the session is shutting down.
    pub fn start(&self) -> Result<SupervisedProcess, StartError> {
        if self.shutdown.is_triggered() {
            return Err(StartError::ShuttingDown);
        }

        let mut inner = lock(&self.inner);
        if let (true, Some(process)) = (inner.state.is_active(), inner.current) {
            return Err(StartError::AlreadyRunning(process.pid));
        }

        inner.transition(ProcessState::Starting);
        let program = self.launcher.program().to_path_buf();
        if !program.exists() {
            inner.transition(ProcessState::Stopped);
            return Err(StartError::MissingExecutable(program));
        }

        tracing::info!(program = %program.display(), args = ?self.launcher.args(), "Starting engine");

        let spawned = Command::new(&program)
            .args(self.launcher.args())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(source) => {
                inner.transition(ProcessState::Stopped);
                return Err(StartError::Spawn { program, source });
            }
        };

        let Some(pid) = child.id() else {
            inner.transition(ProcessState::Stopped);
            return Err(StartError::NoHandle(program));
        };

        inner.generation += 1;
        let process = SupervisedProcess {
            pid,
            generation: inner.generation,
        };
        inner.current = Some(process);
        inner.transition(ProcessState::Running);
        drop(inner);

        tokio::spawn(watch_exit(
            child,
            process,
            self.inner.clone(),
            self.exits.clone(),
            self.shutdown.clone(),
        ));

        tracing::info!(pid, generation = process.generation, "Engine started");
        Ok(process)
    }

    /// Send the graceful stop signal (SIGINT) without waiting for the exit.
    ///
    /// Only the first call for a running process delivers a signal; every
    /// other call is a no-op.
    pub fn stop(&self) -> Result<StopOutcome, StopError> {
        let mut inner = lock(&self.inner);
        let process = match (inner.state, inner.current) {
            (ProcessState::Running, Some(process)) => process,
            _ => return Ok(StopOutcome::AlreadyStopped),
        };

        inner.transition(ProcessState::Stopping);
        send_signal(process.pid, Signal::SIGINT)?;
        tracing::info!(pid = process.pid, "Sent SIGINT to engine");
        Ok(StopOutcome::Signalled(process))
    }

    /// Wait until the exit of `process` has been observed.
    ///
    /// Returns `false` if it is still running after `timeout`.
    pub async fn wait_exit(&self, process: SupervisedProcess, timeout: Duration) -> bool {
        let mut exits = self.exits.subscribe();
        let waiting = exits.wait_for(|generation| *generation >= process.generation);
        let exited = matches!(tokio::time::timeout(timeout, waiting).await, Ok(Ok(_)));
        exited
    }

    /// Stop the engine and start it again.
    ///
    /// The old process gets `timeout` to exit after SIGINT before it is
    /// killed; a restart never leaves two engines running.
    pub async fn restart(&self, timeout: Duration) -> Result<SupervisedProcess, StartError> {
        let previous = match self.stop() {
            Ok(StopOutcome::Signalled(process)) => Some(process),
            Ok(StopOutcome::AlreadyStopped) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Graceful stop failed during restart");
                self.current()
            }
        };

        if let Some(process) = previous {
            if !self.wait_exit(process, timeout).await {
                tracing::warn!(
                    pid = process.pid,
                    timeout_secs = timeout.as_secs(),
                    "Engine did not exit in time, killing it"
                );
                self.kill(process);
                if !self.wait_exit(process, timeout).await {
                    tracing::error!(pid = process.pid, "Engine still running after SIGKILL");
                    return Err(StartError::AlreadyRunning(process.pid));
                }
            }
        }

        self.start()
    }

    /// SIGKILL, only used when a restart cannot wait any longer.
    fn kill(&self, process: SupervisedProcess) {
        let is_current = lock(&self.inner).current == Some(process);
        if is_current {
            if let Err(e) = send_signal(process.pid, Signal::SIGKILL) {
                tracing::warn!(error = %e, "Failed to kill engine");
            }
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn send_signal(pid: u32, sig: Signal) -> Result<(), StopError> {
    signal::kill(Pid::from_raw(pid as i32), sig).map_err(|source| StopError {
        pid,
        signal: sig,
        source,
    })
}

async fn watch_exit(
    mut child: Child,
    process: SupervisedProcess,
    inner: Arc<Mutex<Inner>>,
    exits: Arc<watch::Sender<u64>>,
    shutdown: Shutdown,
) {
    let status = child.wait().await;

    let requested = {
        let mut inner = lock(&inner);
        let requested = inner.state == ProcessState::Stopping;
        if inner.current == Some(process) {
            inner.current = None;
            inner.transition(ProcessState::Stopped);
        }
        requested
    };
    exits.send_replace(process.generation);

    let code = status.as_ref().ok().and_then(ExitStatus::code);
    match &status {
        Ok(status) => tracing::info!(pid = process.pid, %status, "Engine exited"),
        Err(e) => tracing::error!(pid = process.pid, error = %e, "Failed to wait for engine"),
    }

    if !requested {
        tracing::warn!(pid = process.pid, "Engine exited unexpectedly");
        shutdown.trigger(ShutdownReason::ProcessExited { code });
    }
}
