//! Session orchestration.
//!
//! # Responsibilities
//! - Bring the gateway up in order: host preconditions, configuration,
//!   engine, Docker compatibility, reload watch, tracing sidecar
//! - Wait for the single shutdown trigger
//! - Undo exactly the steps that were applied, in reverse order
//!
//! # Design Decisions
//! - Startup failures before the engine runs are fatal; host environment and
//!   sidecar failures are logged and tolerated
//! - Every shutdown step has an upper bound so a stuck dependency cannot
//!   hold the session open

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::source::fetcher_for;
use crate::config::{
    ClashValidator, ConfigFetcher, ConfigSource, ConfigValidator, FetchError, ParsedConfig,
    SupervisorConfig,
};
use crate::environment::{Environment, SystemEnvironment};
use crate::error::SupervisorError;
use crate::lifecycle::phase::LifecyclePhase;
use crate::lifecycle::shutdown::{Shutdown, ShutdownReason};
use crate::observability::{EventSink, LifecycleEvent};
use crate::reload::{write_live_config, ReloadCoordinator};
use crate::sidecar::{ComposeSidecar, Sidecar};
use crate::supervisor::{EngineLauncher, ProcessSupervisor, StartError, StopOutcome};

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub reason: Option<ShutdownReason>,
    pub reloads: u64,
    pub phase: LifecyclePhase,
}

/// Steps that have to be undone on the way out.
#[derive(Default)]
struct Applied {
    supervisor: Option<Arc<ProcessSupervisor>>,
    coordinator: Option<JoinHandle<u64>>,
    docker_compat: bool,
    sidecar: bool,
}

/// Owns one supervisor session from startup to the last cleanup step.
pub struct ControlLoop {
    config: Arc<SupervisorConfig>,
    fetcher: Option<Arc<dyn ConfigFetcher>>,
    validator: Arc<dyn ConfigValidator>,
    environment: Arc<dyn Environment>,
    sidecar: Arc<dyn Sidecar>,
    launcher: EngineLauncher,
    events: EventSink,
    shutdown: Shutdown,
    phase: LifecyclePhase,
}

impl ControlLoop {
    /// Session wired to the real host, engine binary and docker.
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            validator: Arc::new(ClashValidator::from_config(&config)),
            environment: Arc::new(SystemEnvironment::new()),
            sidecar: Arc::new(ComposeSidecar::new(&config.home)),
            launcher: EngineLauncher::for_engine(&config),
            fetcher: None,
            events: EventSink::disabled(),
            shutdown: Shutdown::new(),
            phase: LifecyclePhase::Init,
            config: Arc::new(config),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ConfigFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ConfigValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_sidecar(mut self, sidecar: Arc<dyn Sidecar>) -> Self {
        self.sidecar = sidecar;
        self
    }

    pub fn with_launcher(mut self, launcher: EngineLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Share an externally owned shutdown, e.g. one fed by signal handlers.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// Run the session to completion.
    ///
    /// Returns an error only for fatal startup failures, after everything
    /// already applied has been undone.
    pub async fn run(self) -> Result<SessionReport, SupervisorError> {
        let span = tracing::info_span!("session", id = %Uuid::new_v4());
        self.run_session().instrument(span).await
    }

    async fn run_session(mut self) -> Result<SessionReport, SupervisorError> {
        if self.config.config_password.is_some() {
            tracing::warn!("Encrypted configurations are not supported, ignoring --config-password");
        }

        let test_timer = self.spawn_test_timer();
        let mut applied = Applied::default();

        let failure = match self.startup(&mut applied).await {
            Ok(()) => None,
            Err(e) if self.shutdown.is_triggered() && is_cancellation(&e) => {
                tracing::info!(error = %e, "Startup interrupted by shutdown");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Startup failed");
                self.shutdown.trigger(ShutdownReason::Fatal(e.to_string()));
                Some(e)
            }
        };

        self.shutdown.cancelled().await;
        if let Some(timer) = test_timer {
            timer.abort();
        }

        let reason = self.shutdown.reason();
        if let Some(reason) = &reason {
            self.events.emit(LifecycleEvent::ShutdownTriggered {
                reason: reason.clone(),
            });
        }

        let reloads = self.unwind(applied).await;

        match failure {
            Some(e) => Err(e),
            None => {
                tracing::info!(reloads, "Session finished");
                Ok(SessionReport {
                    reason,
                    reloads,
                    phase: self.phase,
                })
            }
        }
    }

    async fn startup(&mut self, applied: &mut Applied) -> Result<(), SupervisorError> {
        let ok = match self.environment.apply_preconditions().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to apply network preconditions");
                false
            }
        };
        self.events.emit(LifecycleEvent::PreconditionsApplied { ok });

        let fetcher = match self.fetcher.take() {
            Some(fetcher) => fetcher,
            None => fetcher_for(&self.config).map_err(SupervisorError::InitialFetch)?,
        };
        let source = ConfigSource::new(fetcher, self.config.check_interval);
        let (snapshot, updates) = source
            .start(self.shutdown.clone())
            .await
            .map_err(SupervisorError::InitialFetch)?;

        let parsed = match self.validator.validate(snapshot.bytes()) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.events.emit(LifecycleEvent::ConfigRejected {
                    version: snapshot.short_version().to_string(),
                });
                return Err(SupervisorError::InitialConfig(e));
            }
        };
        if parsed.was_fixed() {
            tracing::info!(mode = ?self.config.auto_fix, "Configuration auto-fixed");
        }

        let path = self.config.internal_config_path();
        write_live_config(&path, parsed.rendered())
            .await
            .map_err(|source| SupervisorError::WriteConfig {
                path: path.clone(),
                source,
            })?;
        tracing::info!(path = %path.display(), version = %snapshot.short_version(), "Configuration accepted");
        self.events.emit(LifecycleEvent::ConfigAccepted {
            version: snapshot.short_version().to_string(),
        });
        self.phase = LifecyclePhase::ConfigReady;

        let supervisor = Arc::new(ProcessSupervisor::new(
            self.launcher.clone(),
            self.shutdown.clone(),
        ));
        applied.supervisor = Some(supervisor.clone());
        let process = supervisor.start().map_err(SupervisorError::ProcessStart)?;
        self.events.emit(LifecycleEvent::ProcessStarted { pid: process.pid });
        self.phase = LifecyclePhase::ProcessRunning;

        if self.shutdown.is_triggered() {
            return Ok(());
        }

        applied.docker_compat = true;
        let ok = match self.environment.enable_docker_compat().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to enable Docker compatibility");
                false
            }
        };
        self.events.emit(LifecycleEvent::DockerCompatEnabled { ok });

        let sidecar = self.config.enable_tracing.then(|| self.sidecar.clone());
        let coordinator = ReloadCoordinator::new(
            self.config.clone(),
            self.validator.clone(),
            supervisor,
            sidecar,
            self.shutdown.clone(),
            self.events.clone(),
            snapshot,
            parsed.clone(),
        );
        applied.coordinator = Some(tokio::spawn(coordinator.run(updates).in_current_span()));
        self.events.emit(LifecycleEvent::ReloadWatchStarted);
        tracing::info!(
            interval_secs = self.config.check_interval.as_secs(),
            source = %self.config.config_ref,
            "Watching configuration"
        );

        if self.config.enable_tracing && !self.shutdown.is_triggered() {
            applied.sidecar = true;
            self.start_sidecar(&parsed).await;
        }

        Ok(())
    }

    /// Clear leftovers of an unclean exit, then deploy.
    async fn start_sidecar(&mut self, parsed: &ParsedConfig) {
        let scope = self.shutdown.child_scope();

        let ok = match self.sidecar.teardown(&scope).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Tracing sidecar cleanup failed");
                false
            }
        };
        self.events.emit(LifecycleEvent::SidecarTornDown { ok });

        let ok = match self.sidecar.deploy(&scope, parsed).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Tracing sidecar deployment failed, continuing without it");
                false
            }
        };
        self.events.emit(LifecycleEvent::SidecarDeployed { ok });
        if ok {
            self.phase = LifecyclePhase::SidecarRunning;
        }
    }

    fn spawn_test_timer(&self) -> Option<JoinHandle<()>> {
        if !self.config.test {
            return None;
        }
        let shutdown = self.shutdown.clone();
        let timeout = self.config.test_timeout;
        tracing::info!(timeout_secs = timeout.as_secs(), "Test mode enabled");
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    shutdown.trigger(ShutdownReason::TestTimeout);
                }
                _ = shutdown.cancelled() => {}
            }
        }))
    }

    /// Undo applied steps in reverse order. Returns the reload count.
    async fn unwind(&mut self, applied: Applied) -> u64 {
        self.phase = LifecyclePhase::ShuttingDown;
        let grace = self.config.stop_grace_period;

        let mut reloads = 0;
        if let Some(mut handle) = applied.coordinator {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(count)) => reloads = count,
                Ok(Err(e)) => tracing::warn!(error = %e, "Reload watch task failed"),
                Err(_) => {
                    tracing::warn!("Reload in progress did not finish, abandoning it");
                    handle.abort();
                }
            }
        }

        if applied.docker_compat {
            let ok = match self.environment.disable_docker_compat().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to disable Docker compatibility");
                    false
                }
            };
            self.events.emit(LifecycleEvent::DockerCompatDisabled { ok });
        }

        if applied.sidecar {
            // The session scope is already cancelled; teardown gets its own.
            let scope = CancellationToken::new();
            let timeout = self.config.sidecar_teardown_timeout;
            let ok = match tokio::time::timeout(timeout, self.sidecar.teardown(&scope)).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Tracing sidecar teardown failed");
                    false
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = timeout.as_secs(),
                        "Tracing sidecar teardown timed out"
                    );
                    false
                }
            };
            self.events.emit(LifecycleEvent::SidecarTornDown { ok });
        }

        if let Some(supervisor) = applied.supervisor {
            let process = supervisor.current();
            let signalled = match supervisor.stop() {
                Ok(StopOutcome::Signalled(_)) => true,
                Ok(StopOutcome::AlreadyStopped) => false,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to signal engine");
                    false
                }
            };
            self.events.emit(LifecycleEvent::ProcessStopRequested { signalled });

            if let Some(process) = process {
                if !supervisor.wait_exit(process, grace).await {
                    tracing::warn!(
                        pid = process.pid,
                        grace_secs = grace.as_secs(),
                        "Engine still running after grace period"
                    );
                }
            }
        }

        self.phase = LifecyclePhase::Stopped;
        self.events.emit(LifecycleEvent::Stopped);
        tracing::info!("Shutdown complete");
        reloads
    }
}

/// Startup errors caused by the shutdown itself rather than a real failure.
fn is_cancellation(error: &SupervisorError) -> bool {
    matches!(
        error,
        SupervisorError::InitialFetch(FetchError::Cancelled)
            | SupervisorError::ProcessStart(StartError::ShuttingDown)
    )
}
