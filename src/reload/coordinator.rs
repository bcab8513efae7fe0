//! Propagation of configuration changes into the running engine.
//!
//! # Responsibilities
//! - Skip snapshots identical to the accepted one
//! - Validate before touching the live path
//! - Write the live file, then reload (live API) or restart the engine
//! - Redeploy the sidecar when the engine controller moves
//!
//! # Design Decisions
//! - One task applies updates one at a time; updates arriving meanwhile
//!   collapse in the mailbox, so the engine converges on the newest snapshot
//! - That task is the only writer of the live file after startup
//! - A snapshot whose write failed stays pending and is retried every
//!   check interval until it lands or a newer one replaces it

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{
    ConfigUpdates, ConfigValidator, ParsedConfig, RawConfigSnapshot, ReloadMode, SupervisorConfig,
};
use crate::lifecycle::{Shutdown, ShutdownReason};
use crate::observability::{EventSink, LifecycleEvent};
use crate::reload::live::LiveReloader;
use crate::sidecar::Sidecar;
use crate::supervisor::{ProcessSupervisor, StartError};

/// What happened to one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Unchanged,
    Rejected,
    WriteFailed,
    Reloaded(ReloadMode),
    /// The engine could not be brought back up.
    Failed,
}

/// Write the live configuration through a temporary file and a rename.
pub async fn write_live_config(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

pub struct ReloadCoordinator {
    config: Arc<SupervisorConfig>,
    validator: Arc<dyn ConfigValidator>,
    supervisor: Arc<ProcessSupervisor>,
    sidecar: Option<Arc<dyn Sidecar>>,
    live: Option<LiveReloader>,
    shutdown: Shutdown,
    events: EventSink,
    accepted: RawConfigSnapshot,
    parsed: ParsedConfig,
}

impl ReloadCoordinator {
    /// Take ownership of the configuration the engine was started with.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<SupervisorConfig>,
        validator: Arc<dyn ConfigValidator>,
        supervisor: Arc<ProcessSupervisor>,
        sidecar: Option<Arc<dyn Sidecar>>,
        shutdown: Shutdown,
        events: EventSink,
        accepted: RawConfigSnapshot,
        parsed: ParsedConfig,
    ) -> Self {
        let live = match LiveReloader::new(config.http.timeout) {
            Ok(live) => Some(live),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Live reload client unavailable, updates will restart the engine"
                );
                None
            }
        };
        Self {
            config,
            validator,
            supervisor,
            sidecar,
            live,
            shutdown,
            events,
            accepted,
            parsed,
        }
    }

    /// The configuration the engine is currently running.
    pub fn parsed(&self) -> &ParsedConfig {
        &self.parsed
    }

    /// Apply updates until shutdown. Returns the number of reloads.
    pub async fn run(mut self, mut updates: ConfigUpdates) -> u64 {
        let mut reloads = 0;
        let mut pending: Option<RawConfigSnapshot> = None;
        loop {
            let next = match pending.take() {
                // The source will not publish the same content twice.
                Some(failed) => tokio::select! {
                    next = updates.next(&self.shutdown) => next,
                    _ = tokio::time::sleep(self.config.check_interval) => {
                        tracing::debug!(
                            version = %failed.short_version(),
                            "Retrying configuration write"
                        );
                        Some(failed)
                    }
                },
                None => updates.next(&self.shutdown).await,
            };
            let Some(snapshot) = next else { break };

            match self.apply(snapshot.clone()).await {
                ReloadOutcome::Reloaded(_) => reloads += 1,
                ReloadOutcome::WriteFailed => pending = Some(snapshot),
                _ => {}
            }
        }
        tracing::debug!(reloads, "Reload watch stopped");
        reloads
    }

    /// Apply one snapshot.
    pub async fn apply(&mut self, snapshot: RawConfigSnapshot) -> ReloadOutcome {
        let version = snapshot.short_version().to_string();

        if snapshot == self.accepted {
            tracing::debug!(version = %version, "Snapshot matches running configuration");
            self.events.emit(LifecycleEvent::ConfigUnchanged { version });
            return ReloadOutcome::Unchanged;
        }

        let parsed = match self.validator.validate(snapshot.bytes()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(
                    version = %version,
                    error = %e,
                    "Rejected configuration update, engine keeps its current configuration"
                );
                self.events.emit(LifecycleEvent::ConfigRejected { version });
                return ReloadOutcome::Rejected;
            }
        };

        let path = self.config.internal_config_path();
        if let Err(e) = write_live_config(&path, parsed.rendered()).await {
            tracing::error!(path = %path.display(), error = %e, "Failed to write configuration");
            return ReloadOutcome::WriteFailed;
        }

        let mode = match self.config.reload_mode {
            ReloadMode::Live => match &self.live {
                Some(live) => match live.reload(&parsed, &path).await {
                    Ok(()) => ReloadMode::Live,
                    Err(e) => {
                        tracing::warn!(error = %e, "Live reload failed, restarting engine");
                        ReloadMode::Restart
                    }
                },
                None => ReloadMode::Restart,
            },
            ReloadMode::Restart => ReloadMode::Restart,
        };

        if mode == ReloadMode::Restart {
            match self.supervisor.restart(self.config.restart_timeout).await {
                Ok(process) => tracing::debug!(pid = process.pid, "Engine restarted"),
                Err(StartError::ShuttingDown) => {
                    tracing::info!("Shutdown in progress, restart abandoned");
                    return ReloadOutcome::Failed;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Engine restart failed");
                    self.shutdown
                        .trigger(ShutdownReason::Fatal(format!("engine restart failed: {}", e)));
                    return ReloadOutcome::Failed;
                }
            }
        }

        tracing::info!(version = %version, mode = ?mode, "Configuration reloaded");
        self.events.emit(LifecycleEvent::ConfigReloaded { version, mode });

        let previous = std::mem::replace(&mut self.parsed, parsed);
        self.accepted = snapshot;

        if let Some(sidecar) = &self.sidecar {
            if self.parsed.requires_sidecar_redeploy(&previous) {
                self.redeploy_sidecar(sidecar.clone()).await;
            }
        }

        ReloadOutcome::Reloaded(mode)
    }

    async fn redeploy_sidecar(&self, sidecar: Arc<dyn Sidecar>) {
        tracing::info!("Engine controller changed, redeploying tracing sidecar");
        let scope = self.shutdown.child_scope();
        if let Err(e) = sidecar.teardown(&scope).await {
            tracing::warn!(error = %e, "Tracing sidecar cleanup failed");
        }
        if let Err(e) = sidecar.deploy(&scope, &self.parsed).await {
            tracing::error!(error = %e, "Tracing sidecar redeploy failed");
        }
    }
}
