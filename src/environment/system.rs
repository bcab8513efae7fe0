//! Environment changes applied to the local host.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::process::Command;

use crate::environment::{Environment, EnvironmentError};

/// Kernel parameters a transparent gateway needs.
pub const FORWARDING_SYSCTLS: &[(&str, &str)] = &[
    ("net.ipv4.ip_forward", "1"),
    ("net.ipv6.conf.all.forwarding", "1"),
    ("net.ipv4.conf.all.route_localnet", "1"),
];

const DOCKER_CHAIN: &str = "DOCKER-USER";

/// Applies sysctls through `/proc/sys` and Docker rules through `iptables`.
///
/// Only a rule this instance inserted is ever deleted again.
#[derive(Debug)]
pub struct SystemEnvironment {
    proc_sys: PathBuf,
    iptables: PathBuf,
    iptables_args: Vec<String>,
    inserted: AtomicBool,
}

impl Default for SystemEnvironment {
    fn default() -> Self {
        Self {
            proc_sys: PathBuf::from("/proc/sys"),
            iptables: PathBuf::from("iptables"),
            iptables_args: Vec::new(),
            inserted: AtomicBool::new(false),
        }
    }
}

impl SystemEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root other than `/proc/sys` for the sysctl tree.
    pub fn with_proc_sys(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_sys = root.into();
        self
    }

    /// Run `program` with `leading_args` in place of `iptables`.
    pub fn with_iptables<I, S>(mut self, program: impl Into<PathBuf>, leading_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.iptables = program.into();
        self.iptables_args = leading_args.into_iter().map(Into::into).collect();
        self
    }

    async fn iptables(&self, args: &[&str]) -> Result<(), EnvironmentError> {
        let mut full: Vec<&str> = self.iptables_args.iter().map(String::as_str).collect();
        full.extend_from_slice(args);
        run(&self.iptables, &full).await
    }

    fn sysctl_path(&self, key: &str) -> PathBuf {
        self.proc_sys.join(key.replace('.', "/"))
    }

    async fn write_sysctl(&self, key: &str, value: &str) -> Result<(), EnvironmentError> {
        let path = self.sysctl_path(key);
        let current = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        if current.trim() == value {
            tracing::debug!(key, value, "Sysctl already set");
            return Ok(());
        }
        tokio::fs::write(&path, value)
            .await
            .map_err(|source| EnvironmentError::Sysctl {
                key: key.to_string(),
                source,
            })?;
        tracing::info!(key, value, "Sysctl applied");
        Ok(())
    }

    /// Docker installs its `DOCKER-USER` chain; without it there is nothing to do.
    async fn docker_chain_present(&self) -> bool {
        self.iptables(&["-n", "-L", DOCKER_CHAIN]).await.is_ok()
    }

    async fn accept_rule_present(&self) -> bool {
        self.iptables(&["-C", DOCKER_CHAIN, "-j", "ACCEPT"]).await.is_ok()
    }
}

#[async_trait]
impl Environment for SystemEnvironment {
    async fn apply_preconditions(&self) -> Result<(), EnvironmentError> {
        for (key, value) in FORWARDING_SYSCTLS {
            self.write_sysctl(key, value).await?;
        }
        Ok(())
    }

    async fn enable_docker_compat(&self) -> Result<(), EnvironmentError> {
        if !self.docker_chain_present().await {
            tracing::debug!("Docker chain not found, compatibility rule not needed");
            return Ok(());
        }
        if self.accept_rule_present().await {
            tracing::debug!(chain = DOCKER_CHAIN, "Accept rule already present, leaving it alone");
            return Ok(());
        }
        self.iptables(&["-I", DOCKER_CHAIN, "-j", "ACCEPT"]).await?;
        self.inserted.store(true, Ordering::SeqCst);
        tracing::info!(chain = DOCKER_CHAIN, "Docker compatibility enabled");
        Ok(())
    }

    async fn disable_docker_compat(&self) -> Result<(), EnvironmentError> {
        if !self.inserted.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.accept_rule_present().await {
            tracing::debug!(chain = DOCKER_CHAIN, "Accept rule already removed");
            return Ok(());
        }
        if let Err(e) = self.iptables(&["-D", DOCKER_CHAIN, "-j", "ACCEPT"]).await {
            self.inserted.store(true, Ordering::SeqCst);
            return Err(e);
        }
        tracing::info!(chain = DOCKER_CHAIN, "Docker compatibility disabled");
        Ok(())
    }
}

/// Run a command to completion, turning a non-zero exit into an error.
///
/// Dropping the future kills the command.
pub(crate) async fn run(program: &Path, args: &[&str]) -> Result<(), EnvironmentError> {
    let command = format!("{} {}", program.display(), args.join(" "));
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| EnvironmentError::Spawn {
            command: command.clone(),
            source,
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(EnvironmentError::Command {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
