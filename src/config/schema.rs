//! Supervisor configuration definitions.
//!
//! `SupervisorConfig` is captured once at startup and shared read-only
//! (behind an `Arc`) by every subsystem for the rest of the session.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// File name of the live engine configuration under the home directory.
pub const INTERNAL_CONFIG_NAME: &str = "xclash.yaml";

/// File name of the engine executable under the home directory.
pub const INTERNAL_CLASH_BIN_NAME: &str = "xclash";

/// Root configuration for the supervisor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Engine home directory (binary, live config, UI assets).
    pub home: PathBuf,

    /// Where the engine configuration comes from.
    pub config_ref: ConfigReference,

    /// Interval between configuration fetches.
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,

    /// Options for remote configuration requests.
    pub http: HttpFetchOptions,

    /// Dashboard served by the engine.
    pub ui: UiVariant,

    /// Password for configs encrypted at rest.
    #[serde(skip_serializing)]
    pub config_password: Option<String>,

    /// Automatic configuration repair.
    pub auto_fix: AutoFixMode,

    /// How configuration changes reach the running engine.
    pub reload_mode: ReloadMode,

    pub debug: bool,

    /// Exit automatically after `test_timeout`.
    pub test: bool,

    /// Deploy the tracing sidecar alongside the engine.
    pub enable_tracing: bool,

    pub force_extract: bool,

    /// Accept a DNS listener on port 53.
    pub allow_standard_dns: bool,

    #[serde(with = "duration_secs")]
    pub test_timeout: Duration,

    /// Upper bound for sidecar teardown during shutdown.
    #[serde(with = "duration_secs")]
    pub sidecar_teardown_timeout: Duration,

    /// How long to wait for the engine to exit after the graceful stop.
    #[serde(with = "duration_secs")]
    pub stop_grace_period: Duration,

    /// How long a restart waits for the old engine before killing it.
    #[serde(with = "duration_secs")]
    pub restart_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from("/data/clash"),
            config_ref: ConfigReference::Local(PathBuf::from("/etc/clash.yaml")),
            check_interval: Duration::from_secs(120),
            http: HttpFetchOptions::default(),
            ui: UiVariant::Yacd,
            config_password: None,
            auto_fix: AutoFixMode::Off,
            reload_mode: ReloadMode::Live,
            debug: false,
            test: false,
            enable_tracing: false,
            force_extract: false,
            allow_standard_dns: false,
            test_timeout: Duration::from_secs(5 * 60),
            sidecar_teardown_timeout: Duration::from_secs(30),
            stop_grace_period: Duration::from_secs(10),
            restart_timeout: Duration::from_secs(30),
        }
    }
}

impl SupervisorConfig {
    /// Path of the live engine configuration.
    pub fn internal_config_path(&self) -> PathBuf {
        self.home.join(INTERNAL_CONFIG_NAME)
    }

    /// Path of the engine executable.
    pub fn engine_bin_path(&self) -> PathBuf {
        self.home.join(INTERNAL_CLASH_BIN_NAME)
    }

    /// Path of the dashboard assets.
    pub fn ui_path(&self) -> PathBuf {
        self.home.join(self.ui.dir_name())
    }
}

/// Location of the engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigReference {
    Local(PathBuf),
    Remote(Url),
}

impl ConfigReference {
    pub fn is_remote(&self) -> bool {
        matches!(self, ConfigReference::Remote(_))
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            ConfigReference::Local(path) => Some(path),
            ConfigReference::Remote(_) => None,
        }
    }
}

impl FromStr for ConfigReference {
    type Err = url::ParseError;

    /// `http://` and `https://` references are remote, anything else is a path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(ConfigReference::Remote(Url::parse(s)?))
        } else {
            Ok(ConfigReference::Local(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for ConfigReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigReference::Local(path) => write!(f, "{}", path.display()),
            ConfigReference::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Options applied to remote configuration requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpFetchOptions {
    /// Extra request headers.
    pub headers: Vec<(String, String)>,

    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for HttpFetchOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Dashboard bundle served through the engine's `-ext-ui`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UiVariant {
    Official,
    Yacd,
}

impl UiVariant {
    pub fn dir_name(&self) -> &'static str {
        match self {
            UiVariant::Official => "official",
            UiVariant::Yacd => "yacd",
        }
    }
}

/// Automatic configuration repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AutoFixMode {
    #[default]
    #[value(skip)]
    Off,
    /// Force-enable the tun inbound.
    Tun,
    /// Enable tun and redirect the outbound interface through eBPF.
    Ebpf,
}

/// Whether the engine can pick up a new configuration without restarting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReloadMode {
    /// Ask the engine to reload through its control API.
    Live,
    /// Stop the engine and start it again.
    Restart,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
