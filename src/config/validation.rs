//! Engine configuration validation.
//!
//! # Responsibilities
//! - Reject malformed configuration before it is written to the live path
//! - Check the settings a transparent proxy cannot run without (DNS, tun)
//! - Apply the optional auto-fix and render the document that gets written
//!
//! # Design Decisions
//! - Validation is a pure function of the bytes and the supervisor flags
//! - Unknown engine settings are preserved untouched

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::config::schema::{AutoFixMode, SupervisorConfig};

/// Reasons a configuration is refused.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration is empty")]
    Empty,

    #[error("malformed configuration: {0}")]
    Malformed(#[from] serde_yaml::Error),

    #[error("configuration root must be a mapping")]
    NotAMapping,

    #[error("dns must be enabled for transparent proxying")]
    DnsDisabled,

    #[error("dns listens on standard port 53 ({0}); pass --allow-standard-dns to permit it")]
    StandardDnsPort(String),

    #[error("tun must be enabled for transparent proxying (try --auto-fix=tun)")]
    TunDisabled,

    #[error("ebpf auto-fix requires `interface-name` to be set")]
    MissingInterface,
}

/// Decides whether raw configuration bytes may reach the engine.
pub trait ConfigValidator: Send + Sync {
    fn validate(&self, raw: &[u8]) -> Result<ParsedConfig, ConfigError>;
}

/// The engine settings the supervisor cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineSettings {
    pub mode: Option<String>,
    pub external_controller: Option<String>,
    pub secret: Option<String>,
    pub interface_name: Option<String>,
    pub dns: DnsSettings,
    pub tun: TunSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DnsSettings {
    pub enable: bool,
    pub listen: Option<String>,
    pub enhanced_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TunSettings {
    pub enable: bool,
    pub stack: Option<String>,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfig {
    settings: EngineSettings,
    rendered: Vec<u8>,
    fixed: bool,
}

impl ParsedConfig {
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Bytes to write to the live configuration path.
    pub fn rendered(&self) -> &[u8] {
        &self.rendered
    }

    /// True when auto-fix changed the document.
    pub fn was_fixed(&self) -> bool {
        self.fixed
    }

    /// Address of the engine's control API, reachable from this host.
    pub fn controller_endpoint(&self) -> Option<String> {
        let addr = self.settings.external_controller.as_deref()?.trim();
        if addr.is_empty() {
            return None;
        }
        let (host, port) = addr.rsplit_once(':')?;
        let host = match host {
            "" | "0.0.0.0" => "127.0.0.1",
            "[::]" => "[::1]",
            other => other,
        };
        Some(format!("{}:{}", host, port))
    }

    /// The sidecar reads from the control API, so it follows the controller.
    pub fn requires_sidecar_redeploy(&self, previous: &ParsedConfig) -> bool {
        self.settings.external_controller != previous.settings.external_controller
            || self.settings.secret != previous.settings.secret
    }
}

/// Validator for Clash-format YAML.
#[derive(Debug, Clone, Default)]
pub struct ClashValidator {
    auto_fix: AutoFixMode,
    allow_standard_dns: bool,
}

impl ClashValidator {
    pub fn new(auto_fix: AutoFixMode, allow_standard_dns: bool) -> Self {
        Self {
            auto_fix,
            allow_standard_dns,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.auto_fix, config.allow_standard_dns)
    }

    fn apply_fix(&self, doc: &mut Mapping) -> Result<bool, ConfigError> {
        match self.auto_fix {
            AutoFixMode::Off => Ok(false),
            AutoFixMode::Tun => Ok(fix_tun(doc)),
            AutoFixMode::Ebpf => {
                let iface = doc
                    .get("interface-name")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .ok_or(ConfigError::MissingInterface)?;
                let tun_fixed = fix_tun(doc);
                let ebpf = section(doc, "ebpf");
                let ebpf_fixed = !ebpf.contains_key("redirect-to-tun");
                if ebpf_fixed {
                    ebpf.insert(
                        "redirect-to-tun".into(),
                        Value::Sequence(vec![Value::from(iface)]),
                    );
                }
                Ok(tun_fixed || ebpf_fixed)
            }
        }
    }
}

impl ConfigValidator for ClashValidator {
    fn validate(&self, raw: &[u8]) -> Result<ParsedConfig, ConfigError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(ConfigError::Empty);
        }

        let mut doc = match serde_yaml::from_slice::<Value>(raw)? {
            Value::Mapping(map) => map,
            _ => return Err(ConfigError::NotAMapping),
        };

        let fixed = self.apply_fix(&mut doc)?;
        let rendered = if fixed {
            serde_yaml::to_string(&doc)?.into_bytes()
        } else {
            raw.to_vec()
        };

        let settings: EngineSettings = serde_yaml::from_value(Value::Mapping(doc))?;

        if !settings.dns.enable {
            return Err(ConfigError::DnsDisabled);
        }
        if let Some(listen) = &settings.dns.listen {
            if !self.allow_standard_dns && listen_port(listen) == Some(53) {
                return Err(ConfigError::StandardDnsPort(listen.clone()));
            }
        }
        if !settings.tun.enable {
            return Err(ConfigError::TunDisabled);
        }

        Ok(ParsedConfig {
            settings,
            rendered,
            fixed,
        })
    }
}

fn listen_port(listen: &str) -> Option<u16> {
    listen.rsplit_once(':')?.1.parse().ok()
}

/// Get the mapping under `key`, replacing anything that is not a mapping.
fn section<'a>(doc: &'a mut Mapping, key: &str) -> &'a mut Mapping {
    if !matches!(doc.get(key), Some(Value::Mapping(_))) {
        doc.insert(key.into(), Value::Mapping(Mapping::new()));
    }
    match doc.get_mut(key) {
        Some(Value::Mapping(map)) => map,
        _ => unreachable!("section was just inserted"),
    }
}

fn fix_tun(doc: &mut Mapping) -> bool {
    let tun = section(doc, "tun");
    if tun.get("enable").and_then(Value::as_bool) == Some(true) {
        return false;
    }
    tun.insert("enable".into(), Value::Bool(true));
    for (key, value) in [
        ("stack", Value::from("system")),
        ("auto-route", Value::Bool(true)),
        ("auto-detect-interface", Value::Bool(true)),
    ] {
        if !tun.contains_key(key) {
            tun.insert(key.into(), value);
        }
    }
    true
}
