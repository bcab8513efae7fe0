//! Command-line surface and conversion into `SupervisorConfig`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::config::schema::{
    AutoFixMode, ConfigReference, HttpFetchOptions, ReloadMode, SupervisorConfig, UiVariant,
};

/// Error type for command-line conversion.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid config reference `{reference}`: {source}")]
    Reference {
        reference: String,
        #[source]
        source: url::ParseError,
    },

    #[error("check interval must be greater than zero")]
    ZeroInterval,
}

#[derive(Debug, Parser)]
#[command(
    name = "tpclash",
    about = "Transparent proxy supervisor for Clash",
    version,
    disable_version_flag = true
)]
pub struct Cli {
    /// Print version
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    pub version: Option<bool>,

    /// Enable debug log
    #[arg(long)]
    pub debug: bool,

    /// Enable test mode, exit automatically after 5 minutes
    #[arg(long)]
    pub test: bool,

    /// Clash home dir
    #[arg(short = 'd', long, default_value = "/data/clash")]
    pub home: PathBuf,

    /// Clash config local path or remote url
    #[arg(short = 'c', long, default_value = "/etc/clash.yaml")]
    pub config: String,

    /// Clash dashboard
    #[arg(short = 'u', long, value_enum, default_value_t = UiVariant::Yacd)]
    pub ui: UiVariant,

    /// Remote config check interval
    #[arg(short = 'i', long, default_value = "120s", value_parser = parse_duration)]
    pub check_interval: Duration,

    /// Http header when requesting a remote config (key=value)
    #[arg(long = "http-header", value_delimiter = ',', value_parser = parse_header)]
    pub http_headers: Vec<(String, String)>,

    /// Http request timeout when requesting a remote config
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub http_timeout: Duration,

    /// The password for encrypting the config file
    #[arg(long = "config-password")]
    pub config_password: Option<String>,

    /// Automatically repair config
    #[arg(long = "auto-fix", value_enum)]
    pub auto_fix: Option<AutoFixMode>,

    /// Extract files force
    #[arg(long)]
    pub force_extract: bool,

    /// Allow standard DNS port
    #[arg(long = "allow-standard-dns")]
    pub allow_standard_dns: bool,

    /// How config changes reach the running engine
    #[arg(long, value_enum, default_value_t = ReloadMode::Live)]
    pub reload_mode: ReloadMode,

    /// Auto deploy tracing dashboard
    #[cfg(feature = "premium")]
    #[arg(long)]
    pub enable_tracing: bool,
}

impl Cli {
    /// Validate the flags and build the immutable session configuration.
    pub fn into_config(self) -> Result<SupervisorConfig, LoadError> {
        if self.check_interval.is_zero() {
            return Err(LoadError::ZeroInterval);
        }

        let config_ref: ConfigReference =
            self.config.parse().map_err(|source| LoadError::Reference {
                reference: self.config.clone(),
                source,
            })?;

        #[cfg(feature = "premium")]
        let enable_tracing = self.enable_tracing;
        #[cfg(not(feature = "premium"))]
        let enable_tracing = false;

        Ok(SupervisorConfig {
            home: self.home,
            config_ref,
            check_interval: self.check_interval,
            http: HttpFetchOptions {
                headers: self.http_headers,
                timeout: self.http_timeout,
            },
            ui: self.ui,
            config_password: self.config_password.filter(|p| !p.is_empty()),
            auto_fix: self.auto_fix.unwrap_or_default(),
            reload_mode: self.reload_mode,
            debug: self.debug,
            test: self.test,
            enable_tracing,
            force_extract: self.force_extract,
            allow_standard_dns: self.allow_standard_dns,
            ..SupervisorConfig::default()
        })
    }
}

/// Parse `500ms`, `30s`, `2m`, `1h` and sums such as `1m30s`; a bare number means seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("invalid duration `{}`", s);
    if s.is_empty() {
        return Err(invalid());
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse().map(Duration::from_secs).map_err(|_| invalid());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let value: u64 = rest[..digits_end].parse().map_err(|_| invalid())?;
        let tail = &rest[digits_end..];
        let unit_end = tail.find(|c: char| c.is_ascii_digit()).unwrap_or(tail.len());
        let unit = &tail[..unit_end];

        let secs_per_unit = match unit {
            "ms" => None,
            "s" => Some(1),
            "m" => Some(60),
            "h" => Some(3600),
            "" => return Err(format!("missing duration unit in `{}`", s)),
            _ => return Err(format!("unknown duration unit `{}` in `{}`", unit, s)),
        };
        let part = match secs_per_unit {
            None => Duration::from_millis(value),
            Some(factor) => value
                .checked_mul(factor)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration `{}` is too large", s))?,
        };
        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration `{}` is too large", s))?;
        rest = &tail[unit_end..];
    }
    Ok(total)
}

/// Parse a `key=value` header.
pub fn parse_header(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("header `{}` must be key=value", s)),
    }
}
