//! tpclash
//!
//! Runs a Clash engine as a transparent gateway and keeps it in sync with
//! its configuration source.
//!
//! # Architecture Overview
//!
//! ```text
//!   config path / URL
//!          │ interval + file watch
//!          ▼
//!   ┌──────────────┐  latest-wins  ┌───────────────────┐  restart / PUT /configs
//!   │ ConfigSource │──────────────▶│ ReloadCoordinator │──────────────┐
//!   └──────────────┘               └───────────────────┘              ▼
//!                                                            ┌───────────────────┐
//!   ┌─────────────┐  start / stop                            │ ProcessSupervisor │──▶ xclash
//!   │ ControlLoop │─────────────────────────────────────────▶└───────────────────┘
//!   └─────────────┘                                                   │ exit
//!     │     │    ▲                                                    │
//!     │     │    └──────────────── Shutdown ◀── signals / test timer ─┘
//!     │     └──▶ Sidecar (tracing stack, docker compose)
//!     └──▶ Environment (sysctl, DOCKER-USER)
//! ```

use std::process::ExitCode;

use clap::Parser;

use tpclash::config::loader::Cli;
use tpclash::lifecycle::signals;
use tpclash::observability::logging;
use tpclash::{ControlLoop, Shutdown};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tpclash: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = logging::init(config.debug) {
        eprintln!("tpclash: failed to initialise logging: {}", e);
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tpclash starting");
    match serde_json::to_string(&config) {
        Ok(json) => tracing::debug!(config = %json, "Effective configuration"),
        Err(e) => tracing::debug!(error = %e, "Failed to render configuration"),
    }

    let shutdown = Shutdown::new();
    let _signals = signals::spawn_listener(shutdown.clone());

    match ControlLoop::new(config).with_shutdown(shutdown).run().await {
        Ok(report) => {
            tracing::info!(
                reason = ?report.reason,
                reloads = report.reloads,
                "tpclash exited"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "tpclash failed");
            ExitCode::FAILURE
        }
    }
}
