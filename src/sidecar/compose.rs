//! Sidecar deployed as a docker compose project.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ParsedConfig;
use crate::environment::system::run;
use crate::sidecar::{Sidecar, SidecarError};

pub const PROJECT_NAME: &str = "tpclash-tracing";

const COMPOSE_TEMPLATE: &str = r#"name: {project}
services:
  loki:
    image: grafana/loki:2.9.4
    restart: unless-stopped
    network_mode: host
    volumes:
      - loki-data:/loki
  vector:
    image: timberio/vector:0.34.1-alpine
    restart: unless-stopped
    network_mode: host
    environment:
      CLASH_API: "http://{controller}"
      CLASH_SECRET: "{secret}"
      LOKI_ENDPOINT: "http://127.0.0.1:3100"
  grafana:
    image: grafana/grafana:10.2.3
    restart: unless-stopped
    network_mode: host
    volumes:
      - grafana-data:/var/lib/grafana
volumes:
  loki-data:
  grafana-data:
"#;

/// Runs the tracing stack with `docker compose`.
#[derive(Debug, Clone)]
pub struct ComposeSidecar {
    docker: PathBuf,
    dir: PathBuf,
}

impl ComposeSidecar {
    /// Compose files live under `<home>/tracing`.
    pub fn new(home: &Path) -> Self {
        Self {
            docker: PathBuf::from("docker"),
            dir: home.join("tracing"),
        }
    }

    pub fn compose_file(&self) -> PathBuf {
        self.dir.join("docker-compose.yaml")
    }

    /// Render the compose file for the engine's control API.
    pub fn render(config: &ParsedConfig) -> Result<String, SidecarError> {
        let controller = config.controller_endpoint().ok_or(SidecarError::NoController)?;
        let secret = config.settings().secret.clone().unwrap_or_default();
        Ok(COMPOSE_TEMPLATE
            .replace("{project}", PROJECT_NAME)
            .replace("{controller}", &controller)
            .replace("{secret}", &secret.replace('"', "\\\"")))
    }

    async fn compose(&self, scope: &CancellationToken, args: &[&str]) -> Result<(), SidecarError> {
        let mut full = vec!["compose", "-p", PROJECT_NAME];
        full.extend_from_slice(args);
        tokio::select! {
            result = run(&self.docker, &full) => Ok(result?),
            _ = scope.cancelled() => Err(SidecarError::Cancelled),
        }
    }
}

#[async_trait]
impl Sidecar for ComposeSidecar {
    async fn deploy(&self, scope: &CancellationToken, config: &ParsedConfig) -> Result<(), SidecarError> {
        let rendered = Self::render(config)?;
        let file = self.compose_file();
        let io_err = |source| SidecarError::Io {
            path: file.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        tokio::fs::write(&file, rendered).await.map_err(io_err)?;

        let file_arg = file.to_string_lossy().into_owned();
        self.compose(scope, &["-f", file_arg.as_str(), "up", "-d"]).await?;
        tracing::info!(project = PROJECT_NAME, "Tracing sidecar deployed");
        Ok(())
    }

    async fn teardown(&self, scope: &CancellationToken) -> Result<(), SidecarError> {
        self.compose(scope, &["down", "--remove-orphans"]).await?;
        tracing::info!(project = PROJECT_NAME, "Tracing sidecar removed");
        Ok(())
    }
}
