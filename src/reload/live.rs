//! Live reload through the engine's control API.

use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ParsedConfig;

#[derive(Debug, Error)]
pub enum LiveReloadError {
    #[error("configuration has no external-controller")]
    NoController,

    #[error("reload request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("engine rejected reload with {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Asks a running engine to load a configuration file.
#[derive(Debug, Clone)]
pub struct LiveReloader {
    client: reqwest::Client,
}

impl LiveReloader {
    pub fn new(timeout: Duration) -> Result<Self, LiveReloadError> {
        // The engine is often the system proxy; talk to it directly.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    /// `PUT /configs?force=true` with the path of the live configuration.
    pub async fn reload(&self, config: &ParsedConfig, path: &Path) -> Result<(), LiveReloadError> {
        let endpoint = config.controller_endpoint().ok_or(LiveReloadError::NoController)?;
        let url = format!("http://{}/configs?force=true", endpoint);

        let mut request = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "path": path }));
        if let Some(secret) = config.settings().secret.as_deref().filter(|s| !s.is_empty()) {
            request = request.bearer_auth(secret);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LiveReloadError::Status { status, body });
        }

        tracing::debug!(url = %url, %status, "Engine accepted live reload");
        Ok(())
    }
}
