//! Configuration fetching and change publication.
//!
//! # Data Flow
//! ```text
//! start():  fetch (blocking) → first snapshot returned to the caller
//! watch:    interval tick / local file event
//!     → fetch → compare with last published
//!     → changed: overwrite the mailbox slot (latest wins)
//!     → unchanged or error: nothing published
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};
use url::Url;

use crate::config::schema::{ConfigReference, HttpFetchOptions, SupervisorConfig};
use crate::config::snapshot::RawConfigSnapshot;
use crate::config::watcher::ConfigWatcher;
use crate::lifecycle::Shutdown;

/// Errors while resolving a configuration reference.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request to {url} failed: {source}")]
    Http {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: Url, status: reqwest::StatusCode },

    #[error("invalid http header `{0}`")]
    InvalidHeader(String),

    #[error("fetch cancelled by shutdown")]
    Cancelled,
}

/// Resolves a configuration reference into raw bytes.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    async fn fetch(&self) -> Result<RawConfigSnapshot, FetchError>;

    /// Local file backing this fetcher, if any.
    fn local_path(&self) -> Option<PathBuf> {
        None
    }
}

/// Reads the configuration from a local file.
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    path: PathBuf,
}

impl LocalFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigFetcher for LocalFetcher {
    async fn fetch(&self) -> Result<RawConfigSnapshot, FetchError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|source| FetchError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(RawConfigSnapshot::new(bytes))
    }

    fn local_path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

/// Downloads the configuration over HTTP(S).
#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    url: Url,
    client: reqwest::Client,
}

impl RemoteFetcher {
    pub fn new(url: Url, options: &HttpFetchOptions) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &options.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| FetchError::InvalidHeader(key.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| FetchError::InvalidHeader(format!("{}={}", key, value)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .default_headers(headers)
            .build()
            .map_err(|source| FetchError::Http {
                url: url.clone(),
                source,
            })?;

        Ok(Self { url, client })
    }
}

#[async_trait]
impl ConfigFetcher for RemoteFetcher {
    async fn fetch(&self) -> Result<RawConfigSnapshot, FetchError> {
        let http_err = |source| FetchError::Http {
            url: self.url.clone(),
            source,
        };

        let response = self.client.get(self.url.clone()).send().await.map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status,
            });
        }

        let body = response.bytes().await.map_err(http_err)?;
        Ok(RawConfigSnapshot::new(body.to_vec()))
    }
}

/// Build the fetcher matching the configured reference.
pub fn fetcher_for(config: &SupervisorConfig) -> Result<Arc<dyn ConfigFetcher>, FetchError> {
    Ok(match &config.config_ref {
        ConfigReference::Local(path) => Arc::new(LocalFetcher::new(path.clone())),
        ConfigReference::Remote(url) => Arc::new(RemoteFetcher::new(url.clone(), &config.http)?),
    })
}

/// Receiving end of the single-slot, latest-wins update mailbox.
pub struct ConfigUpdates {
    rx: watch::Receiver<RawConfigSnapshot>,
}

impl ConfigUpdates {
    pub(crate) fn from_receiver(rx: watch::Receiver<RawConfigSnapshot>) -> Self {
        Self { rx }
    }

    /// Wait for the next published snapshot.
    ///
    /// Snapshots published while nobody was waiting collapse into the newest
    /// one. Returns `None` on shutdown or when the source has stopped.
    pub async fn next(&mut self, shutdown: &Shutdown) -> Option<RawConfigSnapshot> {
        tokio::select! {
            changed = self.rx.changed() => match changed {
                Ok(()) => Some(self.rx.borrow_and_update().clone()),
                Err(_) => None,
            },
            _ = shutdown.cancelled() => None,
        }
    }
}

/// Fetches the configuration eagerly, then on a fixed interval.
pub struct ConfigSource {
    fetcher: Arc<dyn ConfigFetcher>,
    interval: Duration,
}

impl ConfigSource {
    pub fn new(fetcher: Arc<dyn ConfigFetcher>, interval: Duration) -> Self {
        Self { fetcher, interval }
    }

    /// Perform the first fetch and start the background watch.
    ///
    /// The first fetch blocks the caller; its failure is returned, not retried.
    pub async fn start(
        self,
        shutdown: Shutdown,
    ) -> Result<(RawConfigSnapshot, ConfigUpdates), FetchError> {
        let first = tokio::select! {
            fetched = self.fetcher.fetch() => fetched?,
            _ = shutdown.cancelled() => return Err(FetchError::Cancelled),
        };

        tracing::info!(
            version = %first.short_version(),
            bytes = first.len(),
            "Initial configuration fetched"
        );

        let (tx, rx) = watch::channel(first.clone());
        tokio::spawn(self.watch_loop(tx, shutdown));

        Ok((first, ConfigUpdates { rx }))
    }

    async fn watch_loop(self, tx: watch::Sender<RawConfigSnapshot>, shutdown: Shutdown) {
        let poke = Arc::new(Notify::new());
        // Dropping the watcher stops file notifications.
        let _watcher = self.fetcher.local_path().and_then(|path| {
            match ConfigWatcher::new(&path, poke.clone()).run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(error = %e, "File watch unavailable, relying on interval checks");
                    None
                }
            }
        });

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = tx.borrow().clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = poke.notified() => {}
                _ = shutdown.cancelled() => {
                    tracing::debug!("Config watch received shutdown signal, exiting loop");
                    break;
                }
            }

            match self.fetcher.fetch().await {
                Ok(snapshot) if snapshot == last => {
                    tracing::debug!(version = %snapshot.short_version(), "Configuration unchanged");
                }
                Ok(snapshot) => {
                    tracing::info!(
                        previous = %last.short_version(),
                        version = %snapshot.short_version(),
                        "Configuration changed"
                    );
                    last = snapshot.clone();
                    tx.send_replace(snapshot);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Configuration fetch failed, retrying next interval");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::lifecycle::ShutdownReason;

    /// Replays a script of results, repeating the last one.
    struct Scripted {
        script: Mutex<VecDeque<Result<&'static str, ()>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(script: Vec<Result<&'static str, ()>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ConfigFetcher for Scripted {
        async fn fetch(&self) -> Result<RawConfigSnapshot, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                *script.front().unwrap()
            };
            next.map(RawConfigSnapshot::new).map_err(|_| FetchError::Io {
                path: PathBuf::from("scripted"),
                source: std::io::Error::other("scripted failure"),
            })
        }
    }

    #[tokio::test]
    async fn test_first_fetch_failure_is_returned() {
        let fetcher = Scripted::new(vec![Err(())]);
        let source = ConfigSource::new(fetcher, Duration::from_millis(10));
        assert!(source.start(Shutdown::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_identical_fetches_publish_nothing() {
        let fetcher = Scripted::new(vec![Ok("a"), Ok("a"), Ok("a")]);
        let shutdown = Shutdown::new();
        let source = ConfigSource::new(fetcher.clone(), Duration::from_millis(10));
        let (first, mut updates) = source.start(shutdown.clone()).await.unwrap();
        assert_eq!(first.bytes(), b"a");

        let next = time::timeout(Duration::from_millis(150), updates.next(&shutdown)).await;
        assert!(next.is_err(), "unchanged content must not be published");
        assert!(fetcher.calls.load(Ordering::SeqCst) > 2);
        shutdown.trigger(ShutdownReason::TestTimeout);
    }

    #[tokio::test]
    async fn test_fetch_errors_keep_watching() {
        let fetcher = Scripted::new(vec![Ok("a"), Err(()), Err(()), Ok("b")]);
        let shutdown = Shutdown::new();
        let source = ConfigSource::new(fetcher, Duration::from_millis(10));
        let (_, mut updates) = source.start(shutdown.clone()).await.unwrap();

        let next = time::timeout(Duration::from_secs(2), updates.next(&shutdown))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.bytes(), b"b");
        shutdown.trigger(ShutdownReason::TestTimeout);
    }

    #[tokio::test]
    async fn test_pending_updates_collapse_to_latest() {
        let fetcher = Scripted::new(vec![Ok("a"), Ok("b"), Ok("c"), Ok("d")]);
        let shutdown = Shutdown::new();
        let source = ConfigSource::new(fetcher, Duration::from_millis(5));
        let (_, mut updates) = source.start(shutdown.clone()).await.unwrap();

        // Let every change land before consuming any of them.
        time::sleep(Duration::from_millis(200)).await;
        let next = updates.next(&shutdown).await.unwrap();
        assert_eq!(next.bytes(), b"d");
        shutdown.trigger(ShutdownReason::TestTimeout);
    }

    #[tokio::test]
    async fn test_next_returns_none_on_shutdown() {
        let fetcher = Scripted::new(vec![Ok("a")]);
        let shutdown = Shutdown::new();
        let source = ConfigSource::new(fetcher, Duration::from_secs(60));
        let (_, mut updates) = source.start(shutdown.clone()).await.unwrap();

        shutdown.trigger(ShutdownReason::TestTimeout);
        assert!(updates.next(&shutdown).await.is_none());
    }

    #[tokio::test]
    async fn test_local_fetcher_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clash.yaml");
        std::fs::write(&path, "mode: rule\n").unwrap();

        let snapshot = LocalFetcher::new(&path).fetch().await.unwrap();
        assert_eq!(snapshot.bytes(), b"mode: rule\n");
        assert!(LocalFetcher::new(dir.path().join("missing")).fetch().await.is_err());
    }

    #[test]
    fn test_remote_fetcher_rejects_bad_header() {
        let options = HttpFetchOptions {
            headers: vec![("bad header".into(), "x".into())],
            ..Default::default()
        };
        let url = Url::parse("http://127.0.0.1/clash.yaml").unwrap();
        assert!(matches!(
            RemoteFetcher::new(url, &options),
            Err(FetchError::InvalidHeader(_))
        ));
    }
}
