//! Filesystem notifications for a local configuration file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;

/// Wakes the fetch loop when the configuration file changes on disk.
///
/// The parent directory is watched so editors that replace the file by
/// rename are still noticed. Content comparison happens in the fetch loop.
pub struct ConfigWatcher {
    path: PathBuf,
    poke: Arc<Notify>,
}

impl ConfigWatcher {
    pub fn new(path: &Path, poke: Arc<Notify>) -> Self {
        Self {
            path: path.to_path_buf(),
            poke,
        }
    }

    /// Start watching. Notifications stop when the returned watcher is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let poke = self.poke.clone();
        let target = self.path.clone();
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let touches_target = event.paths.iter().any(|p| p.file_name() == target.file_name());
                    if touches_target
                        && (event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove())
                    {
                        tracing::debug!(path = ?target, kind = ?event.kind, "Config file event");
                        poke.notify_one();
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
