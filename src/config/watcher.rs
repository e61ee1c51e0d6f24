//! Config file watcher with debounced reloads.
//!
//! The watcher subscribes to the directory containing the config file, not
//! the file itself: editors that save via create-temp-then-rename would
//! otherwise silently detach a file-level watch. Events for the config
//! basename are debounced for 500 ms and coalesced into a single reload;
//! the callback fires only when the reloaded document is valid.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::{Error, Result};

use super::store::ConfigStore;
use super::Config;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches the config directory and invokes a callback with each valid
/// reloaded config.
pub struct ConfigWatcher {
    // Held for its Drop impl; dropping unregisters the OS watch.
    _watcher: RecommendedWatcher,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Start watching. The callback runs on the watcher task; long work
    /// should be spawned off it.
    pub fn spawn<F>(store: Arc<ConfigStore>, callback: F) -> Result<Self>
    where
        F: Fn(Config) + Send + Sync + 'static,
    {
        let config_file = store.paths().config_file();
        let basename = config_file
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| Error::config("config path has no file name"))?;

        let (tx, rx) = mpsc::channel::<()>(16);

        // The notify callback runs on the OS watcher thread; it only
        // filters events and nudges the async debounce loop.
        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        let relevant = event.kind.is_modify() || event.kind.is_create();
                        let matches_config = event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(basename.as_os_str()));
                        if relevant && matches_config {
                            let _ = tx.blocking_send(());
                        }
                    }
                    Err(e) => error!(error = %e, "config watcher error"),
                }
            })
            .map_err(|e| Error::config(format!("creating config watcher: {}", e)))?;

        watcher
            .watch(store.paths().config_dir(), RecursiveMode::NonRecursive)
            .map_err(|e| Error::config(format!("watching config directory: {}", e)))?;

        let token = CancellationToken::new();
        let task = tokio::spawn(debounce_loop(store, rx, callback, token.clone()));

        Ok(Self { _watcher: watcher, token, task })
    }

    /// Stop the watcher and wait for the debounce loop to exit.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

async fn debounce_loop<F>(
    store: Arc<ConfigStore>,
    mut rx: mpsc::Receiver<()>,
    callback: F,
    token: CancellationToken,
) where
    F: Fn(Config) + Send + Sync + 'static,
{
    let mut deadline: Option<Instant> = None;

    loop {
        let next = deadline.unwrap_or_else(Instant::now);
        tokio::select! {
            _ = token.cancelled() => return,
            event = rx.recv() => match event {
                Some(()) => deadline = Some(Instant::now() + DEBOUNCE),
                None => return,
            },
            _ = sleep_until(next), if deadline.is_some() => {
                deadline = None;
                match store.load() {
                    Ok(cfg) => {
                        info!("config reloaded");
                        callback(cfg);
                    }
                    Err(Error::Validation(errs)) => {
                        warn!(count = errs.len(), "config reload skipped due to validation errors");
                        for msg in errs.messages() {
                            warn!("  - {}", msg);
                        }
                    }
                    Err(e) => warn!(error = %e, "config reload skipped"),
                }
            }
        }
    }
}
