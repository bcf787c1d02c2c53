//! Configuration file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{preferences_path, AppConfig};

/// Quiet period before a burst of file events turns into one reload
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

/// Config watcher that monitors file changes and sends reload notifications
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Create a new config watcher for the specified file
    ///
    /// Fails when the canonical config is missing or invalid.
    pub async fn new(config_path: impl Into<PathBuf>) -> Result<(Self, AppConfig)> {
        let config_path = config_path.into();
        let (tx, rx) = mpsc::channel(10);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel::<()>();

        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        // notify callbacks run on their own OS thread; only forward a wake-up
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        debug!("Config file changed: {:?}", event.paths);
                        let _ = notify_tx.send(());
                    }
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        watcher
            .watch(&config_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path.display()))?;

        let preferences = preferences_path(&config_path);
        if preferences.exists() {
            watcher
                .watch(&preferences, RecursiveMode::NonRecursive)
                .with_context(|| {
                    format!("Failed to watch preferences file: {}", preferences.display())
                })?;
        }

        tokio::spawn(reload_loop(config_path.clone(), notify_rx, tx));

        info!("Config file watcher started for: {}", config_path.display());

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            initial_config,
        ))
    }

    /// Separate the update channel from the watch guard
    ///
    /// Updates stop once the returned guard is dropped.
    pub fn split(self) -> (RecommendedWatcher, mpsc::Receiver<AppConfig>) {
        (self._watcher, self.rx)
    }
}

/// Coalesce change notifications and reload once the files settle
async fn reload_loop(
    config_path: PathBuf,
    mut notify_rx: mpsc::UnboundedReceiver<()>,
    tx: mpsc::Sender<AppConfig>,
) {
    while notify_rx.recv().await.is_some() {
        if !settle(&mut notify_rx, RELOAD_DEBOUNCE).await {
            return;
        }

        match AppConfig::load(&config_path).await {
            Ok(new_config) => {
                info!("Configuration reloaded successfully");
                if tx.send(new_config).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("Failed to reload config (keeping old config): {}", e);
            }
        }
    }
}

/// Wait until no notification arrived for `quiet`; false if the sender closed
async fn settle(notify_rx: &mut mpsc::UnboundedReceiver<()>, quiet: Duration) -> bool {
    loop {
        match tokio::time::timeout(quiet, notify_rx.recv()).await {
            Ok(Some(())) => continue,
            Ok(None) => return false,
            Err(_) => return true,
        }
    }
}
