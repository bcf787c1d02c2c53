//! Application path management for portable and installed modes.
//!
//! ## Mode Detection
//!
//! - **Working directory**: a `config.yaml` in the current directory wins.
//! - **Portable mode**: if a `.portable` marker file exists next to the
//!   executable, config and logs live in the same directory.
//! - **Installed mode** (default): data is stored in the per-user data
//!   directory (`%APPDATA%\deej-gw`, `~/.local/share/deej-gw`, ...).

use std::path::{Path, PathBuf};
use tracing::debug;

/// Application name used for directories in installed mode
const APP_NAME: &str = "deej-gw";

/// Canonical config file name
pub const CONFIG_FILE: &str = "config.yaml";

/// Application paths for config and logs.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the canonical configuration file
    pub config: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Whether running in portable mode (config next to exe)
    pub is_portable: bool,
}

impl AppPaths {
    /// Use an explicit config path; logs go next to it
    pub fn from_config(config: impl Into<PathBuf>) -> Self {
        let config = config.into();
        let logs_dir = base_dir_of(&config).join("logs");
        Self {
            config,
            logs_dir,
            is_portable: true,
        }
    }

    /// Detect the appropriate paths based on environment.
    ///
    /// Called before logging is initialized, so diagnostics use eprintln.
    pub fn detect() -> Self {
        let cwd_config = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(CONFIG_FILE);
        if cwd_config.exists() {
            return Self::from_config(cwd_config);
        }

        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        if exe_dir.join(".portable").exists() {
            return Self::from_config(exe_dir.join(CONFIG_FILE));
        }

        let app_data = dirs::data_dir()
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: no per-user data dir, falling back to exe dir");
                exe_dir.clone()
            })
            .join(APP_NAME);

        Self {
            config: app_data.join(CONFIG_FILE),
            logs_dir: app_data.join("logs"),
            is_portable: false,
        }
    }

    /// Override the logs directory
    pub fn with_logs_dir(mut self, logs_dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = logs_dir.into();
        self
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        base_dir_of(&self.config)
    }

    /// Ensure the logs directory exists
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir)?;
        }
        Ok(())
    }
}

fn base_dir_of(config: &Path) -> PathBuf {
    match config.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
