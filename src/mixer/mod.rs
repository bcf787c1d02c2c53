//! Volume mixer capability
//!
//! `VolumeSink` is what the router drives. Operations are synchronous and
//! short. On Windows the WASAPI backend binds to the OS mixer; elsewhere
//! the console backend logs what would be applied.

pub mod console;
pub mod sessions;
#[cfg(windows)]
pub mod wasapi;

use std::sync::Arc;

use crate::error::MixerError;

pub use console::ConsoleMixer;
pub use sessions::{RefreshReason, SessionCache};
#[cfg(windows)]
pub use wasapi::WasapiMixer;

/// Mixer backend for this platform
///
/// `dry_run` selects the console backend even where an OS binding exists.
pub fn platform_sink(dry_run: bool) -> Arc<dyn VolumeSink> {
    #[cfg(windows)]
    if !dry_run {
        return Arc::new(WasapiMixer::new());
    }
    #[cfg(not(windows))]
    if !dry_run {
        tracing::warn!("No OS mixer binding on this platform, volume changes are only logged");
    }
    Arc::new(ConsoleMixer::default())
}

/// One audio session as reported by the mixer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub pid: u32,
    pub name: String,
}

impl SessionRecord {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
        }
    }
}

/// Mixer operations, volumes in `[0, 1]`
pub trait VolumeSink: Send + Sync {
    /// Current audio sessions; position 0 is the system sounds session
    fn list_sessions(&self) -> Result<Vec<SessionRecord>, MixerError>;

    fn set_master_volume(&self, volume: f64) -> Result<(), MixerError>;

    /// Volume of the session at list position 0
    fn set_system_sounds_volume(&self, volume: f64) -> Result<(), MixerError>;

    fn set_session_volume(&self, pid: u32, volume: f64) -> Result<(), MixerError>;

    /// Names of the output (render) devices
    fn output_devices(&self) -> Result<Vec<String>, MixerError>;

    fn set_device_volume(&self, device: &str, volume: f64) -> Result<(), MixerError>;

    /// Name of the default capture device, if any
    fn default_capture_device(&self) -> Result<Option<String>, MixerError>;
}
