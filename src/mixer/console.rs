//! Console mixer - logs every volume operation
//!
//! Stands in for an OS mixer binding when testing mappings without one.
//! It reports a fixed set of sessions and devices and records the last
//! volume applied to each target.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{SessionRecord, VolumeSink};
use crate::error::MixerError;

/// Name reported for the session at list position 0
pub const SYSTEM_SESSION: &str = "system";

pub struct ConsoleMixer {
    sessions: Vec<SessionRecord>,
    output_devices: Vec<String>,
    capture_device: Option<String>,
    state: Mutex<ConsoleState>,
}

#[derive(Debug, Default)]
struct ConsoleState {
    /// Operation counter for debugging
    operations: u64,
    volumes: BTreeMap<String, f64>,
}

impl Default for ConsoleMixer {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ConsoleMixer {
    /// Mixer reporting the system session followed by `sessions`
    pub fn new(sessions: Vec<SessionRecord>) -> Self {
        let mut all = vec![SessionRecord::new(0, SYSTEM_SESSION)];
        all.extend(sessions);
        Self {
            sessions: all,
            output_devices: vec!["Speakers".to_string()],
            capture_device: Some("Microphone".to_string()),
            state: Mutex::new(ConsoleState::default()),
        }
    }

    /// Last volume applied to a target key (`master`, `session:<pid>`, `device:<name>`)
    pub fn volume_of(&self, key: &str) -> Option<f64> {
        self.state.lock().volumes.get(key).copied()
    }

    pub fn operation_count(&self) -> u64 {
        self.state.lock().operations
    }

    fn record(&self, key: String, volume: f64) {
        let mut state = self.state.lock();
        state.operations += 1;
        let op = state.operations;
        info!(
            "🎚️  [{}] {} → {:.2} [op #{}]",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            key,
            volume,
            op
        );
        debug!(target_key = %key, volume, op, "ConsoleMixer set volume");
        state.volumes.insert(key, volume);
    }
}

impl VolumeSink for ConsoleMixer {
    fn list_sessions(&self) -> Result<Vec<SessionRecord>, MixerError> {
        Ok(self.sessions.clone())
    }

    fn set_master_volume(&self, volume: f64) -> Result<(), MixerError> {
        self.record("master".to_string(), volume);
        Ok(())
    }

    fn set_system_sounds_volume(&self, volume: f64) -> Result<(), MixerError> {
        let pid = self
            .sessions
            .first()
            .map(|s| s.pid)
            .ok_or_else(|| MixerError::Operation("no system session".into()))?;
        self.record(format!("session:{}", pid), volume);
        Ok(())
    }

    fn set_session_volume(&self, pid: u32, volume: f64) -> Result<(), MixerError> {
        if !self.sessions.iter().any(|s| s.pid == pid) {
            return Err(MixerError::Operation(format!("no session with pid {}", pid)));
        }
        self.record(format!("session:{}", pid), volume);
        Ok(())
    }

    fn output_devices(&self) -> Result<Vec<String>, MixerError> {
        Ok(self.output_devices.clone())
    }

    fn set_device_volume(&self, device: &str, volume: f64) -> Result<(), MixerError> {
        self.record(format!("device:{}", device), volume);
        Ok(())
    }

    fn default_capture_device(&self) -> Result<Option<String>, MixerError> {
        Ok(self.capture_device.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_session_is_first() {
        let mixer = ConsoleMixer::new(vec![SessionRecord::new(42, "chrome.exe")]);
        let sessions = mixer.list_sessions().unwrap();
        assert_eq!(sessions[0].name, SYSTEM_SESSION);
        assert_eq!(sessions[1].pid, 42);
    }

    #[test]
    fn test_records_volumes() {
        let mixer = ConsoleMixer::new(vec![SessionRecord::new(42, "chrome.exe")]);
        mixer.set_master_volume(0.5).unwrap();
        mixer.set_session_volume(42, 0.25).unwrap();
        mixer.set_system_sounds_volume(0.75).unwrap();
        mixer.set_device_volume("Speakers", 1.0).unwrap();

        assert_eq!(mixer.volume_of("master"), Some(0.5));
        assert_eq!(mixer.volume_of("session:42"), Some(0.25));
        assert_eq!(mixer.volume_of("session:0"), Some(0.75));
        assert_eq!(mixer.volume_of("device:Speakers"), Some(1.0));
        assert_eq!(mixer.operation_count(), 4);
    }

    #[test]
    fn test_unknown_pid_is_an_error() {
        let mixer = ConsoleMixer::default();
        assert!(mixer.set_session_volume(9, 0.1).is_err());
        assert_eq!(mixer.operation_count(), 0);
    }

    #[test]
    fn test_reports_default_devices() {
        let mixer = ConsoleMixer::default();
        assert_eq!(mixer.output_devices().unwrap(), vec!["Speakers".to_string()]);
        assert_eq!(
            mixer.default_capture_device().unwrap(),
            Some("Microphone".to_string())
        );
    }
}
