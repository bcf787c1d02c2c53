//! Volume router - slider events to mixer operations
//!
//! For every `SliderChangeEvent` the router first decides whether the
//! session cache needs a refresh, then applies the volume to each mapped
//! target:
//! - reserved names (`master`, `system`, `mic` by default) go to the
//!   matching system control and are never looked up as sessions
//! - a name matching an output device sets that device
//! - anything else is matched case-insensitively against cached sessions

use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::{AppConfig, SliderMapping};
use crate::mixer::{RefreshReason, SessionCache, VolumeSink};
use crate::signal::SliderChangeEvent;

const MASTER: &str = "master";
const SYSTEM: &str = "system";
const MIC: &str = "mic";

pub struct VolumeRouter {
    sink: Arc<dyn VolumeSink>,
    sessions: SessionCache,
    mapping: SliderMapping,
    /// Lowercased reserved target names
    reserved: Vec<String>,
}

impl VolumeRouter {
    pub fn new(sink: Arc<dyn VolumeSink>, mapping: SliderMapping, reserved: &[String]) -> Self {
        let sessions = SessionCache::new(Arc::clone(&sink));
        Self {
            sink,
            sessions,
            mapping,
            reserved: normalize_reserved(reserved),
        }
    }

    pub fn from_config(sink: Arc<dyn VolumeSink>, config: &AppConfig) -> Self {
        Self::new(sink, config.mapping(), &config.reserved_targets)
    }

    /// Swap in a new mapping generation
    pub fn update_config(&mut self, config: &AppConfig) {
        self.mapping = config.mapping();
        self.reserved = normalize_reserved(&config.reserved_targets);
        debug!(
            "Router now maps {} channels ({} reserved targets)",
            self.mapping.len(),
            self.reserved.len()
        );
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    pub fn refresh_sessions(&mut self, reason: RefreshReason) {
        self.sessions.refresh(reason);
    }

    fn is_reserved(&self, name: &str) -> bool {
        self.reserved.iter().any(|r| r.eq_ignore_ascii_case(name))
    }

    /// Route one slider event
    pub fn handle(&mut self, event: SliderChangeEvent) {
        let targets = self.mapping.targets(event.channel).to_vec();
        self.check_refresh(&targets);

        if targets.is_empty() {
            trace!("Channel {} is not mapped", event.channel);
            return;
        }

        for target in &targets {
            self.apply(target, event.value);
        }
    }

    fn check_refresh(&mut self, targets: &[String]) {
        if self.sessions.is_stale() {
            self.sessions.refresh(RefreshReason::StaledOut);
            return;
        }

        let missing = targets
            .iter()
            .filter(|t| !self.is_reserved(t))
            .find(|t| !self.sessions.contains(t));

        if let Some(name) = missing {
            if self.sessions.is_fresh() {
                trace!("'{}' not in session list, cache still fresh", name);
            } else {
                self.sessions.refresh(RefreshReason::TargetNotFound);
            }
        }
    }

    fn apply(&self, target: &str, volume: f64) {
        let result = if self.is_reserved(target) {
            self.apply_reserved(target, volume)
        } else if let Some(device) = self.find_output_device(target) {
            self.sink.set_device_volume(&device, volume)
        } else if let Some(session) = self.sessions.find(target) {
            self.sink.set_session_volume(session.pid, volume)
        } else {
            trace!("No session matches '{}'", target);
            Ok(())
        };

        if let Err(e) = result {
            warn!("Failed to set volume for '{}': {}", target, e);
        }
    }

    fn apply_reserved(&self, target: &str, volume: f64) -> Result<(), crate::error::MixerError> {
        match target.to_ascii_lowercase().as_str() {
            MASTER => self.sink.set_master_volume(volume),
            SYSTEM => self.sink.set_system_sounds_volume(volume),
            MIC => match self.sink.default_capture_device()? {
                Some(device) => self.sink.set_device_volume(&device, volume),
                None => {
                    debug!("No default capture device");
                    Ok(())
                }
            },
            other => {
                debug!("Reserved target '{}' has no system control", other);
                Ok(())
            }
        }
    }

    fn find_output_device(&self, name: &str) -> Option<String> {
        match self.sink.output_devices() {
            Ok(devices) => devices.into_iter().find(|d| d.eq_ignore_ascii_case(name)),
            Err(e) => {
                debug!("Output device query failed: {}", e);
                None
            }
        }
    }
}

fn normalize_reserved(reserved: &[String]) -> Vec<String> {
    reserved.iter().map(|r| r.trim().to_ascii_lowercase()).collect()
}
