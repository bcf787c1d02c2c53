//! Cached view of the mixer's session list
//!
//! Two clocks run from the last refresh: the cache is *fresh* for
//! `MIN_REFRESH_TIME` and becomes *stale* after `MAX_REFRESH_TIME`. The
//! router uses them to decide when a re-query is worth it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{SessionRecord, VolumeSink};

/// Refreshes are skipped for missing targets while younger than this
pub const MIN_REFRESH_TIME: Duration = Duration::from_secs(5);

/// Cache older than this is refreshed on the next event
pub const MAX_REFRESH_TIME: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Startup,
    StaledOut,
    TargetNotFound,
    Manual,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Startup => "startup",
            Self::StaledOut => "staled out",
            Self::TargetNotFound => "target session not found",
            Self::Manual => "manual",
        };
        f.write_str(text)
    }
}

pub struct SessionCache {
    sink: Arc<dyn VolumeSink>,
    sessions: Vec<SessionRecord>,
    /// `None` until a query has succeeded; counts as stale
    refreshed_at: Option<Instant>,
}

impl SessionCache {
    /// Build the cache from an initial query
    ///
    /// If that query fails the cache starts empty and stale.
    pub fn new(sink: Arc<dyn VolumeSink>) -> Self {
        let mut cache = Self {
            sink,
            sessions: Vec::new(),
            refreshed_at: None,
        };
        match cache.sink.list_sessions() {
            Ok(sessions) => {
                debug!("Initial session list has {} entries", sessions.len());
                cache.sessions = sessions;
                cache.refreshed_at = Some(Instant::now());
            }
            Err(e) => warn!("Initial session query failed, starting stale: {}", e),
        }
        cache
    }

    pub fn sessions(&self) -> &[SessionRecord] {
        &self.sessions
    }

    pub fn is_fresh(&self) -> bool {
        self.refreshed_at
            .is_some_and(|at| at.elapsed() < MIN_REFRESH_TIME)
    }

    pub fn is_stale(&self) -> bool {
        self.refreshed_at
            .map_or(true, |at| at.elapsed() >= MAX_REFRESH_TIME)
    }

    /// Whether a session with this name is cached (case-insensitive)
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn find(&self, name: &str) -> Option<&SessionRecord> {
        self.sessions
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Re-query the mixer and restart both clocks
    ///
    /// A failed query keeps the previous list but still restarts the clocks,
    /// so a broken backend is not hammered on every event.
    pub fn refresh(&mut self, reason: RefreshReason) {
        info!("Refreshing sessions ({})", reason);
        match self.sink.list_sessions() {
            Ok(sessions) => {
                debug!("Session list now has {} entries", sessions.len());
                self.sessions = sessions;
            }
            Err(e) => warn!("Session refresh failed: {}", e),
        }
        self.refreshed_at = Some(Instant::now());
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCache")
            .field("sessions", &self.sessions)
            .field("refreshed_at", &self.refreshed_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MixerError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct ListingSink {
        sessions: Mutex<Vec<SessionRecord>>,
        fail: Mutex<bool>,
        queries: Mutex<usize>,
    }

    impl VolumeSink for ListingSink {
        fn list_sessions(&self) -> Result<Vec<SessionRecord>, MixerError> {
            *self.queries.lock() += 1;
            if *self.fail.lock() {
                return Err(MixerError::Unavailable("offline".into()));
            }
            Ok(self.sessions.lock().clone())
        }
        fn set_master_volume(&self, _: f64) -> Result<(), MixerError> {
            Ok(())
        }
        fn set_system_sounds_volume(&self, _: f64) -> Result<(), MixerError> {
            Ok(())
        }
        fn set_session_volume(&self, _: u32, _: f64) -> Result<(), MixerError> {
            Ok(())
        }
        fn output_devices(&self) -> Result<Vec<String>, MixerError> {
            Ok(Vec::new())
        }
        fn set_device_volume(&self, _: &str, _: f64) -> Result<(), MixerError> {
            Ok(())
        }
        fn default_capture_device(&self) -> Result<Option<String>, MixerError> {
            Ok(None)
        }
    }

    fn sink_with(names: &[&str]) -> Arc<ListingSink> {
        let sink = ListingSink::default();
        *sink.sessions.lock() = names
            .iter()
            .enumerate()
            .map(|(i, n)| SessionRecord::new(i as u32 + 100, *n))
            .collect();
        Arc::new(sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_and_staleness_timing() {
        let cache = SessionCache::new(sink_with(&["chrome.exe"]));
        assert!(cache.is_fresh());
        assert!(!cache.is_stale());

        tokio::time::sleep(Duration::from_millis(4_999)).await;
        assert!(cache.is_fresh());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!cache.is_fresh());
        assert!(!cache.is_stale());

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(cache.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_resets_both_clocks() {
        let sink = sink_with(&["chrome.exe"]);
        let mut cache = SessionCache::new(sink.clone());
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert!(cache.is_stale());

        sink.sessions.lock().push(SessionRecord::new(7, "Spotify.exe"));
        cache.refresh(RefreshReason::StaledOut);

        assert!(cache.is_fresh());
        assert!(!cache.is_stale());
        assert!(cache.contains("spotify.exe"));
        assert_eq!(*sink.queries.lock(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initial_query_starts_stale() {
        let sink = sink_with(&[]);
        *sink.fail.lock() = true;
        let cache = SessionCache::new(sink);
        assert!(cache.is_stale());
        assert!(!cache.is_fresh());
        assert!(cache.sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_list() {
        let sink = sink_with(&["discord.exe"]);
        let mut cache = SessionCache::new(sink.clone());
        tokio::time::sleep(Duration::from_secs(46)).await;

        *sink.fail.lock() = true;
        cache.refresh(RefreshReason::Manual);
        assert!(cache.contains("Discord.exe"));
        assert!(!cache.is_stale());
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(RefreshReason::StaledOut.to_string(), "staled out");
        assert_eq!(
            RefreshReason::TargetNotFound.to_string(),
            "target session not found"
        );
    }
}
