//! Input rate limiting
//!
//! Lines arriving closer together than `MIN_SPACING` are coalesced; only the
//! newest line of a burst survives and is released once the spacing elapses.

use std::time::Duration;
use tokio::time::Instant;

use crate::serial::RawLine;

/// Minimum spacing between lines handed to the pipeline
pub const MIN_SPACING: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct LineThrottle {
    spacing: Duration,
    last_emit: Option<Instant>,
    pending: Option<RawLine>,
}

impl Default for LineThrottle {
    fn default() -> Self {
        Self::new(MIN_SPACING)
    }
}

impl LineThrottle {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last_emit: None,
            pending: None,
        }
    }

    /// Offer a line; returns it right away if the spacing allows
    ///
    /// Otherwise the line replaces any pending one and waits for
    /// `next_deadline()`.
    pub fn offer(&mut self, line: RawLine, now: Instant) -> Option<RawLine> {
        let ready = self.pending.is_none()
            && self
                .last_emit
                .map_or(true, |last| now.duration_since(last) >= self.spacing);

        if ready {
            self.last_emit = Some(now);
            Some(line)
        } else {
            self.pending = Some(line);
            None
        }
    }

    /// When the pending line becomes due
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        Some(match self.last_emit {
            Some(last) => last + self.spacing,
            None => Instant::now(),
        })
    }

    /// Release the pending line if its window has closed
    pub fn flush_due(&mut self, now: Instant) -> Option<RawLine> {
        let deadline = self.next_deadline()?;
        if now < deadline {
            return None;
        }
        self.last_emit = Some(now);
        self.pending.take()
    }

    /// Drop anything pending, e.g. after the link was replaced
    pub fn reset(&mut self) {
        self.pending = None;
        self.last_emit = None;
    }
}
