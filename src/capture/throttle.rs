//! Drop-if-busy sampling gate
//!
//! Used by the capture loop to decide when to sample a frame and by the
//! bridge to decide when to dispatch one. Frames that fail the gate are
//! dropped, never queued.

use std::time::{Duration, Instant};

/// Outcome of asking the gate for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// A slot was granted (or would be)
    Open,
    /// A previous sample is still being processed
    Busy,
    /// The minimum interval since the last sample has not elapsed
    Throttled,
}

/// Minimum-interval plus busy-flag gate
#[derive(Debug, Clone)]
pub struct SampleGate {
    interval: Duration,
    last_sample: Option<Instant>,
    busy: bool,
}

impl SampleGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sample: None,
            busy: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Check without taking a slot
    pub fn check(&self, now: Instant) -> GateDecision {
        if self.busy {
            return GateDecision::Busy;
        }
        match self.last_sample {
            Some(last) if now.saturating_duration_since(last) < self.interval => {
                GateDecision::Throttled
            }
            _ => GateDecision::Open,
        }
    }

    /// Take a slot if one is available: marks busy and restarts the interval
    pub fn try_begin(&mut self, now: Instant) -> GateDecision {
        let decision = self.check(now);
        if decision == GateDecision::Open {
            self.busy = true;
            self.last_sample = Some(now);
        }
        decision
    }

    /// Clear the busy flag, whether the sample succeeded or failed
    pub fn finish(&mut self) {
        self.busy = false;
    }

    /// Forget the busy flag and the last-sample clock
    pub fn reset(&mut self) {
        self.busy = false;
        self.last_sample = None;
    }
}
