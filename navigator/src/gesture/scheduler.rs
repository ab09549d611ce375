//! Debounce and throttle for stabilized gesture transitions.
//!
//! Candidates are submitted as the smoother produces them and released by
//! `poll`, which the owner calls on every frame and timer tick.  A newer
//! candidate replaces a pending one and restarts the debounce window.  A
//! candidate whose window has elapsed is held back while the throttle
//! floor since the last release has not passed, and re-checked on the
//! next poll.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classifier::Gesture;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Quiet period a candidate must survive (milliseconds).
    pub debounce_ms: f64,
    /// Minimum spacing between released transitions (milliseconds).
    pub throttle_ms: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 150.0,
            throttle_ms: 1000.0 / 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pending {
    gesture: Gesture,
    due_ms: f64,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateScheduler {
    pub config: SchedulerConfig,
    pending: Option<Pending>,
    last_emit_ms: Option<f64>,
}

impl UpdateScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            pending: None,
            last_emit_ms: None,
        }
    }

    /// Queue a candidate, cancelling any pending one.
    pub fn submit(&mut self, gesture: Gesture, now_ms: f64) {
        if let Some(old) = self.pending {
            if old.gesture != gesture {
                debug!(
                    "Debounce: {} superseded by {}",
                    old.gesture.as_str(),
                    gesture.as_str()
                );
            }
        }
        self.pending = Some(Pending {
            gesture,
            due_ms: now_ms + self.config.debounce_ms,
        });
    }

    /// Release the pending candidate if its debounce window has elapsed
    /// and the throttle floor allows it.
    pub fn poll(&mut self, now_ms: f64) -> Option<Gesture> {
        let pending = self.pending?;
        if now_ms < pending.due_ms {
            return None;
        }
        if let Some(last) = self.last_emit_ms {
            if now_ms - last < self.config.throttle_ms {
                debug!(
                    "Throttle: deferring {} ({:.0}ms since last)",
                    pending.gesture.as_str(),
                    now_ms - last
                );
                return None;
            }
        }
        self.pending = None;
        self.last_emit_ms = Some(now_ms);
        Some(pending.gesture)
    }

    /// Earliest time a poll could release something.
    pub fn next_deadline(&self) -> Option<f64> {
        let pending = self.pending?;
        let throttle_at = self
            .last_emit_ms
            .map_or(pending.due_ms, |last| last + self.config.throttle_ms);
        Some(pending.due_ms.max(throttle_at))
    }

    pub fn pending(&self) -> Option<Gesture> {
        self.pending.map(|p| p.gesture)
    }

    /// Drop any pending candidate and forget the throttle clock.
    pub fn reset(&mut self) {
        self.pending = None;
        self.last_emit_ms = None;
    }
}
