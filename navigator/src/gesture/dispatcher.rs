//! Cooldown-gated action dispatch shared by gesture and keyboard input.
//!
//! One dispatcher owns the last-action clock, so a key press and a
//! gesture cannot both fire inside the same cooldown window.  Rules are
//! checked in order: animation lock, cooldown, repeat prevention.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::classifier::Gesture;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Minimum spacing between any two dispatched actions (milliseconds).
    pub cooldown_ms: f64,
    /// Window in which the same action is suppressed (milliseconds).
    pub repeat_window_ms: f64,
    /// Entries kept in the action log.
    pub log_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 1000.0,
            repeat_window_ms: 300.0,
            log_capacity: 5,
        }
    }
}

/// Where a navigation command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSource {
    Gesture,
    Keyboard,
}

impl ActionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gesture => "gesture",
            Self::Keyboard => "keyboard",
        }
    }
}

/// Why a dispatch was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    FlipAnimation,
    Cooldown,
    RepeatPrevention,
}

impl RefusalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlipAnimation => "flip_animation",
            Self::Cooldown => "cooldown",
            Self::RepeatPrevention => "repeat_prevention",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub dispatched: bool,
    pub reason: Option<RefusalReason>,
}

impl DispatchOutcome {
    fn accepted() -> Self {
        Self {
            dispatched: true,
            reason: None,
        }
    }

    fn refused(reason: RefusalReason) -> Self {
        Self {
            dispatched: false,
            reason: Some(reason),
        }
    }
}

/// One accepted action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionRecord {
    pub action: Gesture,
    pub timestamp_ms: f64,
    pub source: ActionSource,
}

impl ActionRecord {
    pub fn to_sexp(&self) -> String {
        format!(
            "(:action :{} :timestamp {:.0} :source :{})",
            self.action.as_str(),
            self.timestamp_ms,
            self.source.as_str()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionDispatcher {
    pub config: DispatcherConfig,
    last_action_ms: Option<f64>,
    last_action: Option<Gesture>,
    log: VecDeque<ActionRecord>,
}

impl ActionDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            log: VecDeque::with_capacity(config.log_capacity),
            config,
            last_action_ms: None,
            last_action: None,
        }
    }

    /// Attempt to dispatch `action`.  Accepted actions update the clock and
    /// the log; refusals change nothing.
    pub fn dispatch(
        &mut self,
        action: Gesture,
        source: ActionSource,
        animation_locked: bool,
        now_ms: f64,
    ) -> DispatchOutcome {
        if animation_locked {
            debug!("Refused {} from {}: flip animation", action.as_str(), source.as_str());
            return DispatchOutcome::refused(RefusalReason::FlipAnimation);
        }

        if let Some(last_ms) = self.last_action_ms {
            let elapsed = now_ms - last_ms;
            if elapsed < self.config.cooldown_ms {
                debug!(
                    "Refused {} from {}: cooldown ({:.0}ms elapsed)",
                    action.as_str(),
                    source.as_str(),
                    elapsed
                );
                return DispatchOutcome::refused(RefusalReason::Cooldown);
            }
            if action.is_action()
                && self.last_action == Some(action)
                && elapsed < self.config.repeat_window_ms
            {
                debug!("Refused {} from {}: repeat", action.as_str(), source.as_str());
                return DispatchOutcome::refused(RefusalReason::RepeatPrevention);
            }
        }

        self.last_action_ms = Some(now_ms);
        self.last_action = Some(action);
        self.log.push_back(ActionRecord {
            action,
            timestamp_ms: now_ms,
            source,
        });
        while self.log.len() > self.config.log_capacity {
            self.log.pop_front();
        }
        info!("Dispatched {} from {}", action.as_str(), source.as_str());
        DispatchOutcome::accepted()
    }

    /// Milliseconds until the cooldown allows another action.
    pub fn cooldown_remaining(&self, now_ms: f64) -> f64 {
        self.last_action_ms
            .map_or(0.0, |last| (self.config.cooldown_ms - (now_ms - last)).max(0.0))
    }

    /// Accepted actions, oldest first.
    pub fn recent_log(&self) -> impl Iterator<Item = &ActionRecord> {
        self.log.iter()
    }

    pub fn last_action(&self) -> Option<Gesture> {
        self.last_action
    }

    /// Clear the clock, last action and log together.
    pub fn reset(&mut self) {
        self.last_action_ms = None;
        self.last_action = None;
        self.log.clear();
    }

    /// Generate IPC debug s-expression.
    pub fn status_sexp(&self, now_ms: f64) -> String {
        let entries: Vec<String> = self.log.iter().map(ActionRecord::to_sexp).collect();
        format!(
            "(:last-action {} :cooldown-remaining-ms {:.0} :log ({}))",
            self.last_action
                .map_or("nil".to_string(), |a| format!(":{}", a.as_str())),
            self.cooldown_remaining(now_ms),
            entries.join(" "),
        )
    }

    /// Generate IPC config s-expression.
    pub fn config_sexp(&self) -> String {
        format!(
            "(:cooldown-ms {:.0} :repeat-window-ms {:.0} :log-capacity {})",
            self.config.cooldown_ms, self.config.repeat_window_ms, self.config.log_capacity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refused(reason: RefusalReason) -> DispatchOutcome {
        DispatchOutcome::refused(reason)
    }

    #[test]
    fn test_first_action_accepted() {
        let mut d = ActionDispatcher::default();
        let out = d.dispatch(Gesture::Next, ActionSource::Gesture, false, 5000.0);
        assert!(out.dispatched);
        assert_eq!(out.reason, None);
        assert_eq!(d.last_action(), Some(Gesture::Next));
    }

    #[test]
    fn test_cooldown_blocks_followups() {
        let mut d = ActionDispatcher::default();
        assert!(d.dispatch(Gesture::Next, ActionSource::Gesture, false, 0.0).dispatched);
        assert_eq!(
            d.dispatch(Gesture::Prev, ActionSource::Gesture, false, 400.0),
            refused(RefusalReason::Cooldown)
        );
        assert_eq!(
            d.dispatch(Gesture::Select, ActionSource::Gesture, false, 800.0),
            refused(RefusalReason::Cooldown)
        );
        assert!(d.dispatch(Gesture::Prev, ActionSource::Gesture, false, 1000.0).dispatched);
    }

    #[test]
    fn test_keyboard_shares_cooldown() {
        let mut d = ActionDispatcher::default();
        assert!(d.dispatch(Gesture::Next, ActionSource::Gesture, false, 0.0).dispatched);
        assert_eq!(
            d.dispatch(Gesture::Next, ActionSource::Keyboard, false, 10.0),
            refused(RefusalReason::Cooldown)
        );
    }

    #[test]
    fn test_animation_lock_always_refuses() {
        let mut d = ActionDispatcher::default();
        for t in [0.0, 5000.0, 10_000.0] {
            assert_eq!(
                d.dispatch(Gesture::Select, ActionSource::Keyboard, true, t),
                refused(RefusalReason::FlipAnimation)
            );
        }
        assert_eq!(d.recent_log().count(), 0);
        // Refusals leave the clock untouched.
        assert_eq!(d.cooldown_remaining(10_000.0), 0.0);
    }

    #[test]
    fn test_lock_checked_before_cooldown() {
        let mut d = ActionDispatcher::default();
        d.dispatch(Gesture::Next, ActionSource::Gesture, false, 0.0);
        assert_eq!(
            d.dispatch(Gesture::Next, ActionSource::Gesture, true, 100.0),
            refused(RefusalReason::FlipAnimation)
        );
    }

    #[test]
    fn test_repeat_prevention_with_short_cooldown() {
        let mut d = ActionDispatcher::new(DispatcherConfig {
            cooldown_ms: 100.0,
            ..DispatcherConfig::default()
        });
        assert!(d.dispatch(Gesture::Next, ActionSource::Gesture, false, 0.0).dispatched);
        assert_eq!(
            d.dispatch(Gesture::Next, ActionSource::Gesture, false, 200.0),
            refused(RefusalReason::RepeatPrevention)
        );
        assert!(d.dispatch(Gesture::Prev, ActionSource::Gesture, false, 200.0).dispatched);
        assert!(d.dispatch(Gesture::Prev, ActionSource::Gesture, false, 500.0).dispatched);
    }

    #[test]
    fn test_rest_exempt_from_repeat_prevention() {
        let mut d = ActionDispatcher::new(DispatcherConfig {
            cooldown_ms: 0.0,
            ..DispatcherConfig::default()
        });
        assert!(d.dispatch(Gesture::Rest, ActionSource::Gesture, false, 0.0).dispatched);
        assert!(d.dispatch(Gesture::Rest, ActionSource::Gesture, false, 50.0).dispatched);
    }

    #[test]
    fn test_log_bounded_to_five() {
        let mut d = ActionDispatcher::default();
        for i in 0..8 {
            d.dispatch(Gesture::Next, ActionSource::Keyboard, false, i as f64 * 2000.0);
        }
        let log: Vec<_> = d.recent_log().collect();
        assert_eq!(log.len(), 5);
        assert_eq!(log[0].timestamp_ms, 6000.0);
        assert_eq!(log[4].timestamp_ms, 14_000.0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut d = ActionDispatcher::default();
        d.dispatch(Gesture::Prev, ActionSource::Gesture, false, 0.0);
        d.reset();
        assert_eq!(d.last_action(), None);
        assert_eq!(d.recent_log().count(), 0);
        assert!(d.dispatch(Gesture::Prev, ActionSource::Gesture, false, 1.0).dispatched);
    }

    #[test]
    fn test_cooldown_remaining() {
        let mut d = ActionDispatcher::default();
        assert_eq!(d.cooldown_remaining(0.0), 0.0);
        d.dispatch(Gesture::Next, ActionSource::Gesture, false, 1000.0);
        assert_eq!(d.cooldown_remaining(1250.0), 750.0);
        assert_eq!(d.cooldown_remaining(3000.0), 0.0);
    }

    #[test]
    fn test_status_sexp_parses() {
        let mut d = ActionDispatcher::default();
        d.dispatch(Gesture::Select, ActionSource::Keyboard, false, 100.0);
        let s = d.status_sexp(600.0);
        assert!(s.contains(":last-action :select"), "{}", s);
        assert!(s.contains(":cooldown-remaining-ms 500"), "{}", s);
        assert!(s.contains(":source :keyboard"), "{}", s);
        assert!(lexpr::from_str(&s).is_ok(), "unparseable: {}", s);
    }
}
