//! Per-frame glue: extract, classify, smooth, schedule, dispatch.
//!
//! The pipeline runs one frame to completion before returning.  Timers
//! that expired before a frame's timestamp fire before that frame is
//! classified, so a frame never overtakes an earlier deadline.

use tracing::{debug, info};

use super::calibration::CalibrationProfile;
use super::classifier::{classify_frame, Gesture, ThresholdProfile};
use super::dispatcher::{
    ActionDispatcher, ActionRecord, ActionSource, DispatcherConfig, RefusalReason,
};
use super::landmarks::LandmarkFrame;
use super::scheduler::{SchedulerConfig, UpdateScheduler};
use super::sensitivity::Sensitivity;
use super::smoothing::{GestureSmoother, SmoothingConfig};

/// Output of one pipeline step.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The stabilized gesture changed.
    GestureChanged { gesture: Gesture, timestamp_ms: f64 },
    /// A navigation action was dispatched.
    Action(ActionRecord),
    /// A navigation action was refused by the dispatcher.
    ActionRefused {
        action: Gesture,
        source: ActionSource,
        reason: RefusalReason,
        timestamp_ms: f64,
    },
}

impl PipelineEvent {
    /// Format as an IPC event s-expression.
    pub fn to_sexp(&self) -> String {
        match self {
            Self::GestureChanged {
                gesture,
                timestamp_ms,
            } => format!(
                "(:type :event :event :gesture :gesture :{} :timestamp {:.0})",
                gesture.as_str(),
                timestamp_ms
            ),
            Self::Action(record) => format!(
                "(:type :event :event :action :action :{} :source :{} :timestamp {:.0})",
                record.action.as_str(),
                record.source.as_str(),
                record.timestamp_ms
            ),
            Self::ActionRefused {
                action,
                source,
                reason,
                timestamp_ms,
            } => format!(
                "(:type :event :event :action-refused :action :{} :source :{} :reason :{} :timestamp {:.0})",
                action.as_str(),
                source.as_str(),
                reason.as_str(),
                timestamp_ms
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineConfig {
    pub thresholds: ThresholdProfile,
    pub smoothing: SmoothingConfig,
    pub scheduler: SchedulerConfig,
    pub dispatcher: DispatcherConfig,
}

/// Recognition-to-action pipeline for one session.
#[derive(Debug)]
pub struct GesturePipeline {
    base: ThresholdProfile,
    calibration: Option<CalibrationProfile>,
    sensitivity: Sensitivity,
    effective: ThresholdProfile,
    pub smoother: GestureSmoother,
    pub scheduler: UpdateScheduler,
    pub dispatcher: ActionDispatcher,
    animation_locked: bool,
    last_raw: Gesture,
    current: Gesture,
}

impl Default for GesturePipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl GesturePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let sensitivity = Sensitivity::default();
        Self {
            base: config.thresholds,
            calibration: None,
            sensitivity,
            effective: ThresholdProfile::effective(&config.thresholds, None, sensitivity),
            smoother: GestureSmoother::new(config.smoothing),
            scheduler: UpdateScheduler::new(config.scheduler),
            dispatcher: ActionDispatcher::new(config.dispatcher),
            animation_locked: false,
            last_raw: Gesture::Rest,
            current: Gesture::Rest,
        }
    }

    /// Process one estimator frame.
    pub fn on_frame(&mut self, frame: &LandmarkFrame, now_ms: f64) -> Vec<PipelineEvent> {
        let mut events = self.tick(now_ms);

        let raw = classify_frame(frame, &self.effective);
        if raw != self.last_raw {
            debug!("Raw gesture {} -> {}", self.last_raw.as_str(), raw.as_str());
            self.last_raw = raw;
        }
        if let Some(candidate) = self.smoother.push(raw) {
            self.scheduler.submit(candidate, now_ms);
        }

        // A zero debounce releases on the same frame.
        events.extend(self.tick(now_ms));
        events
    }

    /// Advance timers without a frame.
    pub fn tick(&mut self, now_ms: f64) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        let Some(gesture) = self.scheduler.poll(now_ms) else {
            return events;
        };
        if gesture == self.current {
            return events;
        }
        self.current = gesture;
        events.push(PipelineEvent::GestureChanged {
            gesture,
            timestamp_ms: now_ms,
        });
        if gesture.is_action() {
            events.push(self.dispatch(gesture, ActionSource::Gesture, now_ms));
        }
        events
    }

    /// Keyboard-origin command; shares the dispatcher with gestures.
    pub fn key(&mut self, action: Gesture, now_ms: f64) -> PipelineEvent {
        self.dispatch(action, ActionSource::Keyboard, now_ms)
    }

    fn dispatch(&mut self, action: Gesture, source: ActionSource, now_ms: f64) -> PipelineEvent {
        let outcome = self
            .dispatcher
            .dispatch(action, source, self.animation_locked, now_ms);
        match outcome.reason {
            None => PipelineEvent::Action(ActionRecord {
                action,
                timestamp_ms: now_ms,
                source,
            }),
            Some(reason) => PipelineEvent::ActionRefused {
                action,
                source,
                reason,
                timestamp_ms: now_ms,
            },
        }
    }

    /// Drop classification history and pending transitions, keeping the
    /// dispatcher clock.
    pub fn clear_tracking(&mut self) {
        self.smoother.reset();
        self.scheduler.reset();
        self.last_raw = Gesture::Rest;
        self.current = Gesture::Rest;
    }

    /// Lesson restart: clear history, pending transitions and dispatcher.
    pub fn reset(&mut self) {
        self.clear_tracking();
        self.dispatcher.reset();
        info!("Gesture pipeline reset");
    }

    pub fn set_sensitivity(&mut self, sensitivity: Sensitivity) {
        self.sensitivity = sensitivity;
        self.recompute();
    }

    pub fn set_calibration(&mut self, calibration: Option<CalibrationProfile>) {
        self.calibration = calibration;
        self.recompute();
    }

    pub fn set_animation_lock(&mut self, locked: bool) {
        self.animation_locked = locked;
    }

    fn recompute(&mut self) {
        self.effective =
            ThresholdProfile::effective(&self.base, self.calibration.as_ref(), self.sensitivity);
        debug!("Effective thresholds: {}", self.effective.to_sexp());
    }

    pub fn sensitivity(&self) -> Sensitivity {
        self.sensitivity
    }

    pub fn calibration(&self) -> Option<&CalibrationProfile> {
        self.calibration.as_ref()
    }

    pub fn effective_thresholds(&self) -> &ThresholdProfile {
        &self.effective
    }

    pub fn animation_locked(&self) -> bool {
        self.animation_locked
    }

    pub fn current_gesture(&self) -> Gesture {
        self.current
    }

    pub fn raw_gesture(&self) -> Gesture {
        self.last_raw
    }

    /// Generate IPC status s-expression.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:gesture :{} :raw :{} :pending {} :sensitivity {} :calibrated {} :animation-locked {} :thresholds {})",
            self.current.as_str(),
            self.last_raw.as_str(),
            self.scheduler
                .pending()
                .map_or("nil".to_string(), |g| format!(":{}", g.as_str())),
            self.sensitivity,
            if self.calibration.is_some_and(|c| c.calibrated) { "t" } else { "nil" },
            if self.animation_locked { "t" } else { "nil" },
            self.effective.to_sexp(),
        )
    }

    /// Generate IPC config s-expression.
    pub fn config_sexp(&self) -> String {
        let s = &self.scheduler.config;
        let d = &self.dispatcher.config;
        format!(
            "(:cooldown-ms {:.0} :repeat-window-ms {:.0} :debounce-ms {:.0} :throttle-ms {:.1} :history-len {} :min-votes {})",
            d.cooldown_ms,
            d.repeat_window_ms,
            s.debounce_ms,
            s.throttle_ms,
            self.smoother.config.history_len,
            self.smoother.config.min_votes,
        )
    }
}
