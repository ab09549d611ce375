//! Navigator state: the single owner of everything mutable.
//!
//! `NavigatorState` holds the gesture pipeline, the calibration manager
//! and the store, and is passed as `&mut` to every IPC handler.  Events
//! produced while handling a message are queued and drained by the
//! server after the response is written.

use std::time::Instant;

use tracing::{info, warn};

use crate::config::NavigatorConfig;
use crate::gesture::{
    CalibrationEvent, CalibrationManager, CalibrationProfile, Gesture, GesturePipeline,
    LandmarkFrame, PipelineEvent, Sensitivity,
};
use crate::store::{self, KeyValueStore, StoreError};

/// Anything the navigator reports asynchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum NavigatorEvent {
    Pipeline(PipelineEvent),
    Calibration(CalibrationEvent),
}

impl NavigatorEvent {
    pub fn to_sexp(&self) -> String {
        match self {
            Self::Pipeline(e) => e.to_sexp(),
            Self::Calibration(e) => e.to_sexp(),
        }
    }
}

pub struct NavigatorState {
    pub config: NavigatorConfig,
    pub pipeline: GesturePipeline,
    pub calibration: CalibrationManager,
    pub store: Box<dyn KeyValueStore>,
    /// Events waiting to be sent.
    pub events: Vec<NavigatorEvent>,
    started: Instant,
    /// Client timeline minus `clock_ms`, from the last message carrying `:t`.
    clock_offset_ms: f64,
    /// Last timestamp seen, from a message or the clock.
    last_now_ms: f64,
}

impl NavigatorState {
    /// Build state from config, restoring sensitivity and calibration from
    /// the store.
    pub fn new(config: NavigatorConfig, mut store: Box<dyn KeyValueStore>) -> Self {
        let mut pipeline = GesturePipeline::new(config.pipeline());
        let sensitivity = store::load_sensitivity(store.as_mut());
        let calibration = store::load_calibration(store.as_mut());
        pipeline.set_sensitivity(sensitivity);
        pipeline.set_calibration(calibration);

        info!(
            sensitivity = %sensitivity,
            calibrated = calibration.is_some_and(|c| c.calibrated),
            "NavigatorState initialized"
        );

        Self {
            calibration: CalibrationManager::new(config.calibration),
            config,
            pipeline,
            store,
            events: Vec::new(),
            started: Instant::now(),
            clock_offset_ms: 0.0,
            last_now_ms: 0.0,
        }
    }

    /// Milliseconds since startup.
    pub fn clock_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Resolve a message timestamp.  Without `:t` the clock is mapped onto
    /// the client's timeline, so idle ticks and stamped messages share one
    /// timebase.
    pub fn resolve_now(&mut self, t: Option<f64>) -> f64 {
        let clock = self.clock_ms();
        let now = match t {
            Some(t) => {
                self.clock_offset_ms = t - clock;
                t
            }
            None => clock + self.clock_offset_ms,
        };
        self.last_now_ms = now;
        now
    }

    #[cfg(test)]
    pub(crate) fn backdate_clock(&mut self, ms: u64) {
        if let Some(earlier) = Instant::now().checked_sub(std::time::Duration::from_millis(ms)) {
            self.started = earlier;
        }
    }

    pub fn last_now_ms(&self) -> f64 {
        self.last_now_ms
    }

    /// Route one estimator frame.  While calibration is running the frame
    /// goes to the calibration manager only.
    pub fn on_frame(&mut self, frame: &LandmarkFrame, now_ms: f64) {
        self.advance_calibration(now_ms);
        if self.calibration.is_active() {
            self.calibration.on_frame(frame);
            return;
        }
        let events = self.pipeline.on_frame(frame, now_ms);
        self.events.extend(events.into_iter().map(NavigatorEvent::Pipeline));
    }

    /// Advance every timer without a frame.
    pub fn tick(&mut self, now_ms: f64) {
        self.advance_calibration(now_ms);
        if self.calibration.is_active() {
            return;
        }
        let events = self.pipeline.tick(now_ms);
        self.events.extend(events.into_iter().map(NavigatorEvent::Pipeline));
    }

    /// Keyboard-origin navigation command.
    pub fn key(&mut self, action: Gesture, now_ms: f64) -> PipelineEvent {
        let event = self.pipeline.key(action, now_ms);
        self.events.push(NavigatorEvent::Pipeline(event.clone()));
        event
    }

    fn advance_calibration(&mut self, now_ms: f64) {
        let Some(event) = self.calibration.update(now_ms) else {
            return;
        };
        if let CalibrationEvent::Complete(profile) = &event {
            self.apply_calibration(*profile);
        }
        self.events.push(NavigatorEvent::Calibration(event));
    }

    fn apply_calibration(&mut self, profile: CalibrationProfile) {
        match store::save_calibration(self.store.as_mut(), &profile) {
            Ok(()) => info!("calibration profile saved"),
            Err(e) => warn!("failed to persist calibration: {}", e),
        }
        self.pipeline.set_calibration(Some(profile));
    }

    pub fn start_calibration(&mut self, now_ms: f64) {
        self.pipeline.clear_tracking();
        let event = self.calibration.start(now_ms);
        self.events.push(NavigatorEvent::Calibration(event));
    }

    pub fn cancel_calibration(&mut self) -> bool {
        self.calibration.cancel()
    }

    /// Drop the stored profile and revert to default thresholds.
    pub fn clear_calibration(&mut self) -> Result<(), StoreError> {
        store::clear_calibration(self.store.as_mut())?;
        self.pipeline.set_calibration(None);
        info!("calibration cleared");
        Ok(())
    }

    /// Apply and persist a new sensitivity.
    pub fn set_sensitivity(&mut self, sensitivity: Sensitivity) -> Result<(), StoreError> {
        self.pipeline.set_sensitivity(sensitivity);
        store::save_sensitivity(self.store.as_mut(), sensitivity)?;
        info!(%sensitivity, "sensitivity updated");
        Ok(())
    }

    /// Lesson restart.
    pub fn reset(&mut self) {
        self.pipeline.reset();
        self.calibration.cancel();
        self.events.clear();
    }

    pub fn take_events(&mut self) -> Vec<NavigatorEvent> {
        std::mem::take(&mut self.events)
    }
}
