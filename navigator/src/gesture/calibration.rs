//! Guided per-user calibration.
//!
//! Four capture steps (rest, right hand up, left hand up, both hands up),
//! each a lead-in countdown followed by a collection window.  Frames are
//! only accepted while a window is open; the manager is driven by
//! explicit timestamps, so every exit path (complete, error, cancel)
//! leaves it idle with no capture in progress.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::features::GestureFeatures;
use super::landmarks::LandmarkFrame;

// ── Config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Countdown before each collection window (milliseconds).
    pub lead_in_ms: f64,
    /// Length of each collection window (milliseconds).
    pub collection_ms: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            lead_in_ms: 3000.0,
            collection_ms: 2000.0,
        }
    }
}

// ── Steps ───────────────────────────────────────────────────

/// One capture step of the protocol, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStep {
    Rest,
    RightHandUp,
    LeftHandUp,
    BothHandsUp,
}

impl CalibrationStep {
    pub const ALL: [CalibrationStep; 4] = [
        Self::Rest,
        Self::RightHandUp,
        Self::LeftHandUp,
        Self::BothHandsUp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::RightHandUp => "right-hand-up",
            Self::LeftHandUp => "left-hand-up",
            Self::BothHandsUp => "both-hands-up",
        }
    }

    /// Instruction shown to the user during the lead-in.
    pub fn prompt(&self) -> &'static str {
        match self {
            Self::Rest => "Stand naturally with your arms relaxed",
            Self::RightHandUp => "Raise your right hand above your shoulder",
            Self::LeftHandUp => "Raise your left hand above your shoulder",
            Self::BothHandsUp => "Raise both hands above your shoulders",
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Rest => Some(Self::RightHandUp),
            Self::RightHandUp => Some(Self::LeftHandUp),
            Self::LeftHandUp => Some(Self::BothHandsUp),
            Self::BothHandsUp => None,
        }
    }
}

impl std::fmt::Display for CalibrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CalibrationError {
    #[error("no pose detected during {step} step")]
    NoPoseDetected { step: CalibrationStep },
}

// ── Profile ─────────────────────────────────────────────────

/// Mean vertical wrist offsets collected during one step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepAverage {
    pub dy_right: f32,
    pub dy_left: f32,
}

/// Per-user hand-raise deltas measured against the rest baseline.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationProfile {
    pub right_hand_up_delta: f32,
    pub left_hand_up_delta: f32,
    pub both_hands_up_delta: f32,
    pub calibrated: bool,
}

impl CalibrationProfile {
    /// Derive a calibrated profile from the four step averages.
    pub fn derive(
        rest: StepAverage,
        right: StepAverage,
        left: StepAverage,
        both: StepAverage,
    ) -> Self {
        Self {
            right_hand_up_delta: (right.dy_right - rest.dy_right).max(0.0),
            left_hand_up_delta: (left.dy_left - rest.dy_left).max(0.0),
            both_hands_up_delta: (both.dy_right - rest.dy_right)
                .min(both.dy_left - rest.dy_left)
                .max(0.0),
            calibrated: true,
        }
    }

    /// Reject non-finite deltas and clamp negative ones to zero.
    pub fn sanitized(self) -> Option<Self> {
        let deltas = [
            self.right_hand_up_delta,
            self.left_hand_up_delta,
            self.both_hands_up_delta,
        ];
        if deltas.iter().any(|d| !d.is_finite()) {
            return None;
        }
        Some(Self {
            right_hand_up_delta: self.right_hand_up_delta.max(0.0),
            left_hand_up_delta: self.left_hand_up_delta.max(0.0),
            both_hands_up_delta: self.both_hands_up_delta.max(0.0),
            calibrated: self.calibrated,
        })
    }

    pub fn to_sexp(&self) -> String {
        format!(
            "(:right-hand-up-delta {:.4} :left-hand-up-delta {:.4} :both-hands-up-delta {:.4} :calibrated {})",
            self.right_hand_up_delta,
            self.left_hand_up_delta,
            self.both_hands_up_delta,
            if self.calibrated { "t" } else { "nil" },
        )
    }
}

// ── State machine ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStage {
    LeadIn,
    Collecting,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationState {
    Idle,
    Capturing {
        step: CalibrationStep,
        stage: CaptureStage,
        since_ms: f64,
    },
    Complete(CalibrationProfile),
    Error(CalibrationError),
}

/// Emitted by the manager on every state change.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    /// Lead-in for a step began.
    StepStarted { step: CalibrationStep },
    /// Collection window for a step opened.
    Collecting { step: CalibrationStep },
    /// All steps done; the profile should be persisted.
    Complete(CalibrationProfile),
    Failed(CalibrationError),
}

impl CalibrationEvent {
    /// Format as an IPC event s-expression.
    pub fn to_sexp(&self) -> String {
        match self {
            Self::StepStarted { step } => format!(
                "(:type :event :event :calibration-step :step :{} :prompt \"{}\")",
                step.as_str(),
                step.prompt(),
            ),
            Self::Collecting { step } => format!(
                "(:type :event :event :calibration-collecting :step :{})",
                step.as_str()
            ),
            Self::Complete(profile) => format!(
                "(:type :event :event :calibration-complete :profile {})",
                profile.to_sexp()
            ),
            Self::Failed(CalibrationError::NoPoseDetected { step }) => format!(
                "(:type :event :event :calibration-error :step :{} :reason \"no pose detected\")",
                step.as_str()
            ),
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    sum_right: f64,
    sum_left: f64,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, dy_right: f32, dy_left: f32) {
        self.sum_right += dy_right as f64;
        self.sum_left += dy_left as f64;
        self.count += 1;
    }

    fn average(&self) -> Option<StepAverage> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(StepAverage {
            dy_right: (self.sum_right / n) as f32,
            dy_left: (self.sum_left / n) as f32,
        })
    }
}

/// Drives the capture protocol and accumulates samples.
#[derive(Debug)]
pub struct CalibrationManager {
    pub config: CalibrationConfig,
    pub state: CalibrationState,
    current: Accumulator,
    averages: Vec<StepAverage>,
}

impl Default for CalibrationManager {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

impl CalibrationManager {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            state: CalibrationState::Idle,
            current: Accumulator::default(),
            averages: Vec::with_capacity(CalibrationStep::ALL.len()),
        }
    }

    /// Begin (or restart) the protocol at the rest step.
    pub fn start(&mut self, now_ms: f64) -> CalibrationEvent {
        self.current = Accumulator::default();
        self.averages.clear();
        self.enter_step(CalibrationStep::Rest, now_ms)
    }

    /// Abort an in-progress capture.  Returns whether anything was running.
    pub fn cancel(&mut self) -> bool {
        let was_active = self.is_active();
        if was_active {
            info!("Calibration cancelled");
        }
        self.state = CalibrationState::Idle;
        self.current = Accumulator::default();
        self.averages.clear();
        was_active
    }

    /// Whether a step is in progress (lead-in or collection).
    pub fn is_active(&self) -> bool {
        matches!(self.state, CalibrationState::Capturing { .. })
    }

    /// Whether frames are currently being sampled.
    pub fn is_collecting(&self) -> bool {
        matches!(
            self.state,
            CalibrationState::Capturing {
                stage: CaptureStage::Collecting,
                ..
            }
        )
    }

    /// Offer a frame.  Returns true if it contributed a sample.
    pub fn on_frame(&mut self, frame: &LandmarkFrame) -> bool {
        if !self.is_collecting() {
            return false;
        }
        match GestureFeatures::from_frame(frame) {
            Some(f) => {
                self.current.add(f.dy_right, f.dy_left);
                true
            }
            None => false,
        }
    }

    /// Advance timers.  At most one transition happens per call and the
    /// next stage is timed from `now_ms`.
    pub fn update(&mut self, now_ms: f64) -> Option<CalibrationEvent> {
        let CalibrationState::Capturing {
            step,
            stage,
            since_ms,
        } = self.state
        else {
            return None;
        };
        let elapsed = now_ms - since_ms;

        match stage {
            CaptureStage::LeadIn if elapsed >= self.config.lead_in_ms => {
                debug!("Calibration collecting: {}", step);
                self.current = Accumulator::default();
                self.state = CalibrationState::Capturing {
                    step,
                    stage: CaptureStage::Collecting,
                    since_ms: now_ms,
                };
                Some(CalibrationEvent::Collecting { step })
            }
            CaptureStage::Collecting if elapsed >= self.config.collection_ms => {
                Some(self.finish_step(step, now_ms))
            }
            _ => None,
        }
    }

    /// Milliseconds left in the current lead-in or collection window.
    pub fn remaining_ms(&self, now_ms: f64) -> Option<f64> {
        match self.state {
            CalibrationState::Capturing {
                stage, since_ms, ..
            } => {
                let total = match stage {
                    CaptureStage::LeadIn => self.config.lead_in_ms,
                    CaptureStage::Collecting => self.config.collection_ms,
                };
                Some((total - (now_ms - since_ms)).max(0.0))
            }
            _ => None,
        }
    }

    fn enter_step(&mut self, step: CalibrationStep, now_ms: f64) -> CalibrationEvent {
        info!("Calibration step: {} ({})", step, step.prompt());
        self.state = CalibrationState::Capturing {
            step,
            stage: CaptureStage::LeadIn,
            since_ms: now_ms,
        };
        CalibrationEvent::StepStarted { step }
    }

    fn finish_step(&mut self, step: CalibrationStep, now_ms: f64) -> CalibrationEvent {
        let Some(avg) = self.current.average() else {
            warn!("Calibration step {} collected no samples", step);
            let err = CalibrationError::NoPoseDetected { step };
            self.averages.clear();
            self.state = CalibrationState::Error(err);
            return CalibrationEvent::Failed(err);
        };
        debug!(
            "Calibration step {}: {} samples, dy_right={:.3} dy_left={:.3}",
            step, self.current.count, avg.dy_right, avg.dy_left
        );
        self.averages.push(avg);
        self.current = Accumulator::default();

        if let Some(next) = step.next() {
            return self.enter_step(next, now_ms);
        }

        let profile = match self.averages.as_slice() {
            [rest, right, left, both] => CalibrationProfile::derive(*rest, *right, *left, *both),
            _ => CalibrationProfile::default(),
        };
        info!(
            "Calibration complete: right={:.3} left={:.3} both={:.3}",
            profile.right_hand_up_delta, profile.left_hand_up_delta, profile.both_hands_up_delta
        );
        self.averages.clear();
        self.state = CalibrationState::Complete(profile);
        CalibrationEvent::Complete(profile)
    }

    /// Generate IPC status s-expression.
    pub fn status_sexp(&self, now_ms: f64) -> String {
        match &self.state {
            CalibrationState::Idle => "(:state :idle)".to_string(),
            CalibrationState::Capturing { step, stage, .. } => format!(
                "(:state :{} :step :{} :remaining-ms {:.0} :samples {})",
                match stage {
                    CaptureStage::LeadIn => "lead-in",
                    CaptureStage::Collecting => "collecting",
                },
                step.as_str(),
                self.remaining_ms(now_ms).unwrap_or(0.0),
                self.current.count,
            ),
            CalibrationState::Complete(profile) => {
                format!("(:state :complete :profile {})", profile.to_sexp())
            }
            CalibrationState::Error(err) => {
                format!("(:state :error :reason \"{}\")", err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::landmarks::make_frame;

    /// Frame whose shoulder-minus-wrist offsets are exactly `dy_right`, `dy_left`.
    fn frame_with_dy(dy_right: f32, dy_left: f32) -> LandmarkFrame {
        make_frame(
            (0.4, 0.5),
            (0.6, 0.5),
            (0.45, 0.5 - dy_left),
            (0.55, 0.5 - dy_right),
        )
    }

    /// Run one full step: lead-in, collection with `frames`, close.
    fn run_step(
        mgr: &mut CalibrationManager,
        now: &mut f64,
        frames: &[LandmarkFrame],
    ) -> Option<CalibrationEvent> {
        *now += 3000.0;
        assert!(matches!(
            mgr.update(*now),
            Some(CalibrationEvent::Collecting { .. })
        ));
        let window_start = *now;
        for f in frames {
            *now += 100.0;
            mgr.on_frame(f);
        }
        *now = window_start + 2000.0;
        mgr.update(*now)
    }

    #[test]
    fn test_derive_profile() {
        let p = CalibrationProfile::derive(
            StepAverage { dy_right: 0.0, dy_left: 0.0 },
            StepAverage { dy_right: 0.3, dy_left: 0.0 },
            StepAverage { dy_right: 0.0, dy_left: 0.28 },
            StepAverage { dy_right: 0.25, dy_left: 0.22 },
        );
        assert!((p.right_hand_up_delta - 0.3).abs() < 1e-6);
        assert!((p.left_hand_up_delta - 0.28).abs() < 1e-6);
        assert!((p.both_hands_up_delta - 0.22).abs() < 1e-6);
        assert!(p.calibrated);
    }

    #[test]
    fn test_derive_clamps_negative() {
        let rest = StepAverage { dy_right: 0.1, dy_left: 0.1 };
        let low = StepAverage { dy_right: 0.05, dy_left: 0.05 };
        let p = CalibrationProfile::derive(rest, low, low, low);
        assert_eq!(p.right_hand_up_delta, 0.0);
        assert_eq!(p.left_hand_up_delta, 0.0);
        assert_eq!(p.both_hands_up_delta, 0.0);
    }

    #[test]
    fn test_sanitized() {
        let p = CalibrationProfile {
            right_hand_up_delta: -0.2,
            left_hand_up_delta: 0.1,
            both_hands_up_delta: 0.3,
            calibrated: true,
        };
        assert_eq!(p.sanitized().unwrap().right_hand_up_delta, 0.0);

        let bad = CalibrationProfile {
            left_hand_up_delta: f32::INFINITY,
            ..p
        };
        assert!(bad.sanitized().is_none());
    }

    #[test]
    fn test_profile_json_field_names() {
        let p = CalibrationProfile {
            right_hand_up_delta: 0.5,
            left_hand_up_delta: 0.25,
            both_hands_up_delta: 0.125,
            calibrated: true,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"rightHandUpDelta\":0.5"), "{}", json);
        assert!(json.contains("\"bothHandsUpDelta\":0.125"), "{}", json);
        assert!(json.contains("\"calibrated\":true"), "{}", json);
    }

    #[test]
    fn test_full_protocol() {
        let mut mgr = CalibrationManager::default();
        let mut now = 0.0;
        assert_eq!(
            mgr.start(now),
            CalibrationEvent::StepStarted { step: CalibrationStep::Rest }
        );

        let steps = [
            frame_with_dy(0.0, 0.0),
            frame_with_dy(0.3, 0.0),
            frame_with_dy(0.0, 0.28),
            frame_with_dy(0.25, 0.22),
        ];
        let mut last = None;
        for (i, frame) in steps.iter().enumerate() {
            last = run_step(&mut mgr, &mut now, &[frame.clone(), frame.clone(), frame.clone()]);
            if i < 3 {
                assert_eq!(
                    last,
                    Some(CalibrationEvent::StepStarted { step: CalibrationStep::ALL[i + 1] })
                );
            }
        }

        let Some(CalibrationEvent::Complete(p)) = last else {
            panic!("expected completion, got {:?}", last);
        };
        assert!((p.right_hand_up_delta - 0.3).abs() < 1e-4);
        assert!((p.left_hand_up_delta - 0.28).abs() < 1e-4);
        assert!((p.both_hands_up_delta - 0.22).abs() < 1e-4);
        assert!(!mgr.is_active());
        assert!(matches!(mgr.state, CalibrationState::Complete(_)));
    }

    #[test]
    fn test_lead_in_ignores_frames() {
        let mut mgr = CalibrationManager::default();
        mgr.start(0.0);
        assert!(!mgr.on_frame(&frame_with_dy(0.1, 0.1)));
        assert_eq!(mgr.update(2999.0), None);
        assert!(mgr.update(3000.0).is_some());
        assert!(mgr.on_frame(&frame_with_dy(0.1, 0.1)));
    }

    #[test]
    fn test_no_samples_errors_and_discards_progress() {
        let mut mgr = CalibrationManager::default();
        let mut now = 0.0;
        mgr.start(now);
        run_step(&mut mgr, &mut now, &[frame_with_dy(0.0, 0.0)]);

        // Right-hand step: only unusable frames arrive.
        let mut unusable = frame_with_dy(0.3, 0.0);
        unusable.points.truncate(10);
        let evt = run_step(&mut mgr, &mut now, &[unusable]);
        assert_eq!(
            evt,
            Some(CalibrationEvent::Failed(CalibrationError::NoPoseDetected {
                step: CalibrationStep::RightHandUp
            }))
        );
        assert!(!mgr.is_active());
        assert!(!mgr.on_frame(&frame_with_dy(0.3, 0.0)));
        assert!(mgr.averages.is_empty());

        // Retry starts from the beginning.
        assert_eq!(
            mgr.start(now),
            CalibrationEvent::StepStarted { step: CalibrationStep::Rest }
        );
    }

    #[test]
    fn test_cancel_stops_capture() {
        let mut mgr = CalibrationManager::default();
        mgr.start(0.0);
        mgr.update(3000.0);
        assert!(mgr.is_collecting());
        assert!(mgr.cancel());
        assert!(!mgr.on_frame(&frame_with_dy(0.1, 0.1)));
        assert_eq!(mgr.update(10_000.0), None);
        assert!(!mgr.cancel());
    }

    #[test]
    fn test_remaining_ms() {
        let mut mgr = CalibrationManager::default();
        assert_eq!(mgr.remaining_ms(0.0), None);
        mgr.start(1000.0);
        assert_eq!(mgr.remaining_ms(2000.0), Some(2000.0));
        mgr.update(4000.0);
        assert_eq!(mgr.remaining_ms(4500.0), Some(1500.0));
    }

    #[test]
    fn test_event_sexp() {
        let evt = CalibrationEvent::Failed(CalibrationError::NoPoseDetected {
            step: CalibrationStep::BothHandsUp,
        });
        let sexp = evt.to_sexp();
        assert!(sexp.contains(":calibration-error"));
        assert!(sexp.contains("no pose detected"));
        assert!(lexpr::from_str(&sexp).is_ok(), "unparseable: {}", sexp);
    }

    #[test]
    fn test_status_sexp() {
        let mut mgr = CalibrationManager::default();
        assert_eq!(mgr.status_sexp(0.0), "(:state :idle)");
        mgr.start(0.0);
        let s = mgr.status_sexp(1000.0);
        assert!(s.contains(":lead-in"), "{}", s);
        assert!(s.contains(":remaining-ms 2000"), "{}", s);
    }
}
