//! Threshold gesture classification from wrist/shoulder offsets.
//!
//! Maps one frame's features to REST, NEXT, PREV or SELECT with a fixed
//! first-match priority: PREV, then NEXT, then SELECT, else REST.  The
//! effective thresholds come from the default profile, optionally
//! overridden by a per-user calibration, then scaled by sensitivity.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::calibration::CalibrationProfile;
use super::features::GestureFeatures;
use super::landmarks::LandmarkFrame;
use super::sensitivity::Sensitivity;

// ── Gesture states ─────────────────────────────────────────

/// Recognized body gestures.  Declaration order is the majority-vote
/// tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Gesture {
    /// No active gesture.
    #[default]
    Rest,
    /// Left arm extended sideways, level with the shoulder.
    Next,
    /// Right arm extended sideways, level with the shoulder.
    Prev,
    /// Both wrists raised above the shoulders.
    Select,
}

impl Gesture {
    /// All states in enumeration order.
    pub const ALL: [Gesture; 4] = [Self::Rest, Self::Next, Self::Prev, Self::Select];

    /// Position in enumeration order.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// String representation for IPC.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Next => "next",
            Self::Prev => "prev",
            Self::Select => "select",
        }
    }

    /// Parse an IPC or recording label (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" => Some(Self::Rest),
            "next" => Some(Self::Next),
            "prev" => Some(Self::Prev),
            "select" => Some(Self::Select),
            _ => None,
        }
    }

    /// Whether this state maps to a navigation action.
    pub fn is_action(&self) -> bool {
        !matches!(self, Self::Rest)
    }
}

// ── Threshold profile ──────────────────────────────────────

/// Vertical tolerance slack applied to calibrated hand-up deltas.
pub const CALIBRATED_TOLERANCE_FACTOR: f32 = 1.5;

/// Fraction of the calibrated both-hands delta used as the select cutoff.
pub const CALIBRATED_SELECT_FACTOR: f32 = 0.8;

/// The five geometric cutoffs that separate gesture classes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdProfile {
    /// PREV: right-wrist horizontal offset must exceed this.
    pub prev_dx_right_min: f32,
    /// PREV: right-wrist vertical offset magnitude must stay below this.
    pub prev_abs_dy_right_max: f32,
    /// NEXT: left-wrist horizontal offset must exceed this.
    pub next_dx_left_min: f32,
    /// NEXT: left-wrist vertical offset magnitude must stay below this.
    pub next_abs_dy_left_max: f32,
    /// SELECT: downward wrist offset (wrist.y - shoulder.y) of both hands
    /// must be below this negative cutoff.
    pub select_dy_threshold: f32,
}

impl Default for ThresholdProfile {
    fn default() -> Self {
        Self {
            prev_dx_right_min: -0.051,
            prev_abs_dy_right_max: 1.0,
            next_dx_left_min: 0.45,
            next_abs_dy_left_max: 1.0,
            select_dy_threshold: -0.9,
        }
    }
}

impl ThresholdProfile {
    /// Apply a calibration profile's overrides.  Uncalibrated profiles and
    /// zero deltas leave the corresponding threshold untouched.
    pub fn with_calibration(mut self, calibration: Option<&CalibrationProfile>) -> Self {
        let Some(cal) = calibration.filter(|c| c.calibrated) else {
            return self;
        };
        if cal.right_hand_up_delta > 0.0 {
            self.prev_abs_dy_right_max = cal.right_hand_up_delta * CALIBRATED_TOLERANCE_FACTOR;
        }
        if cal.left_hand_up_delta > 0.0 {
            self.next_abs_dy_left_max = cal.left_hand_up_delta * CALIBRATED_TOLERANCE_FACTOR;
        }
        if cal.both_hands_up_delta > 0.0 {
            self.select_dy_threshold = -(cal.both_hands_up_delta * CALIBRATED_SELECT_FACTOR);
        }
        self
    }

    /// Scale every threshold by the sensitivity multiplier.
    pub fn scaled(self, sensitivity: Sensitivity) -> Self {
        Self {
            prev_dx_right_min: sensitivity.scale(self.prev_dx_right_min),
            prev_abs_dy_right_max: sensitivity.scale(self.prev_abs_dy_right_max),
            next_dx_left_min: sensitivity.scale(self.next_dx_left_min),
            next_abs_dy_left_max: sensitivity.scale(self.next_abs_dy_left_max),
            select_dy_threshold: sensitivity.scale(self.select_dy_threshold),
        }
    }

    /// Thresholds actually used for classification.
    pub fn effective(
        base: &ThresholdProfile,
        calibration: Option<&CalibrationProfile>,
        sensitivity: Sensitivity,
    ) -> Self {
        base.with_calibration(calibration).scaled(sensitivity)
    }

    /// Generate s-expression for IPC status.
    pub fn to_sexp(&self) -> String {
        format!(
            "(:prev-dx-right-min {:.4} :prev-abs-dy-right-max {:.4} :next-dx-left-min {:.4} :next-abs-dy-left-max {:.4} :select-dy-threshold {:.4})",
            self.prev_dx_right_min,
            self.prev_abs_dy_right_max,
            self.next_dx_left_min,
            self.next_abs_dy_left_max,
            self.select_dy_threshold,
        )
    }
}

// ── Classification ─────────────────────────────────────────

/// Classify one frame's features.  First match wins: PREV, NEXT, SELECT.
pub fn classify(features: &GestureFeatures, thresholds: &ThresholdProfile) -> Gesture {
    if features.dx_right > thresholds.prev_dx_right_min
        && features.abs_dy_right < thresholds.prev_abs_dy_right_max
    {
        return Gesture::Prev;
    }

    if features.dx_left > thresholds.next_dx_left_min
        && features.abs_dy_left < thresholds.next_abs_dy_left_max
    {
        return Gesture::Next;
    }

    // dy is positive when the wrist is raised; the select cutoff lives on
    // the downward axis.
    if -features.dy_right < thresholds.select_dy_threshold
        && -features.dy_left < thresholds.select_dy_threshold
    {
        return Gesture::Select;
    }

    Gesture::Rest
}

/// Classify a raw frame.  Unusable frames are REST.
pub fn classify_frame(frame: &LandmarkFrame, thresholds: &ThresholdProfile) -> Gesture {
    match GestureFeatures::from_frame(frame) {
        Some(features) => classify(&features, thresholds),
        None => {
            debug!("Unusable landmark frame ({} points), treating as rest", frame.len());
            Gesture::Rest
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::landmarks::{make_frame, Landmark, LEFT_WRIST};

    fn default_thresholds() -> ThresholdProfile {
        ThresholdProfile::effective(&ThresholdProfile::default(), None, Sensitivity::default())
    }

    fn features(dx_right: f32, dx_left: f32, dy_right: f32, dy_left: f32) -> GestureFeatures {
        GestureFeatures {
            dx_right,
            dx_left,
            dy_right,
            dy_left,
            abs_dy_right: dy_right.abs(),
            abs_dy_left: dy_left.abs(),
        }
    }

    #[test]
    fn test_gesture_as_str_and_parse() {
        for g in Gesture::ALL {
            assert_eq!(Gesture::parse(g.as_str()), Some(g));
        }
        assert_eq!(Gesture::parse("NEXT"), Some(Gesture::Next));
        assert_eq!(Gesture::parse("wave"), None);
    }

    #[test]
    fn test_enumeration_order() {
        assert_eq!(Gesture::Rest.index(), 0);
        assert_eq!(Gesture::Next.index(), 1);
        assert_eq!(Gesture::Prev.index(), 2);
        assert_eq!(Gesture::Select.index(), 3);
    }

    #[test]
    fn test_default_effective_thresholds() {
        let t = default_thresholds();
        assert!((t.prev_dx_right_min + 0.00612).abs() < 1e-5);
        assert!((t.prev_abs_dy_right_max - 0.12).abs() < 1e-5);
        assert!((t.next_dx_left_min - 0.054).abs() < 1e-5);
        assert!((t.next_abs_dy_left_max - 0.12).abs() < 1e-5);
        assert!((t.select_dy_threshold + 0.108).abs() < 1e-5);
    }

    #[test]
    fn test_prev_right_arm_extended() {
        let t = default_thresholds();
        assert_eq!(classify(&features(0.25, -0.1, 0.02, -0.05), &t), Gesture::Prev);
    }

    #[test]
    fn test_next_left_arm_extended() {
        let t = default_thresholds();
        assert_eq!(classify(&features(-0.1, 0.25, -0.05, 0.01), &t), Gesture::Next);
    }

    #[test]
    fn test_select_both_hands_raised() {
        let t = default_thresholds();
        assert_eq!(classify(&features(-0.05, -0.05, 0.2, 0.2), &t), Gesture::Select);
    }

    #[test]
    fn test_select_requires_both_hands() {
        let t = default_thresholds();
        assert_eq!(classify(&features(-0.05, -0.05, 0.2, 0.05), &t), Gesture::Rest);
    }

    #[test]
    fn test_rest_hands_in_front() {
        let t = default_thresholds();
        assert_eq!(classify(&features(-0.1, -0.1, -0.05, -0.05), &t), Gesture::Rest);
    }

    #[test]
    fn test_prev_wins_over_next() {
        let t = default_thresholds();
        let f = features(0.3, 0.3, 0.0, 0.0);
        assert_eq!(classify(&f, &t), Gesture::Prev);
    }

    #[test]
    fn test_prev_wins_over_select_at_boundary() {
        // Both thresholds relaxed so PREV and SELECT both qualify.
        let t = ThresholdProfile {
            prev_dx_right_min: -1.0,
            prev_abs_dy_right_max: 1.0,
            next_dx_left_min: 1.0,
            next_abs_dy_left_max: 0.0,
            select_dy_threshold: -0.05,
        };
        assert_eq!(classify(&features(0.0, 0.0, 0.1, 0.1), &t), Gesture::Prev);
    }

    #[test]
    fn test_short_frame_is_rest() {
        let mut frame = make_frame((0.4, 0.4), (0.6, 0.4), (0.4, 0.4), (0.9, 0.4));
        assert_eq!(classify_frame(&frame, &default_thresholds()), Gesture::Prev);
        frame.points.truncate(16);
        assert_eq!(classify_frame(&frame, &default_thresholds()), Gesture::Rest);
    }

    #[test]
    fn test_low_visibility_is_rest() {
        let mut frame = make_frame((0.4, 0.4), (0.6, 0.4), (0.1, 0.4), (0.5, 0.5));
        assert_eq!(classify_frame(&frame, &default_thresholds()), Gesture::Next);
        frame.set(LEFT_WRIST, Landmark::new(0.1, 0.4).with_visibility(0.3));
        assert_eq!(classify_frame(&frame, &default_thresholds()), Gesture::Rest);
    }

    #[test]
    fn test_calibration_overrides() {
        let cal = CalibrationProfile {
            right_hand_up_delta: 0.3,
            left_hand_up_delta: 0.28,
            both_hands_up_delta: 0.22,
            calibrated: true,
        };
        let t = ThresholdProfile::default().with_calibration(Some(&cal));
        assert!((t.prev_abs_dy_right_max - 0.45).abs() < 1e-6);
        assert!((t.next_abs_dy_left_max - 0.42).abs() < 1e-6);
        assert!((t.select_dy_threshold + 0.176).abs() < 1e-6);
        // Horizontal minimums are never calibrated.
        assert_eq!(t.prev_dx_right_min, -0.051);
        assert_eq!(t.next_dx_left_min, 0.45);
    }

    #[test]
    fn test_uncalibrated_profile_ignored() {
        let cal = CalibrationProfile {
            right_hand_up_delta: 0.3,
            left_hand_up_delta: 0.28,
            both_hands_up_delta: 0.22,
            calibrated: false,
        };
        let t = ThresholdProfile::default().with_calibration(Some(&cal));
        assert_eq!(t, ThresholdProfile::default());
    }

    #[test]
    fn test_zero_delta_keeps_default() {
        let cal = CalibrationProfile {
            right_hand_up_delta: 0.0,
            left_hand_up_delta: 0.2,
            both_hands_up_delta: 0.0,
            calibrated: true,
        };
        let t = ThresholdProfile::default().with_calibration(Some(&cal));
        let d = ThresholdProfile::default();
        assert_eq!(t.prev_abs_dy_right_max, d.prev_abs_dy_right_max);
        assert_eq!(t.select_dy_threshold, d.select_dy_threshold);
        assert!((t.next_abs_dy_left_max - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_lower_sensitivity_triggers_next_more_easily() {
        // dx_left 0.1 clears the scaled minimum at 0.12 but not at 1.0.
        let f = features(-0.1, 0.1, -0.05, 0.01);
        let easy = ThresholdProfile::default().scaled(Sensitivity::new(0.12).unwrap());
        let hard = ThresholdProfile::default().scaled(Sensitivity::new(1.0).unwrap());
        assert_eq!(classify(&f, &easy), Gesture::Next);
        assert_eq!(classify(&f, &hard), Gesture::Rest);
    }

    #[test]
    fn test_to_sexp() {
        let sexp = default_thresholds().to_sexp();
        assert!(sexp.contains(":prev-dx-right-min -0.0061"));
        assert!(sexp.contains(":select-dy-threshold -0.1080"));
    }
}
