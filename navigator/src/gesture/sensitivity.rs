//! User-facing sensitivity and the threshold multiplier derived from it.

use std::fmt;
use std::str::FromStr;

/// Default sensitivity when nothing has been persisted.
pub const DEFAULT_SENSITIVITY: f32 = 0.12;

/// Floor applied before division so a zero sensitivity stays bounded.
pub const SENSITIVITY_FLOOR: f32 = 0.01;

/// Sensitivity in [0, 1].  Lower values make gestures easier to trigger.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Sensitivity(f32);

impl Default for Sensitivity {
    fn default() -> Self {
        Self(DEFAULT_SENSITIVITY)
    }
}

impl Sensitivity {
    /// Construct from a raw value; `None` if it is not a finite number in [0, 1].
    pub fn new(value: f32) -> Option<Self> {
        (value.is_finite() && (0.0..=1.0).contains(&value)).then_some(Self(value))
    }

    pub fn value(&self) -> f32 {
        self.0
    }

    /// `1 / max(0.01, sensitivity)`.
    pub fn multiplier(&self) -> f32 {
        1.0 / self.0.max(SENSITIVITY_FLOOR)
    }

    /// Scale a base threshold.  Thresholds shrink in magnitude as the
    /// multiplier grows.
    pub fn scale(&self, threshold: f32) -> f32 {
        threshold / self.multiplier()
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error for sensitivity strings that are not a number in [0, 1].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid sensitivity {0:?} (expected a number in [0, 1])")]
pub struct InvalidSensitivity(pub String);

impl FromStr for Sensitivity {
    type Err = InvalidSensitivity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<f32>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| InvalidSensitivity(s.to_string()))
    }
}
