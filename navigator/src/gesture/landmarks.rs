//! Body landmark frames as delivered by the pose estimator.
//!
//! One frame is a fixed-index list of normalized points (origin top-left,
//! y grows downward).  Only the shoulders and wrists are consumed; a frame
//! that is too short or whose consumed points are missing or poorly visible
//! is unusable and classifies as rest.

use tracing::debug;

// ── Landmark indices ───────────────────────────────────────

pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_WRIST: usize = 15;
pub const RIGHT_WRIST: usize = 16;

/// Frames shorter than this cannot contain every consumed landmark.
pub const MIN_FRAME_LEN: usize = 17;

/// Points in a full pose-estimator frame.
pub const POSE_LANDMARK_COUNT: usize = 33;

/// Consumed landmarks below this visibility make the frame unusable.
pub const MIN_VISIBILITY: f32 = 0.5;

// ── Landmark ───────────────────────────────────────────────

/// A single body landmark in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    /// Relative depth, if the estimator provides one.
    pub z: Option<f32>,
    /// Estimator confidence that the point is visible (0.0–1.0).
    pub visibility: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            z: None,
            visibility: None,
        }
    }

    pub fn with_visibility(mut self, visibility: f32) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn with_z(mut self, z: f32) -> Self {
        self.z = Some(z);
        self
    }

    /// Usable for classification: finite coordinates and, when reported,
    /// visibility at or above the floor.
    pub fn is_usable(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.visibility.map_or(true, |v| v >= MIN_VISIBILITY)
    }
}

// ── Upper body ─────────────────────────────────────────────

/// The four landmarks the classifier reads, already validated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpperBody {
    pub left_shoulder: Landmark,
    pub right_shoulder: Landmark,
    pub left_wrist: Landmark,
    pub right_wrist: Landmark,
}

// ── Frame ──────────────────────────────────────────────────

/// One estimator snapshot.  `None` entries are landmarks the estimator
/// did not report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkFrame {
    pub points: Vec<Option<Landmark>>,
}

impl LandmarkFrame {
    pub fn new(points: Vec<Option<Landmark>>) -> Self {
        Self { points }
    }

    pub fn from_landmarks(landmarks: Vec<Landmark>) -> Self {
        Self {
            points: landmarks.into_iter().map(Some).collect(),
        }
    }

    /// Build a frame from a flat value list with `stride` values per point
    /// (`x y` , `x y z` or `x y z visibility`).  A point whose x or y is
    /// `None` is recorded as missing.  Trailing values that do not fill a
    /// whole point are ignored.
    pub fn from_flat(values: &[Option<f64>], stride: usize) -> Self {
        if !(2..=4).contains(&stride) {
            debug!("Rejecting landmark payload with stride {}", stride);
            return Self::default();
        }
        let points = values
            .chunks_exact(stride)
            .map(|chunk| {
                let x = chunk[0]?;
                let y = chunk[1]?;
                let mut lm = Landmark::new(x as f32, y as f32);
                if stride >= 3 {
                    lm.z = chunk[2].map(|z| z as f32);
                }
                if stride == 4 {
                    lm.visibility = chunk[3].map(|v| v as f32);
                }
                Some(lm)
            })
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Landmark at `index` if present and usable.
    pub fn usable(&self, index: usize) -> Option<Landmark> {
        self.points
            .get(index)
            .copied()
            .flatten()
            .filter(Landmark::is_usable)
    }

    /// Extract the consumed landmarks, or `None` if the frame is unusable.
    pub fn upper_body(&self) -> Option<UpperBody> {
        if self.points.len() < MIN_FRAME_LEN {
            return None;
        }
        Some(UpperBody {
            left_shoulder: self.usable(LEFT_SHOULDER)?,
            right_shoulder: self.usable(RIGHT_SHOULDER)?,
            left_wrist: self.usable(LEFT_WRIST)?,
            right_wrist: self.usable(RIGHT_WRIST)?,
        })
    }

    /// Place a landmark, growing the frame with missing points as needed.
    pub fn set(&mut self, index: usize, landmark: Landmark) {
        if self.points.len() <= index {
            self.points.resize(index + 1, None);
        }
        self.points[index] = Some(landmark);
    }
}

// ── Test helpers ───────────────────────────────────────────

/// Build a 33-point frame with shoulders and wrists at the given positions
/// and every other point parked at the origin.
#[cfg(test)]
pub(crate) fn make_frame(
    left_shoulder: (f32, f32),
    right_shoulder: (f32, f32),
    left_wrist: (f32, f32),
    right_wrist: (f32, f32),
) -> LandmarkFrame {
    let mut frame = LandmarkFrame::from_landmarks(vec![
        Landmark::new(0.0, 0.0).with_visibility(0.99);
        33
    ]);
    frame.set(
        LEFT_SHOULDER,
        Landmark::new(left_shoulder.0, left_shoulder.1).with_visibility(0.99),
    );
    frame.set(
        RIGHT_SHOULDER,
        Landmark::new(right_shoulder.0, right_shoulder.1).with_visibility(0.99),
    );
    frame.set(
        LEFT_WRIST,
        Landmark::new(left_wrist.0, left_wrist.1).with_visibility(0.99),
    );
    frame.set(
        RIGHT_WRIST,
        Landmark::new(right_wrist.0, right_wrist.1).with_visibility(0.99),
    );
    frame
}
