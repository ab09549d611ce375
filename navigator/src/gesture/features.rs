//! Geometric features: wrist offsets relative to the shoulders.

use super::landmarks::{LandmarkFrame, UpperBody};

/// Wrist/shoulder offsets for one frame.
///
/// Horizontal offsets are oriented so that an arm extended outward (in a
/// mirrored view) is positive.  Vertical offsets are shoulder-minus-wrist,
/// positive when the wrist is above the shoulder.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GestureFeatures {
    pub dx_right: f32,
    pub dx_left: f32,
    pub dy_right: f32,
    pub dy_left: f32,
    pub abs_dy_right: f32,
    pub abs_dy_left: f32,
}

impl GestureFeatures {
    pub fn extract(body: &UpperBody) -> Self {
        Self {
            dx_right: body.right_wrist.x - body.right_shoulder.x,
            dx_left: body.left_shoulder.x - body.left_wrist.x,
            dy_right: body.right_shoulder.y - body.right_wrist.y,
            dy_left: body.left_shoulder.y - body.left_wrist.y,
            abs_dy_right: (body.right_wrist.y - body.right_shoulder.y).abs(),
            abs_dy_left: (body.left_wrist.y - body.left_shoulder.y).abs(),
        }
    }

    /// Features for a raw frame, or `None` if the frame is unusable.
    pub fn from_frame(frame: &LandmarkFrame) -> Option<Self> {
        frame.upper_body().map(|body| Self::extract(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::landmarks::{make_frame, RIGHT_WRIST};

    #[test]
    fn test_extract_offsets() {
        // Mirrored view: right shoulder at x=0.6, left shoulder at x=0.4.
        let frame = make_frame((0.4, 0.4), (0.6, 0.4), (0.3, 0.5), (0.8, 0.35));
        let f = GestureFeatures::from_frame(&frame).expect("usable frame");

        assert!((f.dx_right - 0.2).abs() < 1e-6, "dx_right={}", f.dx_right);
        assert!((f.dx_left - 0.1).abs() < 1e-6, "dx_left={}", f.dx_left);
        assert!((f.dy_right - 0.05).abs() < 1e-6, "dy_right={}", f.dy_right);
        assert!((f.dy_left + 0.1).abs() < 1e-6, "dy_left={}", f.dy_left);
        assert!((f.abs_dy_right - 0.05).abs() < 1e-6);
        assert!((f.abs_dy_left - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_unusable_frame_has_no_features() {
        let mut frame = make_frame((0.4, 0.4), (0.6, 0.4), (0.3, 0.5), (0.8, 0.35));
        frame.points[RIGHT_WRIST] = None;
        assert!(GestureFeatures::from_frame(&frame).is_none());
    }
}
