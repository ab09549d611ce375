//! Gesture subsystem: landmark frames in, navigation actions out.
//!
//! Provides:
//! - `landmarks` / `features`: frame validation and wrist/shoulder offsets
//! - `classifier`: threshold classification into REST/NEXT/PREV/SELECT
//! - `sensitivity` / `calibration`: per-user threshold adjustment
//! - `smoothing` / `scheduler`: majority vote, debounce and throttle
//! - `dispatcher`: cooldown-gated action dispatch
//! - `pipeline`: the per-frame glue tying them together

pub mod calibration;
pub mod classifier;
pub mod dispatcher;
pub mod features;
pub mod landmarks;
pub mod pipeline;
pub mod scheduler;
pub mod sensitivity;
pub mod smoothing;

pub use calibration::{
    CalibrationConfig, CalibrationError, CalibrationEvent, CalibrationManager, CalibrationProfile,
    CalibrationStep,
};
pub use classifier::{classify, classify_frame, Gesture, ThresholdProfile};
pub use dispatcher::{ActionDispatcher, ActionSource, DispatchOutcome, DispatcherConfig, RefusalReason};
pub use features::GestureFeatures;
pub use landmarks::{Landmark, LandmarkFrame};
pub use pipeline::{GesturePipeline, PipelineConfig, PipelineEvent};
pub use scheduler::{SchedulerConfig, UpdateScheduler};
pub use sensitivity::Sensitivity;
pub use smoothing::{GestureSmoother, SmoothingConfig};
