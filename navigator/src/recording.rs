//! Labelled landmark recordings and offline evaluation.
//!
//! Recordings are CSV files with one row per frame: columns
//! `landmark_{i}_{x|y|z|visibility}` plus a `gesture` (or legacy
//! `gesture_label`) column, and optionally `session_id` / `frame_index`.
//! Replaying a recording runs every frame through the full pipeline at a
//! fixed frame rate and scores the raw classifier against the labels.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use tracing::{debug, info};

use crate::gesture::dispatcher::ActionRecord;
use crate::gesture::landmarks::{Landmark, POSE_LANDMARK_COUNT};
use crate::gesture::{classify_frame, Gesture, GesturePipeline, LandmarkFrame, PipelineEvent};

/// One recorded frame with its ground-truth label.
#[derive(Debug, Clone)]
pub struct LabelledFrame {
    pub frame: LandmarkFrame,
    /// `None` when the row's label is missing or not a known gesture.
    pub label: Option<Gesture>,
    pub session_id: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct LandmarkColumns {
    x: Option<usize>,
    y: Option<usize>,
    z: Option<usize>,
    visibility: Option<usize>,
}

/// Load a recording from disk.
pub fn load_recording(path: impl AsRef<Path>) -> Result<Vec<LabelledFrame>> {
    let path = path.as_ref();
    let file =
        std::fs::File::open(path).with_context(|| format!("failed to open recording {:?}", path))?;
    let frames =
        parse_recording(file).with_context(|| format!("invalid recording {:?}", path))?;
    info!(?path, frames = frames.len(), "recording loaded");
    Ok(frames)
}

/// Parse recording CSV from any reader.
pub fn parse_recording<R: io::Read>(reader: R) -> Result<Vec<LabelledFrame>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = reader.headers().context("missing header row")?.clone();

    let mut landmarks: BTreeMap<usize, LandmarkColumns> = BTreeMap::new();
    let mut label_col = None;
    let mut legacy_label_col = None;
    let mut session_col = None;
    for (col, name) in headers.iter().enumerate() {
        match name.trim() {
            "gesture" => label_col = Some(col),
            "gesture_label" => legacy_label_col = Some(col),
            "session_id" => session_col = Some(col),
            other => {
                if let Some((index, field)) = parse_landmark_header(other) {
                    if index >= POSE_LANDMARK_COUNT {
                        bail!(
                            "column {:?}: landmark index {} out of range (max {})",
                            other,
                            index,
                            POSE_LANDMARK_COUNT - 1
                        );
                    }
                    let entry = landmarks.entry(index).or_default();
                    match field {
                        "x" => entry.x = Some(col),
                        "y" => entry.y = Some(col),
                        "z" => entry.z = Some(col),
                        _ => entry.visibility = Some(col),
                    }
                }
            }
        }
    }
    let label_col = label_col.or(legacy_label_col);

    let Some(&max_index) = landmarks.keys().next_back() else {
        bail!("no landmark_<i>_<x|y|z|visibility> columns");
    };

    let mut frames = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("invalid row {}", row_idx + 1))?;
        let field = |col: Option<usize>| -> Option<f32> {
            col.and_then(|c| record.get(c))
                .and_then(|s| s.trim().parse::<f32>().ok())
        };

        let mut points = vec![None; max_index + 1];
        for (&index, cols) in &landmarks {
            let (Some(x), Some(y)) = (field(cols.x), field(cols.y)) else {
                continue;
            };
            let mut lm = Landmark::new(x, y);
            lm.z = field(cols.z);
            lm.visibility = field(cols.visibility);
            points[index] = Some(lm);
        }

        let label = label_col
            .and_then(|c| record.get(c))
            .and_then(Gesture::parse);
        let session_id = session_col
            .and_then(|c| record.get(c))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        frames.push(LabelledFrame {
            frame: LandmarkFrame::new(points),
            label,
            session_id,
        });
    }

    if frames.is_empty() {
        bail!("recording contains no rows");
    }
    Ok(frames)
}

/// `landmark_12_visibility` → `(12, "visibility")`.
fn parse_landmark_header(name: &str) -> Option<(usize, &str)> {
    let rest = name.strip_prefix("landmark_")?;
    let (index, field) = rest.split_once('_')?;
    let index = index.parse().ok()?;
    matches!(field, "x" | "y" | "z" | "visibility").then_some((index, field))
}

// ── Confusion matrix ────────────────────────────────────────

/// Counts of (expected, predicted) pairs over the four gesture states.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfusionMatrix {
    counts: [[usize; 4]; 4],
    /// Frames without a usable label.
    pub unlabelled: usize,
}

impl ConfusionMatrix {
    pub fn record(&mut self, expected: Option<Gesture>, predicted: Gesture) {
        match expected {
            Some(e) => self.counts[e.index()][predicted.index()] += 1,
            None => self.unlabelled += 1,
        }
    }

    pub fn count(&self, expected: Gesture, predicted: Gesture) -> usize {
        self.counts[expected.index()][predicted.index()]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// Fraction of labelled frames classified correctly.
    pub fn accuracy(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let correct: usize = (0..4).map(|i| self.counts[i][i]).sum();
        Some(correct as f64 / total as f64)
    }

    /// Recall for one label.
    pub fn recall(&self, expected: Gesture) -> Option<f64> {
        let row = &self.counts[expected.index()];
        let total: usize = row.iter().sum();
        (total > 0).then(|| row[expected.index()] as f64 / total as f64)
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>10}", "expected")?;
        for g in Gesture::ALL {
            write!(f, "{:>8}", g.as_str())?;
        }
        writeln!(f, "{:>8}", "recall")?;
        for e in Gesture::ALL {
            write!(f, "{:>10}", e.as_str())?;
            for p in Gesture::ALL {
                write!(f, "{:>8}", self.count(e, p))?;
            }
            match self.recall(e) {
                Some(r) => writeln!(f, "{:>7.1}%", r * 100.0)?,
                None => writeln!(f, "{:>8}", "-")?,
            }
        }
        if let Some(acc) = self.accuracy() {
            writeln!(f, "accuracy {:.1}% over {} frames", acc * 100.0, self.total())?;
        }
        if self.unlabelled > 0 {
            writeln!(f, "{} unlabelled frames skipped", self.unlabelled)?;
        }
        Ok(())
    }
}

// ── Replay ──────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ReplayReport {
    pub frames: usize,
    pub actions: Vec<ActionRecord>,
    pub refused: usize,
    pub gesture_changes: usize,
    pub confusion: ConfusionMatrix,
}

/// Run `frames` through `pipeline` at `fps`.  Tracking is cleared when
/// the session id changes, and pending transitions are flushed at the end.
pub fn replay(frames: &[LabelledFrame], pipeline: &mut GesturePipeline, fps: f64) -> ReplayReport {
    let frame_ms = 1000.0 / fps.max(1.0);
    let mut report = ReplayReport::default();
    let mut session: Option<&str> = None;
    let mut now = 0.0;

    for (i, lf) in frames.iter().enumerate() {
        now = i as f64 * frame_ms;
        let sid = lf.session_id.as_deref();
        if i > 0 && sid != session {
            debug!(?sid, "new recording session");
            pipeline.clear_tracking();
        }
        session = sid;

        let raw = classify_frame(&lf.frame, pipeline.effective_thresholds());
        report.confusion.record(lf.label, raw);
        let events = pipeline.on_frame(&lf.frame, now);
        tally(&mut report, events);
        report.frames += 1;
    }

    let events = pipeline.tick(now + 1000.0);
    tally(&mut report, events);
    report
}

fn tally(report: &mut ReplayReport, events: Vec<PipelineEvent>) {
    for e in events {
        match e {
            PipelineEvent::Action(record) => report.actions.push(record),
            PipelineEvent::ActionRefused { .. } => report.refused += 1,
            PipelineEvent::GestureChanged { .. } => report.gesture_changes += 1,
        }
    }
}
