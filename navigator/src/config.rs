//! Navigator configuration, loaded from an optional TOML file.
//!
//! Every section and field falls back to its default, so a file only
//! needs to name what it changes:
//!
//! ```toml
//! [dispatcher]
//! cooldown_ms = 800.0
//!
//! [scheduler]
//! debounce_ms = 120.0
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::gesture::{
    CalibrationConfig, DispatcherConfig, PipelineConfig, SchedulerConfig, SmoothingConfig,
    ThresholdProfile,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Messages per second accepted from one client.
    pub rate_limit: u32,
    /// Timer tick interval while a socket client is idle (milliseconds).
    pub tick_interval_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            rate_limit: 200,
            tick_interval_ms: 33,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Frame rate assumed for recordings without usable timestamps.
    pub fps: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { fps: 30.0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorConfig {
    /// Base thresholds before calibration and sensitivity.
    pub thresholds: ThresholdProfile,
    pub smoothing: SmoothingConfig,
    pub scheduler: SchedulerConfig,
    pub dispatcher: DispatcherConfig,
    pub calibration: CalibrationConfig,
    pub ipc: IpcConfig,
    pub replay: ReplayConfig,
    /// Store file; the XDG data directory is used when unset.
    pub store_path: Option<PathBuf>,
}

impl NavigatorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {:?}", path))?;
        Self::from_toml(&text).with_context(|| format!("invalid config {:?}", path))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which the pipeline could never act.
    pub fn validate(&self) -> Result<()> {
        let s = &self.smoothing;
        ensure!(s.history_len > 0, "smoothing.history_len must be at least 1");
        ensure!(
            s.min_votes > 0 && s.min_votes <= s.history_len,
            "smoothing.min_votes ({}) must be between 1 and history_len ({})",
            s.min_votes,
            s.history_len
        );
        ensure!(
            self.replay.fps.is_finite() && self.replay.fps > 0.0,
            "replay.fps must be positive, got {}",
            self.replay.fps
        );
        Ok(())
    }

    /// Load `path` if given, else the default location if it exists, else
    /// built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = Self::default_path();
        if default_path.exists() {
            return Self::load(&default_path);
        }
        info!("no config file, using defaults");
        Ok(Self::default())
    }

    pub fn default_path() -> PathBuf {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
            .unwrap_or_else(std::env::temp_dir)
            .join("deck-navigator")
            .join("config.toml")
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            thresholds: self.thresholds,
            smoothing: self.smoothing,
            scheduler: self.scheduler,
            dispatcher: self.dispatcher,
        }
    }
}
