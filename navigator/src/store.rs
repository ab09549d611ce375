//! Opaque key/value persistence for sensitivity and calibration.
//!
//! The navigator only ever reads and writes two keys.  Loading never fails
//! to the caller: absent entries yield defaults, and unreadable entries are
//! removed with a warning before defaults are substituted.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::gesture::{CalibrationProfile, Sensitivity};

pub const SENSITIVITY_KEY: &str = "gesture.sensitivity";
pub const CALIBRATION_KEY: &str = "gesture.calibration";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// String key/value storage.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

// ── In-memory store ─────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

// ── File store ──────────────────────────────────────────────

/// One JSON object on disk, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.  A file that is not a
    /// JSON object of strings is treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(?path, "discarding unreadable store: {}", e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(?path, "store file absent, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        info!(?path, entries = entries.len(), "store opened");
        Ok(Self { path, entries })
    }

    /// Compute the default store path.
    pub fn default_path() -> PathBuf {
        let base = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .unwrap_or_else(std::env::temp_dir);
        base.join("deck-navigator").join("store.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

// ── Typed entries ───────────────────────────────────────────

/// Stored sensitivity, or the default.  Corrupt values are removed.
pub fn load_sensitivity(store: &mut dyn KeyValueStore) -> Sensitivity {
    let Some(raw) = store.get(SENSITIVITY_KEY) else {
        return Sensitivity::default();
    };
    match raw.parse::<Sensitivity>() {
        Ok(s) => s,
        Err(e) => {
            warn!("{}; removing stored value", e);
            if let Err(e) = store.remove(SENSITIVITY_KEY) {
                warn!("failed to remove corrupt sensitivity: {}", e);
            }
            Sensitivity::default()
        }
    }
}

pub fn save_sensitivity(
    store: &mut dyn KeyValueStore,
    sensitivity: Sensitivity,
) -> Result<(), StoreError> {
    store.set(SENSITIVITY_KEY, &sensitivity.to_string())
}

/// Stored calibration profile, if any.  Corrupt or non-finite profiles are
/// removed; negative deltas are clamped to zero.
pub fn load_calibration(store: &mut dyn KeyValueStore) -> Option<CalibrationProfile> {
    let raw = store.get(CALIBRATION_KEY)?;
    let parsed = serde_json::from_str::<CalibrationProfile>(&raw)
        .ok()
        .and_then(CalibrationProfile::sanitized);
    if parsed.is_none() {
        warn!("discarding invalid stored calibration");
        if let Err(e) = store.remove(CALIBRATION_KEY) {
            warn!("failed to remove corrupt calibration: {}", e);
        }
    }
    parsed
}

pub fn save_calibration(
    store: &mut dyn KeyValueStore,
    profile: &CalibrationProfile,
) -> Result<(), StoreError> {
    store.set(CALIBRATION_KEY, &serde_json::to_string(profile)?)
}

pub fn clear_calibration(store: &mut dyn KeyValueStore) -> Result<(), StoreError> {
    store.remove(CALIBRATION_KEY)
}
