use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crew_types::{MailMessage, Task};

use crate::error::StateError;

pub const STATE_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub progress_counter: u64,
    #[serde(default)]
    pub last_progress_at: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub tasks: BTreeMap<String, Task>,
    #[serde(default)]
    pub messages: Vec<MailMessage>,
    #[serde(default)]
    pub meta: Meta,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            tasks: BTreeMap::new(),
            messages: Vec::new(),
            meta: Meta::default(),
        }
    }
}

pub(crate) fn state_path(dir: &Path) -> PathBuf {
    dir.join("state.json")
}

pub(crate) fn lock_path(dir: &Path) -> PathBuf {
    dir.join("state.lock")
}

pub(crate) fn load(dir: &Path) -> Result<StateFile, StateError> {
    let path = state_path(dir);
    if !path.exists() {
        return Ok(StateFile::default());
    }
    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(StateFile::default());
    }
    Ok(serde_json::from_str(&raw)?)
}

pub(crate) fn write_atomic(dir: &Path, state: &StateFile) -> Result<(), StateError> {
    std::fs::create_dir_all(dir)?;
    let final_path = state_path(dir);
    let tmp_path = dir.join("state.json.tmp");
    let payload = serde_json::to_string_pretty(state)?;
    std::fs::write(&tmp_path, payload)?;
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

/// Holds the exclusive advisory lock on `state.lock` for the lifetime of the
/// guard, matching the original `fcntl.flock` critical section.
pub(crate) struct LockGuard {
    file: File,
}

impl LockGuard {
    pub(crate) fn acquire(dir: &Path) -> Result<Self, StateError> {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_path(dir))?;
        file.lock_exclusive()
            .map_err(|e| StateError::LockPoisoned(e.to_string()))?;
        Ok(Self { file })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
