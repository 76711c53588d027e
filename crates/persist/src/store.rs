//! Record store backed by a single JSON file (or nothing, for tests).
//!
//! Layout of the store file:
//! ```text
//! {
//!   "pucks":    [ { "id": "...", "color": "#3B82F6", "size": 30, "mass": 1, "active": true, ... } ],
//!   "settings": [ { "key": "friction", "value": "0.005" }, ... ]
//! }
//! ```
//!
//! Every mutation is written to disk first and only then announced to
//! subscribed listeners.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use arena_common::{BodyConfig, WorldSettings};
use serde::{Deserialize, Serialize};

use crate::records::{
    PuckRecord, SettingKey, SettingRecord, patch_from_records, records_from_settings,
    settings_from_records,
};
use crate::{ChangeKind, ChangeListener, ConfigSource};

/// Errors from record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown setting key: {0}")]
    UnknownKey(String),
    #[error("invalid value {value:?} for setting {key}")]
    InvalidValue { key: String, value: String },
    #[error("puck {0} already exists")]
    DuplicatePuck(String),
}

/// Everything the store holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub pucks: Vec<PuckRecord>,
    #[serde(default)]
    pub settings: Vec<SettingRecord>,
}

impl StoreData {
    /// No pucks, every setting at its default.
    pub fn with_default_settings() -> Self {
        Self {
            pucks: Vec::new(),
            settings: records_from_settings(&WorldSettings::default()),
        }
    }
}

pub struct RecordStore {
    path: Option<PathBuf>,
    data: RwLock<StoreData>,
    listeners: Mutex<Vec<Arc<dyn ChangeListener>>>,
}

impl RecordStore {
    /// A store that lives only in memory.
    pub fn in_memory(data: StoreData) -> Self {
        Self {
            path: None,
            data: RwLock::new(data),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Open the store file, creating it with default settings if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let data: StoreData = serde_json::from_reader(std::fs::File::open(&path)?)?;
            // Validate settings up front so a bad file fails at open, not mid-run.
            patch_from_records(&data.settings)?;
            tracing::info!(path = %path.display(), pucks = data.pucks.len(), "record store opened");
            data
        } else {
            let data = StoreData::with_default_settings();
            write_atomically(&path, &data)?;
            tracing::info!(path = %path.display(), "record store created");
            data
        };
        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Register a listener for committed changes.
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn data(&self) -> StoreData {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn pucks(&self) -> Vec<PuckRecord> {
        self.data().pucks
    }

    pub fn add_puck(&self, record: PuckRecord) -> Result<PuckRecord, StoreError> {
        self.mutate(ChangeKind::Bodies, |data| {
            if data.pucks.iter().any(|p| p.id == record.id) {
                return Err(StoreError::DuplicatePuck(record.id.clone()));
            }
            data.pucks.push(record.clone());
            Ok(record)
        })
    }

    /// Apply `edit` to the puck with `id`. Returns false if there is no such puck.
    pub fn update_puck(
        &self,
        id: &str,
        edit: impl FnOnce(&mut PuckRecord),
    ) -> Result<bool, StoreError> {
        self.mutate(ChangeKind::Bodies, |data| {
            Ok(match data.pucks.iter_mut().find(|p| p.id == id) {
                Some(puck) => {
                    edit(puck);
                    true
                }
                None => false,
            })
        })
    }

    pub fn set_active(&self, id: &str, active: bool) -> Result<bool, StoreError> {
        self.update_puck(id, |p| p.active = active)
    }

    pub fn remove_puck(&self, id: &str) -> Result<bool, StoreError> {
        self.mutate(ChangeKind::Bodies, |data| {
            let before = data.pucks.len();
            data.pucks.retain(|p| p.id != id);
            Ok(data.pucks.len() != before)
        })
    }

    /// Set one setting. The value is validated before anything is written.
    pub fn set_setting(&self, key: SettingKey, value: &str) -> Result<(), StoreError> {
        let record = SettingRecord::new(key, value.trim());
        patch_from_records(std::slice::from_ref(&record))?;
        self.mutate(ChangeKind::Settings, |data| {
            match data.settings.iter_mut().find(|r| r.key == record.key) {
                Some(existing) => existing.value = record.value,
                None => data.settings.push(record),
            }
            Ok(())
        })
    }

    /// Run `edit` on a copy, persist the copy, swap it in, then notify.
    fn mutate<T>(
        &self,
        kind: ChangeKind,
        edit: impl FnOnce(&mut StoreData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let out = {
            let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
            let mut next = guard.clone();
            let out = edit(&mut next)?;
            if next == *guard {
                return Ok(out);
            }
            if let Some(path) = &self.path {
                write_atomically(path, &next)?;
            }
            *guard = next;
            out
        };
        self.notify(kind);
        Ok(out)
    }

    fn notify(&self, kind: ChangeKind) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        tracing::debug!(?kind, listeners = listeners.len(), "store change committed");
        for listener in listeners {
            listener.on_change(kind);
        }
    }
}

impl ConfigSource for RecordStore {
    fn load_active_body_configs(&self) -> Result<Vec<BodyConfig>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data
            .pucks
            .iter()
            .filter(|p| p.active)
            .map(PuckRecord::to_config)
            .collect())
    }

    fn load_settings(&self) -> Result<WorldSettings, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        settings_from_records(&data.settings)
    }
}

fn write_atomically(path: &Path, data: &StoreData) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    serde_json::to_writer_pretty(std::fs::File::create(&tmp)?, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
