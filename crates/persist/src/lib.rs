//! Persistence boundary: puck and settings records owned by the collaborator store.
//!
//! The simulation never reads storage from its tick loop. The store commits
//! a write, then notifies listeners with the kind of change; listeners pull
//! the fresh records through [`ConfigSource`].
//!
//! # Invariants
//! - A change is announced only after it has been durably written.
//! - Only active pucks are reported as body configs.

mod records;
mod store;

use arena_common::{BodyConfig, WorldSettings};

pub use records::{
    PuckRecord, SettingKey, SettingRecord, patch_from_records, records_from_settings,
    settings_from_records,
};
pub use store::{RecordStore, StoreData, StoreError};

/// What a committed write touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Bodies,
    Settings,
}

/// Read side of the collaborator store.
pub trait ConfigSource: Send + Sync {
    fn load_active_body_configs(&self) -> Result<Vec<BodyConfig>, StoreError>;
    fn load_settings(&self) -> Result<WorldSettings, StoreError>;
}

/// Notified after the store commits a write.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, kind: ChangeKind);
}
