//! Shared data model for the puck arena.
//!
//! # Invariants
//! - `BodyConfig` and `BodyState` are paired by `BodyId`; the kernel enforces it.
//! - Wire names are camelCase.

mod types;

pub use types::{
    BodyConfig, BodyId, BodyState, DEFAULT_COLOR, DEFAULT_DIAMETER, DEFAULT_MASS, SettingsPatch,
    WorldSettings, WorldSize,
};
