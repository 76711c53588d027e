//! Stored record shapes and the settings key/value codec.

use std::fmt;
use std::str::FromStr;

use arena_common::{
    BodyConfig, BodyId, DEFAULT_COLOR, DEFAULT_DIAMETER, DEFAULT_MASS, SettingsPatch,
    WorldSettings,
};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// A stored puck. Only active pucks are simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuckRecord {
    pub id: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default = "default_size")]
    pub size: f32,
    #[serde(default = "default_mass")]
    pub mass: f32,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_color() -> String {
    DEFAULT_COLOR.to_owned()
}

fn default_size() -> f32 {
    DEFAULT_DIAMETER
}

fn default_mass() -> f32 {
    DEFAULT_MASS
}

fn default_active() -> bool {
    true
}

impl PuckRecord {
    /// A new active puck with a fresh random id and default looks.
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            color: default_color(),
            logo_url: None,
            size: default_size(),
            mass: default_mass(),
            label: None,
            active: true,
        }
    }

    pub fn to_config(&self) -> BodyConfig {
        BodyConfig {
            id: BodyId::new(self.id.clone()),
            color: self.color.clone(),
            logo_ref: self.logo_url.clone(),
            diameter: self.size,
            mass: self.mass,
            label: self.label.clone(),
        }
    }
}

impl Default for PuckRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// A stored setting: string key, string value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingRecord {
    pub key: String,
    pub value: String,
}

impl SettingRecord {
    pub fn new(key: SettingKey, value: impl ToString) -> Self {
        Self {
            key: key.as_str().to_owned(),
            value: value.to_string(),
        }
    }
}

/// The known setting keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    GravityX,
    GravityY,
    Friction,
    Restitution,
    AirFriction,
    MaxPucks,
    ArchGravity,
}

impl SettingKey {
    pub const ALL: [SettingKey; 7] = [
        Self::GravityX,
        Self::GravityY,
        Self::Friction,
        Self::Restitution,
        Self::AirFriction,
        Self::MaxPucks,
        Self::ArchGravity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GravityX => "gravity_x",
            Self::GravityY => "gravity_y",
            Self::Friction => "friction",
            Self::Restitution => "restitution",
            Self::AirFriction => "air_friction",
            Self::MaxPucks => "max_pucks",
            Self::ArchGravity => "arch_gravity",
        }
    }

    /// Parse `value` and write it into `patch`.
    fn set(&self, patch: &mut SettingsPatch, value: &str) -> Result<(), StoreError> {
        let invalid = || StoreError::InvalidValue {
            key: self.as_str().to_owned(),
            value: value.to_owned(),
        };
        let float = || value.trim().parse::<f32>().map_err(|_| invalid());
        match self {
            Self::GravityX => patch.gravity_x = Some(float()?),
            Self::GravityY => patch.gravity_y = Some(float()?),
            Self::Friction => patch.friction = Some(float()?),
            Self::Restitution => patch.restitution = Some(float()?),
            Self::AirFriction => patch.air_friction = Some(float()?),
            Self::ArchGravity => patch.arch_gravity = Some(float()?),
            Self::MaxPucks => {
                patch.max_pucks = Some(value.trim().parse::<u32>().map_err(|_| invalid())?)
            }
        }
        Ok(())
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| StoreError::UnknownKey(s.to_owned()))
    }
}

/// Build a patch from stored records. Unknown keys are skipped with a warning.
pub fn patch_from_records(records: &[SettingRecord]) -> Result<SettingsPatch, StoreError> {
    let mut patch = SettingsPatch::default();
    for record in records {
        match record.key.parse::<SettingKey>() {
            Ok(key) => key.set(&mut patch, &record.value)?,
            Err(_) => tracing::warn!(key = %record.key, "ignoring unknown setting"),
        }
    }
    Ok(patch)
}

/// Full settings: defaults overlaid with the stored records.
pub fn settings_from_records(records: &[SettingRecord]) -> Result<WorldSettings, StoreError> {
    let mut settings = WorldSettings::default();
    settings.apply(&patch_from_records(records)?);
    Ok(settings)
}

/// One record per field of `settings`.
pub fn records_from_settings(settings: &WorldSettings) -> Vec<SettingRecord> {
    vec![
        SettingRecord::new(SettingKey::GravityX, settings.gravity_x),
        SettingRecord::new(SettingKey::GravityY, settings.gravity_y),
        SettingRecord::new(SettingKey::Friction, settings.friction),
        SettingRecord::new(SettingKey::Restitution, settings.restitution),
        SettingRecord::new(SettingKey::AirFriction, settings.air_friction),
        SettingRecord::new(SettingKey::MaxPucks, settings.max_pucks),
        SettingRecord::new(SettingKey::ArchGravity, settings.arch_gravity),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_round_trip_through_strings() {
        for key in SettingKey::ALL {
            assert_eq!(key.as_str().parse::<SettingKey>().unwrap(), key);
        }
        assert!(matches!(
            "gravity_z".parse::<SettingKey>(),
            Err(StoreError::UnknownKey(_))
        ));
    }

    #[test]
    fn records_overlay_defaults() {
        let records = vec![
            SettingRecord::new(SettingKey::GravityY, "0.5"),
            SettingRecord::new(SettingKey::MaxPucks, " 12 "),
            SettingRecord {
                key: "theme".into(),
                value: "dark".into(),
            },
        ];
        let s = settings_from_records(&records).unwrap();
        assert_eq!(s.gravity_y, 0.5);
        assert_eq!(s.max_pucks, 12);
        assert_eq!(s.friction, WorldSettings::default().friction);
    }

    #[test]
    fn unparsable_value_is_error() {
        let records = vec![SettingRecord::new(SettingKey::MaxPucks, "lots")];
        assert!(matches!(
            patch_from_records(&records),
            Err(StoreError::InvalidValue { .. })
        ));
    }

    #[test]
    fn arch_gravity_is_read() {
        let records = vec![SettingRecord::new(SettingKey::ArchGravity, "2")];
        assert_eq!(patch_from_records(&records).unwrap().arch_gravity, Some(2.0));
    }

    #[test]
    fn settings_records_cover_every_key() {
        let records = records_from_settings(&WorldSettings::default());
        assert_eq!(records.len(), SettingKey::ALL.len());
        assert_eq!(
            settings_from_records(&records).unwrap(),
            WorldSettings::default()
        );
    }

    #[test]
    fn puck_record_defaults_from_sparse_json() {
        let r: PuckRecord = serde_json::from_str(r#"{"id":"p1"}"#).unwrap();
        assert!(r.active);
        assert_eq!(r.size, DEFAULT_DIAMETER);
        let cfg = r.to_config();
        assert_eq!(cfg.id.as_str(), "p1");
        assert_eq!(cfg.color, DEFAULT_COLOR);
    }

    #[test]
    fn new_records_get_unique_ids() {
        assert_ne!(PuckRecord::new().id, PuckRecord::new().id);
    }
}
