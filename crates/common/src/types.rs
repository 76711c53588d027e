use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a puck, assigned by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodyId(pub String);

impl BodyId {
    /// Wrap a store-assigned id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BodyId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Default puck colour.
pub const DEFAULT_COLOR: &str = "#3B82F6";
/// Default puck diameter in world units.
pub const DEFAULT_DIAMETER: f32 = 30.0;
/// Default puck mass.
pub const DEFAULT_MASS: f32 = 1.0;

/// Visual and identity attributes of a puck. Only changed through config sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyConfig {
    pub id: BodyId,
    pub color: String,
    pub logo_ref: Option<String>,
    pub diameter: f32,
    pub mass: f32,
    pub label: Option<String>,
}

impl BodyConfig {
    /// A config with default colour, size and mass.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: BodyId::new(id),
            color: DEFAULT_COLOR.to_owned(),
            logo_ref: None,
            diameter: DEFAULT_DIAMETER,
            mass: DEFAULT_MASS,
            label: None,
        }
    }

    pub fn with_diameter(mut self, diameter: f32) -> Self {
        self.diameter = diameter;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    /// Half the diameter.
    pub fn radius(&self) -> f32 {
        self.diameter / 2.0
    }
}

/// Dynamic attributes of a puck, as sent on the wire.
///
/// Velocity is in world units per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyState {
    pub id: BodyId,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub angle: f32,
}

impl BodyState {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn velocity(&self) -> Vec2 {
        Vec2::new(self.vx, self.vy)
    }

    /// Velocity magnitude in world units per second.
    pub fn speed(&self) -> f32 {
        self.velocity().length()
    }

    /// Whether every numeric field is finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.vx.is_finite()
            && self.vy.is_finite()
            && self.angle.is_finite()
    }
}

/// Shared simulation settings. One value per world, replaced in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldSettings {
    pub gravity_x: f32,
    pub gravity_y: f32,
    pub friction: f32,
    pub restitution: f32,
    pub air_friction: f32,
    /// Edge-pull strength. 0 disables it.
    pub arch_gravity: f32,
    pub max_pucks: u32,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            gravity_x: 0.0,
            gravity_y: 0.0,
            friction: 0.005,
            restitution: 0.95,
            air_friction: 0.0005,
            arch_gravity: 0.0,
            max_pucks: 100,
        }
    }
}

impl WorldSettings {
    pub fn gravity(&self) -> Vec2 {
        Vec2::new(self.gravity_x, self.gravity_y)
    }

    /// Merge `patch` into these settings.
    ///
    /// Returns the subset of the patch whose values actually differ from
    /// the previous settings.
    pub fn apply(&mut self, patch: &SettingsPatch) -> SettingsPatch {
        let mut changed = SettingsPatch::default();
        merge_field(&mut self.gravity_x, patch.gravity_x, &mut changed.gravity_x);
        merge_field(&mut self.gravity_y, patch.gravity_y, &mut changed.gravity_y);
        merge_field(&mut self.friction, patch.friction, &mut changed.friction);
        merge_field(
            &mut self.restitution,
            patch.restitution,
            &mut changed.restitution,
        );
        merge_field(
            &mut self.air_friction,
            patch.air_friction,
            &mut changed.air_friction,
        );
        merge_field(
            &mut self.arch_gravity,
            patch.arch_gravity,
            &mut changed.arch_gravity,
        );
        merge_field(&mut self.max_pucks, patch.max_pucks, &mut changed.max_pucks);
        changed
    }

    /// Patch that sets every field to this value.
    pub fn to_patch(&self) -> SettingsPatch {
        SettingsPatch {
            gravity_x: Some(self.gravity_x),
            gravity_y: Some(self.gravity_y),
            friction: Some(self.friction),
            restitution: Some(self.restitution),
            air_friction: Some(self.air_friction),
            arch_gravity: Some(self.arch_gravity),
            max_pucks: Some(self.max_pucks),
        }
    }
}

fn merge_field<T: Copy + PartialEq>(slot: &mut T, incoming: Option<T>, changed: &mut Option<T>) {
    if let Some(value) = incoming {
        // NaN never compares equal, so a NaN write is always reported as a change.
        if *slot != value {
            *slot = value;
            *changed = Some(value);
        }
    }
}

/// Partial settings update. Absent fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gravity_x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gravity_y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friction: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restitution: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_friction: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch_gravity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pucks: Option<u32>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn touches_gravity(&self) -> bool {
        self.gravity_x.is_some() || self.gravity_y.is_some()
    }

    /// Whether the patch changes per-body material properties.
    pub fn touches_materials(&self) -> bool {
        self.friction.is_some() || self.restitution.is_some() || self.air_friction.is_some()
    }
}

/// Extents of the playfield in world units. Origin is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldSize {
    pub width: f32,
    pub height: f32,
}

impl Default for WorldSize {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
        }
    }
}

impl WorldSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.width / 2.0, self.height / 2.0)
    }

    /// Clamp a circle centre so the whole circle lies inside the world.
    ///
    /// When the circle is wider than the world on an axis the centre is
    /// placed on that axis' midpoint.
    pub fn clamp_center(&self, pos: Vec2, radius: f32) -> Vec2 {
        Vec2::new(
            clamp_axis(pos.x, radius, self.width),
            clamp_axis(pos.y, radius, self.height),
        )
    }

    pub fn contains_circle(&self, pos: Vec2, radius: f32) -> bool {
        pos.x >= radius
            && pos.x <= self.width - radius
            && pos.y >= radius
            && pos.y <= self.height - radius
    }
}

fn clamp_axis(value: f32, radius: f32, extent: f32) -> f32 {
    let lo = radius;
    let hi = extent - radius;
    if lo > hi {
        extent / 2.0
    } else {
        value.clamp(lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults_are_air_hockey() {
        let s = WorldSettings::default();
        assert_eq!(s.gravity(), Vec2::ZERO);
        assert_eq!(s.max_pucks, 100);
        assert_eq!(s.arch_gravity, 0.0);
    }

    #[test]
    fn apply_reports_only_changed_fields() {
        let mut s = WorldSettings::default();
        let patch = SettingsPatch {
            friction: Some(0.5),
            restitution: Some(s.restitution),
            ..SettingsPatch::default()
        };
        let changed = s.apply(&patch);
        assert_eq!(s.friction, 0.5);
        assert_eq!(changed.friction, Some(0.5));
        assert_eq!(changed.restitution, None);
        assert!(changed.touches_materials());
        assert!(!changed.touches_gravity());
    }

    #[test]
    fn empty_patch_changes_nothing() {
        let mut s = WorldSettings::default();
        let before = s;
        assert!(s.apply(&SettingsPatch::default()).is_empty());
        assert_eq!(s, before);
    }

    #[test]
    fn patch_serializes_only_present_fields() {
        let patch = SettingsPatch {
            gravity_y: Some(1.0),
            ..SettingsPatch::default()
        };
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"gravityY":1.0}"#);
    }

    #[test]
    fn body_config_uses_camel_case() {
        let mut cfg = BodyConfig::new("a");
        cfg.logo_ref = Some("logo.png".into());
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["id"], "a");
        assert_eq!(json["logoRef"], "logo.png");
        assert_eq!(cfg.radius(), 15.0);
    }

    #[test]
    fn clamp_center_keeps_circle_inside() {
        let size = WorldSize::new(100.0, 50.0);
        let p = size.clamp_center(Vec2::new(-10.0, 80.0), 5.0);
        assert_eq!(p, Vec2::new(5.0, 45.0));
        assert!(size.contains_circle(p, 5.0));
    }

    #[test]
    fn clamp_center_oversized_circle_goes_to_midpoint() {
        let size = WorldSize::new(10.0, 10.0);
        let p = size.clamp_center(Vec2::new(0.0, 0.0), 20.0);
        assert_eq!(p, Vec2::new(5.0, 5.0));
    }

    #[test]
    fn body_state_speed() {
        let s = BodyState {
            id: "a".into(),
            x: 0.0,
            y: 0.0,
            vx: 3.0,
            vy: 4.0,
            angle: 0.0,
        };
        assert_eq!(s.speed(), 5.0);
        assert!(s.is_finite());
    }
}
