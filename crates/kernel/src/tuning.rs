use serde::{Deserialize, Serialize};

/// Coefficients translating store-level settings into simulation units.
///
/// Settings and tap forces are expressed in the small "per step" numbers
/// the record store and clients use; the simulation runs in world units
/// per second. These factors bridge the two and can be overridden from
/// the server config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsTuning {
    /// Settings gravity of 1.0 becomes this many world units/s².
    pub gravity_scale: f32,
    /// Edge-pull acceleration (world units/s²) at the left/right edge per unit
    /// of `arch_gravity`. Kept small so the pull reads as a gentle drift.
    pub edge_pull_scale: f32,
    /// Tap force of 1.0 becomes a linear impulse of this magnitude.
    pub impulse_scale: f32,
    /// New bodies get a velocity uniformly drawn from `[-spawn_speed, spawn_speed]` per axis.
    pub spawn_speed: f32,
    pub wall_thickness: f32,
    pub wall_restitution: f32,
    pub wall_friction: f32,
}

impl Default for PhysicsTuning {
    fn default() -> Self {
        Self {
            gravity_scale: 1000.0,
            edge_pull_scale: 100.0,
            impulse_scale: 10_000.0,
            spawn_speed: 90.0,
            wall_thickness: 50.0,
            wall_restitution: 0.95,
            wall_friction: 0.0,
        }
    }
}

impl PhysicsTuning {
    /// First coefficient that is negative or not finite, by name.
    ///
    /// `wall_thickness` must also be non-zero.
    pub fn invalid_field(&self) -> Option<(&'static str, f32)> {
        [
            ("gravity_scale", self.gravity_scale),
            ("edge_pull_scale", self.edge_pull_scale),
            ("impulse_scale", self.impulse_scale),
            ("spawn_speed", self.spawn_speed),
            ("wall_thickness", self.wall_thickness),
            ("wall_restitution", self.wall_restitution),
            ("wall_friction", self.wall_friction),
        ]
        .into_iter()
        .find(|&(name, v)| !v.is_finite() || v < 0.0 || (name == "wall_thickness" && v == 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_field_names_the_offender() {
        assert_eq!(PhysicsTuning::default().invalid_field(), None);
        let t = PhysicsTuning {
            wall_thickness: 0.0,
            ..PhysicsTuning::default()
        };
        assert_eq!(t.invalid_field(), Some(("wall_thickness", 0.0)));
        let t = PhysicsTuning {
            impulse_scale: -1.0,
            ..PhysicsTuning::default()
        };
        assert_eq!(t.invalid_field().map(|(name, _)| name), Some("impulse_scale"));
        let t = PhysicsTuning {
            gravity_scale: f32::NAN,
            ..PhysicsTuning::default()
        };
        assert_eq!(t.invalid_field().map(|(name, _)| name), Some("gravity_scale"));
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let t: PhysicsTuning = serde_json::from_str(r#"{"edge_pull_scale": 5.0}"#).unwrap();
        assert_eq!(t.edge_pull_scale, 5.0);
        assert_eq!(t.gravity_scale, PhysicsTuning::default().gravity_scale);
    }
}
