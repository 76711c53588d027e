//! Tap handling: normalized screen coordinates to world impulses.

use arena_common::{BodyState, WorldSize};
use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::world::World;

/// Radius around a tap, in world units, inside which bodies are pushed.
pub const DEFAULT_TAP_RADIUS: f32 = 150.0;
/// Tap force used when the client does not send one.
pub const DEFAULT_TAP_FORCE: f32 = 0.08;

/// Impulse magnitude for a body `distance` away from the tap.
///
/// `None` outside the radius and at distance zero, where there is no
/// direction to push in.
pub fn impulse_magnitude(distance: f32, radius: f32, max_magnitude: f32) -> Option<f32> {
    if !(distance > 0.0 && distance < radius) {
        return None;
    }
    let falloff = (1.0 - distance / radius).powf(1.5);
    Some(max_magnitude * falloff)
}

/// A tap in normalized coordinates, `(0,0)` top-left, `(1,1)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tap {
    pub x: f32,
    pub y: f32,
    pub force: Option<f32>,
}

impl Tap {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, force: None }
    }

    /// Clamp coordinates into `[0,1]`. `None` if anything is non-finite.
    pub fn sanitized(self) -> Option<Self> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return None;
        }
        let force = match self.force {
            Some(f) if !f.is_finite() => return None,
            other => other,
        };
        Some(Self {
            x: self.x.clamp(0.0, 1.0),
            y: self.y.clamp(0.0, 1.0),
            force,
        })
    }

    /// World coordinates of an already sanitized tap.
    pub fn to_world(&self, size: WorldSize) -> Vec2 {
        Vec2::new(self.x * size.width, self.y * size.height)
    }
}

/// Applies taps to a world with a fixed radius and default force.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InteractionApplier {
    pub radius: f32,
    pub default_force: f32,
}

impl Default for InteractionApplier {
    fn default() -> Self {
        Self {
            radius: DEFAULT_TAP_RADIUS,
            default_force: DEFAULT_TAP_FORCE,
        }
    }
}

impl InteractionApplier {
    pub fn new(radius: f32, default_force: f32) -> Self {
        Self {
            radius,
            default_force,
        }
    }

    /// Apply a sanitized tap. Returns the bodies it pushed.
    pub fn apply(&self, world: &mut World, tap: &Tap) -> Vec<BodyState> {
        let point = tap.to_world(world.size());
        let force = tap.force.unwrap_or(self.default_force);
        world.apply_impulse(point, self.radius, force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldOptions;
    use crate::PhysicsTuning;
    use arena_common::BodyConfig;

    #[test]
    fn magnitude_excludes_zero_and_outside() {
        assert_eq!(impulse_magnitude(0.0, 150.0, 1.0), None);
        assert_eq!(impulse_magnitude(150.0, 150.0, 1.0), None);
        assert_eq!(impulse_magnitude(500.0, 150.0, 1.0), None);
        assert_eq!(impulse_magnitude(f32::NAN, 150.0, 1.0), None);
    }

    #[test]
    fn magnitude_falls_off_monotonically() {
        let mut last = f32::INFINITY;
        for d in [1.0, 10.0, 50.0, 75.0, 100.0, 149.0] {
            let m = impulse_magnitude(d, 150.0, 0.08).unwrap();
            assert!(m > 0.0);
            assert!(m <= last, "d={d}: {m} > {last}");
            last = m;
        }
        let half = impulse_magnitude(75.0, 150.0, 1.0).unwrap();
        assert!((half - 0.5f32.powf(1.5)).abs() < 1e-6);
    }

    #[test]
    fn tap_is_clamped_into_world() {
        let tap = Tap::new(1.5, -0.2).sanitized().unwrap();
        assert_eq!((tap.x, tap.y), (1.0, 0.0));
        let p = tap.to_world(WorldSize::new(1920.0, 1080.0));
        assert_eq!(p, Vec2::new(1920.0, 0.0));
    }

    #[test]
    fn non_finite_tap_is_dropped() {
        assert!(Tap::new(f32::NAN, 0.5).sanitized().is_none());
        assert!(
            Tap {
                x: 0.5,
                y: 0.5,
                force: Some(f32::INFINITY)
            }
            .sanitized()
            .is_none()
        );
    }

    #[test]
    fn applier_uses_world_coordinates() {
        let mut world = World::new(WorldOptions {
            seed: Some(1),
            tuning: PhysicsTuning {
                spawn_speed: 0.0,
                ..PhysicsTuning::default()
            },
            ..WorldOptions::default()
        });
        let state = world.add_body(BodyConfig::new("a")).unwrap();
        let size = world.size();
        // Tap slightly left of the body.
        let tap = Tap::new((state.x - 20.0) / size.width, state.y / size.height);
        let affected = InteractionApplier::default().apply(&mut world, &tap);
        assert_eq!(affected.len(), 1);
        assert!(affected[0].vx > 0.0);
    }
}
