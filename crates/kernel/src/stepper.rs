//! Fixed-timestep stepping of the world.
//!
//! Each step layers the edge-pull field on top of rapier's integration,
//! then enforces containment: a body never leaves the walls and never
//! carries a non-finite value into a snapshot.

use std::time::Duration;

use glam::Vec2;

use crate::error::WorldError;
use crate::world::{World, saturate_acceleration};

/// Horizontal edge-pull force for a body.
///
/// `acceleration` is the pull at either edge. The force is zero at the
/// centre line, grows linearly towards either edge and points away from
/// the centre.
pub fn edge_pull_force(x: f32, center_x: f32, acceleration: f32, mass: f32) -> f32 {
    if center_x <= 0.0 {
        return 0.0;
    }
    let normalized = (x - center_x) / center_x;
    normalized * acceleration * mass
}

/// Interval between steps for a given rate. Rates too small to express
/// saturate to [`Duration::MAX`].
pub fn step_interval(rate_hz: f32) -> Duration {
    Duration::try_from_secs_f64(1.0 / f64::from(rate_hz)).unwrap_or(Duration::MAX)
}

impl World {
    /// Advance the simulation by one fixed timestep.
    ///
    /// Out-of-range gravity and edge pull are saturated, never fatal. Fails
    /// only when the timestep itself is not a positive finite number.
    pub fn step(&mut self) -> Result<(), WorldError> {
        let _span = tracing::trace_span!("world_step", step = self.steps).entered();

        if !self.physics.dt().is_finite() || self.physics.dt() <= 0.0 {
            return Err(WorldError::NonFiniteSettings("timestep"));
        }

        self.apply_edge_pull();
        self.physics.step();
        self.contain_bodies();
        self.steps += 1;
        Ok(())
    }

    fn apply_edge_pull(&mut self) {
        let strength =
            saturate_acceleration(self.settings.arch_gravity * self.tuning.edge_pull_scale);
        let center_x = self.size.center().x;
        for entry in self.bodies.values() {
            let force = if strength > 0.0 {
                let Some(k) = self.physics.kinematics(entry.handle) else {
                    continue;
                };
                let mass = self.physics.mass(entry.handle).unwrap_or(entry.config.mass);
                Vec2::new(
                    edge_pull_force(k.position.x, center_x, strength, mass),
                    0.0,
                )
            } else {
                Vec2::ZERO
            };
            self.physics.set_force(entry.handle, force);
        }
    }

    /// Clamp escaped bodies back inside and reset non-finite ones.
    fn contain_bodies(&mut self) {
        let size = self.size;
        let restitution = self.tuning.wall_restitution;
        for (id, entry) in &self.bodies {
            let Some(k) = self.physics.kinematics(entry.handle) else {
                continue;
            };
            let radius = entry.config.radius();

            if !(k.position.is_finite() && k.velocity.is_finite() && k.angle.is_finite()) {
                tracing::warn!(%id, "non-finite body state, resetting");
                let fallback = if k.position.is_finite() {
                    k.position
                } else {
                    size.center()
                };
                self.physics
                    .reset_body(entry.handle, size.clamp_center(fallback, radius));
                continue;
            }

            let clamped = size.clamp_center(k.position, radius);
            if clamped == k.position {
                continue;
            }
            // Bounce the component that was carrying the body out.
            let mut v = k.velocity;
            if (clamped.x - k.position.x) * v.x < 0.0 {
                v.x = -v.x * restitution;
            }
            if (clamped.y - k.position.y) * v.y < 0.0 {
                v.y = -v.y * restitution;
            }
            self.physics.set_position(entry.handle, clamped);
            self.physics.set_velocity(entry.handle, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldOptions;
    use crate::PhysicsTuning;
    use arena_common::{BodyConfig, BodyId, BodyState, SettingsPatch, WorldSettings, WorldSize};

    #[test]
    fn edge_pull_points_outward() {
        assert_eq!(edge_pull_force(960.0, 960.0, 100.0, 1.0), 0.0);
        assert!(edge_pull_force(1920.0, 960.0, 100.0, 1.0) > 0.0);
        assert!(edge_pull_force(0.0, 960.0, 100.0, 1.0) < 0.0);
        assert_eq!(edge_pull_force(1920.0, 960.0, 200.0, 3.0), 600.0);
    }

    #[test]
    fn interval_matches_rate() {
        assert_eq!(step_interval(50.0), Duration::from_millis(20));
        assert_eq!(step_interval(1e-20), Duration::MAX);
    }

    #[test]
    fn step_counts() {
        let mut w = World::with_seed(1);
        w.step().unwrap();
        w.step().unwrap();
        assert_eq!(w.steps(), 2);
    }

    #[test]
    fn bodies_stay_inside_walls() {
        let mut w = World::new(WorldOptions {
            size: WorldSize::new(400.0, 300.0),
            seed: Some(9),
            tuning: PhysicsTuning {
                spawn_speed: 2000.0,
                ..PhysicsTuning::default()
            },
            ..WorldOptions::default()
        });
        for i in 0..30 {
            w.add_body(BodyConfig::new(format!("p{i}")).with_diameter(20.0))
                .unwrap();
        }
        for _ in 0..300 {
            w.step().unwrap();
            for s in w.all_states() {
                assert!(s.is_finite(), "{s:?}");
                assert!(w.size().contains_circle(s.position(), 10.0), "{s:?}");
            }
        }
    }

    #[test]
    fn edge_pull_drifts_bodies_outward() {
        let mut w = World::new(WorldOptions {
            seed: Some(2),
            settings: WorldSettings {
                arch_gravity: 5.0,
                air_friction: 0.0,
                ..WorldSettings::default()
            },
            tuning: PhysicsTuning {
                spawn_speed: 0.0,
                ..PhysicsTuning::default()
            },
            ..WorldOptions::default()
        });
        w.add_body(BodyConfig::new("a")).unwrap();
        let handle = w.bodies[&BodyId::new("a")].handle;
        w.physics.set_position(handle, Vec2::new(1400.0, 540.0));
        for _ in 0..10 {
            w.step().unwrap();
        }
        let s = w.state(&"a".into()).unwrap();
        assert!(s.vx > 0.0, "{s:?}");
        assert!(s.vy.abs() < 1e-3, "{s:?}");
    }

    #[test]
    fn disabled_edge_pull_leaves_resting_body() {
        let mut w = World::new(WorldOptions {
            seed: Some(2),
            tuning: PhysicsTuning {
                spawn_speed: 0.0,
                ..PhysicsTuning::default()
            },
            ..WorldOptions::default()
        });
        w.add_body(BodyConfig::new("a")).unwrap();
        let before = w.state(&"a".into()).unwrap();
        w.step().unwrap();
        let after = w.state(&"a".into()).unwrap();
        assert_eq!(after.speed(), 0.0);
        assert_eq!(after.position(), before.position());
    }

    #[test]
    fn out_of_range_settings_keep_stepping() {
        let mut w = World::with_seed(3);
        for i in 0..8 {
            w.add_body(BodyConfig::new(format!("p{i}"))).unwrap();
        }
        w.update_settings(&SettingsPatch {
            gravity_y: Some(1e36),
            arch_gravity: Some(f32::MAX),
            ..SettingsPatch::default()
        });
        for _ in 0..60 {
            w.step().unwrap();
            for s in w.all_states() {
                assert!(s.is_finite(), "{s:?}");
                assert!(w.size().contains_circle(s.position(), 15.0), "{s:?}");
            }
        }

        w.update_settings(&SettingsPatch {
            gravity_x: Some(f32::NAN),
            gravity_y: Some(f32::NEG_INFINITY),
            arch_gravity: Some(f32::NAN),
            ..SettingsPatch::default()
        });
        for _ in 0..10 {
            w.step().unwrap();
        }
        assert!(w.all_states().iter().all(BodyState::is_finite));
    }

    #[test]
    fn zero_step_rate_is_a_step_fault() {
        let mut w = World::new(WorldOptions {
            step_rate_hz: 0.0,
            ..WorldOptions::default()
        });
        assert_eq!(w.step(), Err(WorldError::NonFiniteSettings("timestep")));
        assert_eq!(w.steps(), 0);
    }

    #[test]
    fn non_finite_material_never_reaches_snapshot() {
        let mut w = World::with_seed(4);
        for i in 0..5 {
            w.add_body(BodyConfig::new(format!("p{i}"))).unwrap();
        }
        w.update_settings(&SettingsPatch {
            air_friction: Some(f32::INFINITY),
            ..SettingsPatch::default()
        });
        for _ in 0..5 {
            w.step().unwrap();
            assert!(w.all_states().iter().all(|s| s.is_finite()));
        }
    }
}
