//! Thin wrapper over the rapier2d pipeline.
//!
//! Owns every rapier structure so the world store only deals in body
//! handles and glam vectors. Walls are fixed bodies with cuboid colliders
//! placed just outside the playfield.

use arena_common::{WorldSettings, WorldSize};
use glam::Vec2;
use rapier2d::prelude::*;

use crate::tuning::PhysicsTuning;

/// Material properties applied to every puck collider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Material {
    pub friction: f32,
    pub restitution: f32,
    pub linear_damping: f32,
}

impl Material {
    /// Derive puck material from settings. Air friction is a per-step
    /// velocity loss, so it scales with the step rate to become a damping rate.
    pub fn from_settings(settings: &WorldSettings, step_rate_hz: f32) -> Self {
        Self {
            friction: settings.friction,
            restitution: settings.restitution,
            linear_damping: settings.air_friction * step_rate_hz,
        }
    }
}

/// Snapshot of one rigid body's dynamic state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Kinematics {
    pub position: Vec2,
    pub velocity: Vec2,
    pub angle: f32,
}

pub(crate) struct PhysicsBackend {
    gravity: Vector<Real>,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: BroadPhaseBvh,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    walls: Vec<RigidBodyHandle>,
}

impl PhysicsBackend {
    pub fn new(gravity: Vec2, dt: f32) -> Self {
        let params = IntegrationParameters {
            dt,
            ..IntegrationParameters::default()
        };
        Self {
            gravity: vector![gravity.x, gravity.y],
            params,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            walls: Vec::new(),
        }
    }

    pub fn dt(&self) -> f32 {
        self.params.dt
    }

    #[cfg(test)]
    pub fn gravity(&self) -> Vec2 {
        Vec2::new(self.gravity.x, self.gravity.y)
    }

    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.gravity = vector![gravity.x, gravity.y];
    }

    /// Replace the four boundary walls with walls hugging `size`.
    pub fn rebuild_walls(&mut self, size: WorldSize, tuning: &PhysicsTuning) {
        for handle in std::mem::take(&mut self.walls) {
            self.remove(handle);
        }

        let t = tuning.wall_thickness;
        let half_t = t / 2.0;
        let (w, h) = (size.width, size.height);
        // (centre, half extents): top, bottom, left, right.
        let specs = [
            (Vec2::new(w / 2.0, -half_t), Vec2::new(w / 2.0 + t, half_t)),
            (Vec2::new(w / 2.0, h + half_t), Vec2::new(w / 2.0 + t, half_t)),
            (Vec2::new(-half_t, h / 2.0), Vec2::new(half_t, h / 2.0 + t)),
            (Vec2::new(w + half_t, h / 2.0), Vec2::new(half_t, h / 2.0 + t)),
        ];
        for (center, half) in specs {
            let body = RigidBodyBuilder::fixed()
                .translation(vector![center.x, center.y])
                .build();
            let handle = self.bodies.insert(body);
            let collider = ColliderBuilder::cuboid(half.x, half.y)
                .restitution(tuning.wall_restitution)
                .friction(tuning.wall_friction)
                .build();
            self.colliders
                .insert_with_parent(collider, handle, &mut self.bodies);
            self.walls.push(handle);
        }
    }

    pub fn insert_ball(
        &mut self,
        position: Vec2,
        velocity: Vec2,
        radius: f32,
        mass: f32,
        material: Material,
    ) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![position.x, position.y])
            .linvel(vector![velocity.x, velocity.y])
            .linear_damping(material.linear_damping)
            .ccd_enabled(true)
            .build();
        let handle = self.bodies.insert(body);
        let collider = ColliderBuilder::ball(radius)
            .mass(mass)
            .friction(material.friction)
            .restitution(material.restitution)
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        // Impulses applied before the first step need the mass in place.
        if let Some(body) = self.bodies.get_mut(handle) {
            body.recompute_mass_properties_from_colliders(&self.colliders);
        }
        handle
    }

    /// Remove a body together with its colliders. Returns false if the handle is stale.
    pub fn remove(&mut self, handle: RigidBodyHandle) -> bool {
        self.bodies
            .remove(
                handle,
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some()
    }

    pub fn kinematics(&self, handle: RigidBodyHandle) -> Option<Kinematics> {
        let body = self.bodies.get(handle)?;
        let t = body.translation();
        let v = body.linvel();
        Some(Kinematics {
            position: Vec2::new(t.x, t.y),
            velocity: Vec2::new(v.x, v.y),
            angle: body.rotation().angle(),
        })
    }

    pub fn mass(&self, handle: RigidBodyHandle) -> Option<f32> {
        self.bodies.get(handle).map(|b| b.mass())
    }

    pub fn apply_impulse(&mut self, handle: RigidBodyHandle, impulse: Vec2) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.apply_impulse(vector![impulse.x, impulse.y], true);
        }
    }

    /// Set the persistent force for the coming step. Forces accumulate in
    /// rapier until reset, so callers set rather than add.
    pub fn set_force(&mut self, handle: RigidBodyHandle, force: Vec2) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.reset_forces(false);
            if force != Vec2::ZERO {
                body.add_force(vector![force.x, force.y], true);
            }
        }
    }

    pub fn set_position(&mut self, handle: RigidBodyHandle, position: Vec2) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_translation(vector![position.x, position.y], true);
        }
    }

    pub fn set_velocity(&mut self, handle: RigidBodyHandle, velocity: Vec2) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_linvel(vector![velocity.x, velocity.y], true);
        }
    }

    /// Reset a body to a resting pose.
    pub fn reset_body(&mut self, handle: RigidBodyHandle, position: Vec2) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.reset_forces(false);
            body.set_translation(vector![position.x, position.y], false);
            body.set_rotation(Rotation::identity(), false);
            body.set_linvel(vector![0.0, 0.0], false);
            body.set_angvel(0.0, true);
        }
    }

    /// Re-apply material properties to an existing body and its colliders.
    pub fn set_material(&mut self, handle: RigidBodyHandle, material: Material) {
        let Some(body) = self.bodies.get_mut(handle) else {
            return;
        };
        body.set_linear_damping(material.linear_damping);
        for collider in body.colliders().to_vec() {
            if let Some(c) = self.colliders.get_mut(collider) {
                c.set_friction(material.friction);
                c.set_restitution(material.restitution);
            }
        }
    }

    /// Integrate one timestep: gravity, damping, contacts, walls.
    pub fn step(&mut self) {
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> Material {
        Material {
            friction: 0.0,
            restitution: 1.0,
            linear_damping: 0.0,
        }
    }

    #[test]
    fn ball_moves_under_velocity() {
        let mut p = PhysicsBackend::new(Vec2::ZERO, 1.0 / 60.0);
        p.rebuild_walls(WorldSize::new(1000.0, 1000.0), &PhysicsTuning::default());
        let h = p.insert_ball(
            Vec2::new(500.0, 500.0),
            Vec2::new(60.0, 0.0),
            10.0,
            1.0,
            material(),
        );
        p.step();
        let k = p.kinematics(h).unwrap();
        assert!(k.position.x > 500.0);
        assert!((k.position.y - 500.0).abs() < 1e-3);
    }

    #[test]
    fn remove_is_complete() {
        let mut p = PhysicsBackend::new(Vec2::ZERO, 1.0 / 60.0);
        let h = p.insert_ball(Vec2::ZERO, Vec2::ZERO, 5.0, 1.0, material());
        assert!(p.remove(h));
        assert!(p.kinematics(h).is_none());
        assert!(!p.remove(h));
    }

    #[test]
    fn impulse_changes_velocity_by_impulse_over_mass() {
        let mut p = PhysicsBackend::new(Vec2::ZERO, 1.0 / 60.0);
        let h = p.insert_ball(Vec2::ZERO, Vec2::ZERO, 5.0, 2.0, material());
        p.apply_impulse(h, Vec2::new(10.0, 0.0));
        let v = p.kinematics(h).unwrap().velocity;
        assert!((v.x - 5.0).abs() < 1e-3, "vx = {}", v.x);
    }

    #[test]
    fn material_update_keeps_velocity() {
        let mut p = PhysicsBackend::new(Vec2::ZERO, 1.0 / 60.0);
        let h = p.insert_ball(Vec2::ZERO, Vec2::new(3.0, 4.0), 5.0, 1.0, material());
        p.set_material(
            h,
            Material {
                friction: 0.5,
                restitution: 0.1,
                linear_damping: 2.0,
            },
        );
        assert_eq!(p.kinematics(h).unwrap().velocity, Vec2::new(3.0, 4.0));
    }
}
