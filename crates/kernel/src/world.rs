use std::collections::BTreeMap;
use std::fmt;

use arena_common::{BodyConfig, BodyId, BodyState, SettingsPatch, WorldSettings, WorldSize};
use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rapier2d::prelude::RigidBodyHandle;

use crate::error::WorldError;
use crate::interaction::impulse_magnitude;
use crate::physics::{Material, PhysicsBackend};
use crate::tuning::PhysicsTuning;

/// Default fixed step rate.
pub const DEFAULT_STEP_RATE_HZ: f32 = 60.0;

/// Largest gravity or edge-pull acceleration (world units/s²) the integrator
/// is given. Settings beyond it are saturated.
pub const MAX_ACCELERATION: f32 = 1.0e6;

/// Construction parameters for a [`World`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldOptions {
    pub size: WorldSize,
    pub settings: WorldSettings,
    pub tuning: PhysicsTuning,
    pub step_rate_hz: f32,
    /// Seed for spawn positions/velocities. `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for WorldOptions {
    fn default() -> Self {
        Self {
            size: WorldSize::default(),
            settings: WorldSettings::default(),
            tuning: PhysicsTuning::default(),
            step_rate_hz: DEFAULT_STEP_RATE_HZ,
            seed: None,
        }
    }
}

/// Per-body data: identity/visual config plus the handle of its rigid body.
pub(crate) struct BodyEntry {
    pub config: BodyConfig,
    pub handle: RigidBodyHandle,
}

/// The authoritative puck world.
///
/// Owns the only copy of every body's config and dynamics. Config and
/// rigid body are created and destroyed together; there is no way to
/// reach one without the other.
///
/// Uses BTreeMap so snapshots list bodies in a stable order.
pub struct World {
    pub(crate) bodies: BTreeMap<BodyId, BodyEntry>,
    pub(crate) settings: WorldSettings,
    pub(crate) size: WorldSize,
    pub(crate) tuning: PhysicsTuning,
    pub(crate) step_rate_hz: f32,
    pub(crate) steps: u64,
    pub(crate) physics: PhysicsBackend,
    rng: StdRng,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("bodies", &self.bodies.len())
            .field("settings", &self.settings)
            .field("size", &self.size)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new(WorldOptions::default())
    }
}

impl World {
    /// Build an empty world with walls around `options.size`.
    pub fn new(options: WorldOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let gravity = scaled_gravity(&options.settings, &options.tuning);
        let mut physics = PhysicsBackend::new(gravity, 1.0 / options.step_rate_hz);
        physics.rebuild_walls(options.size, &options.tuning);
        Self {
            bodies: BTreeMap::new(),
            settings: options.settings,
            size: options.size,
            tuning: options.tuning,
            step_rate_hz: options.step_rate_hz,
            steps: 0,
            physics,
            rng,
        }
    }

    /// Create a default-sized world with a fixed spawn seed.
    pub fn with_seed(seed: u64) -> Self {
        Self::new(WorldOptions {
            seed: Some(seed),
            ..WorldOptions::default()
        })
    }

    /// Current settings, as last merged. Out-of-range values are kept as given.
    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    /// Current wall extents.
    pub fn size(&self) -> WorldSize {
        self.size
    }

    pub fn tuning(&self) -> &PhysicsTuning {
        &self.tuning
    }

    /// Fixed steps per second.
    pub fn step_rate_hz(&self) -> f32 {
        self.step_rate_hz
    }

    /// Number of physics steps taken so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Number of simulated bodies.
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Whether `id` is simulated.
    pub fn contains(&self, id: &BodyId) -> bool {
        self.bodies.contains_key(id)
    }

    /// Body ids in snapshot order.
    pub fn ids(&self) -> impl Iterator<Item = &BodyId> {
        self.bodies.keys()
    }

    /// Config of one body.
    pub fn config(&self, id: &BodyId) -> Option<&BodyConfig> {
        self.bodies.get(id).map(|e| &e.config)
    }

    /// All body configs, in id order.
    pub fn configs(&self) -> Vec<BodyConfig> {
        self.bodies.values().map(|e| e.config.clone()).collect()
    }

    /// Fails when one more body would exceed `max_pucks`.
    pub fn check_capacity(&self) -> Result<(), WorldError> {
        let limit = self.settings.max_pucks;
        if self.bodies.len() >= limit as usize {
            return Err(WorldError::CapacityExceeded { limit });
        }
        Ok(())
    }

    /// Add a body, enforcing the `max_pucks` ceiling.
    pub fn add_body(&mut self, config: BodyConfig) -> Result<BodyState, WorldError> {
        if self.bodies.contains_key(&config.id) {
            return Err(WorldError::DuplicateBody(config.id));
        }
        self.check_capacity()?;
        self.insert_body(config)
    }

    /// Add a body without checking the `max_pucks` ceiling.
    ///
    /// Spawns at a uniformly random position that keeps the whole body
    /// inside the walls, with a small random velocity.
    pub fn insert_body(&mut self, config: BodyConfig) -> Result<BodyState, WorldError> {
        if self.bodies.contains_key(&config.id) {
            return Err(WorldError::DuplicateBody(config.id));
        }
        validate_shape(&config)?;

        let radius = config.radius();
        let position = Vec2::new(
            self.spawn_axis(radius, self.size.width),
            self.spawn_axis(radius, self.size.height),
        );
        let s = self.tuning.spawn_speed.abs();
        let velocity = if s > 0.0 {
            Vec2::new(self.rng.gen_range(-s..=s), self.rng.gen_range(-s..=s))
        } else {
            Vec2::ZERO
        };

        let material = Material::from_settings(&self.settings, self.step_rate_hz);
        let handle = self
            .physics
            .insert_ball(position, velocity, radius, config.mass, material);

        tracing::debug!(id = %config.id, x = position.x, y = position.y, "body added");
        let id = config.id.clone();
        self.bodies.insert(id.clone(), BodyEntry { config, handle });
        Ok(self.state(&id).unwrap_or(BodyState {
            id,
            x: position.x,
            y: position.y,
            vx: velocity.x,
            vy: velocity.y,
            angle: 0.0,
        }))
    }

    fn spawn_axis(&mut self, radius: f32, extent: f32) -> f32 {
        let (lo, hi) = (radius, extent - radius);
        if lo >= hi {
            extent / 2.0
        } else {
            self.rng.gen_range(lo..=hi)
        }
    }

    /// Remove a body's config and rigid body together.
    pub fn remove_body(&mut self, id: &BodyId) -> bool {
        match self.bodies.remove(id) {
            Some(entry) => {
                self.physics.remove(entry.handle);
                tracing::debug!(%id, "body removed");
                true
            }
            None => false,
        }
    }

    /// Replace the config of an existing body. Returns whether anything changed.
    ///
    /// Visual fields are swapped in place. A new diameter or mass needs a new
    /// rigid body, so the body is respawned.
    pub fn update_body(&mut self, config: BodyConfig) -> Result<bool, WorldError> {
        let Some(entry) = self.bodies.get_mut(&config.id) else {
            return Ok(false);
        };
        if entry.config == config {
            return Ok(false);
        }
        if entry.config.diameter == config.diameter && entry.config.mass == config.mass {
            entry.config = config;
            return Ok(true);
        }
        validate_shape(&config)?;
        self.remove_body(&config.id);
        self.insert_body(config)?;
        Ok(true)
    }

    /// Remove every body.
    pub fn clear(&mut self) {
        let ids: Vec<BodyId> = self.bodies.keys().cloned().collect();
        for id in &ids {
            self.remove_body(id);
        }
    }

    /// Current dynamics of one body.
    pub fn state(&self, id: &BodyId) -> Option<BodyState> {
        let entry = self.bodies.get(id)?;
        self.entry_state(id, entry)
    }

    fn entry_state(&self, id: &BodyId, entry: &BodyEntry) -> Option<BodyState> {
        let k = self.physics.kinematics(entry.handle)?;
        Some(BodyState {
            id: id.clone(),
            x: k.position.x,
            y: k.position.y,
            vx: k.velocity.x,
            vy: k.velocity.y,
            angle: k.angle,
        })
    }

    /// Snapshot of every body.
    pub fn all_states(&self) -> Vec<BodyState> {
        self.bodies
            .iter()
            .filter_map(|(id, entry)| self.entry_state(id, entry))
            .collect()
    }

    /// Bodies whose speed is strictly greater than `speed_threshold`.
    pub fn changed_states(&self, speed_threshold: f32) -> Vec<BodyState> {
        self.bodies
            .iter()
            .filter_map(|(id, entry)| self.entry_state(id, entry))
            .filter(|s| s.speed() > speed_threshold)
            .collect()
    }

    /// Push every body within `radius` of `point` away from it.
    ///
    /// A body exactly on the point has no direction and is skipped. The
    /// impulse falls off as `(1 - d/r)^1.5`. Returns the affected bodies
    /// after the impulse was applied.
    pub fn apply_impulse(&mut self, point: Vec2, radius: f32, max_magnitude: f32) -> Vec<BodyState> {
        if !point.is_finite() || !radius.is_finite() || !max_magnitude.is_finite() {
            return Vec::new();
        }
        let scale = self.tuning.impulse_scale;
        let mut affected = Vec::new();
        for (id, entry) in &self.bodies {
            let Some(k) = self.physics.kinematics(entry.handle) else {
                continue;
            };
            let offset = k.position - point;
            let distance = offset.length();
            let Some(magnitude) = impulse_magnitude(distance, radius, max_magnitude) else {
                continue;
            };
            let direction = offset / distance;
            self.physics
                .apply_impulse(entry.handle, direction * magnitude * scale);
            affected.push(id.clone());
        }
        affected.iter().filter_map(|id| self.state(id)).collect()
    }

    /// Merge a settings patch. Returns the fields that actually changed.
    ///
    /// Gravity goes straight to the integrator, saturated to
    /// [`MAX_ACCELERATION`]; material changes are pushed to every existing
    /// body. Positions and velocities are untouched.
    pub fn update_settings(&mut self, patch: &SettingsPatch) -> SettingsPatch {
        let changed = self.settings.apply(patch);
        if changed.touches_gravity() {
            self.physics
                .set_gravity(scaled_gravity(&self.settings, &self.tuning));
        }
        if changed.touches_materials() {
            let material = Material::from_settings(&self.settings, self.step_rate_hz);
            for entry in self.bodies.values() {
                self.physics.set_material(entry.handle, material);
            }
        }
        if !changed.is_empty() {
            tracing::debug!(?changed, "settings updated");
        }
        changed
    }

    /// Replace the settings wholesale.
    pub fn replace_settings(&mut self, settings: WorldSettings) -> SettingsPatch {
        self.update_settings(&settings.to_patch())
    }

    /// Move the walls to the new extents and pull every body back inside.
    pub fn resize_world(&mut self, size: WorldSize) {
        self.size = size;
        self.physics.rebuild_walls(size, &self.tuning);
        for entry in self.bodies.values() {
            let Some(k) = self.physics.kinematics(entry.handle) else {
                continue;
            };
            let clamped = size.clamp_center(k.position, entry.config.radius());
            if clamped != k.position {
                self.physics.set_position(entry.handle, clamped);
            }
        }
        tracing::info!(width = size.width, height = size.height, "world resized");
    }
}

/// Clamp one acceleration component into `±MAX_ACCELERATION`. NaN becomes 0.
pub(crate) fn saturate_acceleration(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-MAX_ACCELERATION, MAX_ACCELERATION)
    }
}

fn scaled_gravity(settings: &WorldSettings, tuning: &PhysicsTuning) -> Vec2 {
    let raw = settings.gravity() * tuning.gravity_scale;
    let gravity = Vec2::new(saturate_acceleration(raw.x), saturate_acceleration(raw.y));
    if gravity != raw {
        tracing::warn!(
            gravity_x = settings.gravity_x,
            gravity_y = settings.gravity_y,
            applied_x = gravity.x,
            applied_y = gravity.y,
            "gravity out of range, saturated"
        );
    }
    gravity
}

fn validate_shape(config: &BodyConfig) -> Result<(), WorldError> {
    let valid = |v: f32| v.is_finite() && v > 0.0;
    if valid(config.diameter) && valid(config.mass) {
        return Ok(());
    }
    Err(WorldError::InvalidBody {
        id: config.id.clone(),
        diameter: config.diameter,
        mass: config.mass,
    })
}
