use arena_common::{WorldSettings, WorldSize};
use arena_kernel::{InteractionApplier, PhysicsTuning, WorldOptions};
use arena_stream::{DEFAULT_OUTBOX_CAPACITY, SyncConfig};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Slowest loop rate accepted, in Hz.
pub const MIN_RATE_HZ: f32 = 1.0e-3;

/// Server configuration. Every field has a default, so a partial JSON
/// file is enough.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub world_width: f32,
    pub world_height: f32,
    pub physics_rate_hz: f32,
    pub broadcast_rate_hz: f32,
    pub full_sync_interval_secs: f32,
    /// Speed (world units/s) a body must exceed to appear in a delta.
    pub movement_threshold: f32,
    pub tap_radius: f32,
    pub default_tap_force: f32,
    /// Taps waiting for the next physics step; extra taps are dropped.
    pub tap_queue_capacity: usize,
    /// Messages queued per observer before that observer starts losing them.
    pub outbox_capacity: usize,
    /// Spawn RNG seed. `None` seeds from OS entropy.
    pub seed: Option<u64>,
    pub tuning: PhysicsTuning,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let size = WorldSize::default();
        let sync = SyncConfig::default();
        let tap = InteractionApplier::default();
        Self {
            world_width: size.width,
            world_height: size.height,
            physics_rate_hz: 60.0,
            broadcast_rate_hz: sync.broadcast_rate_hz,
            full_sync_interval_secs: sync.full_sync_interval_secs,
            movement_threshold: sync.movement_threshold,
            tap_radius: tap.radius,
            default_tap_force: tap.default_force,
            tap_queue_capacity: 1024,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            seed: None,
            tuning: PhysicsTuning::default(),
        }
    }
}

impl ServerConfig {
    /// Reject configurations the loops cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        let invalid = |msg: String| Err(ServerError::InvalidConfig(msg));

        if !positive(self.world_width) || !positive(self.world_height) {
            return invalid(format!(
                "world size must be positive, got {}x{}",
                self.world_width, self.world_height
            ));
        }
        let rate = |v: f32| v.is_finite() && v >= MIN_RATE_HZ;
        if !rate(self.physics_rate_hz) || !rate(self.broadcast_rate_hz) {
            return invalid(format!(
                "rates must be at least {MIN_RATE_HZ} Hz, got physics {} Hz, broadcast {} Hz",
                self.physics_rate_hz, self.broadcast_rate_hz
            ));
        }
        if self.broadcast_rate_hz > self.physics_rate_hz {
            return invalid(format!(
                "broadcast rate {} Hz is above physics rate {} Hz",
                self.broadcast_rate_hz, self.physics_rate_hz
            ));
        }
        if !self.full_sync_interval_secs.is_finite() || self.full_sync_interval_secs < 0.0 {
            return invalid(format!(
                "full sync interval must be >= 0, got {}",
                self.full_sync_interval_secs
            ));
        }
        if !self.movement_threshold.is_finite() || self.movement_threshold < 0.0 {
            return invalid(format!(
                "movement threshold must be >= 0, got {}",
                self.movement_threshold
            ));
        }
        if !positive(self.tap_radius) || !self.default_tap_force.is_finite() {
            return invalid(format!(
                "tap radius {} / force {} out of range",
                self.tap_radius, self.default_tap_force
            ));
        }
        if self.tap_queue_capacity == 0 || self.outbox_capacity == 0 {
            return invalid("queue capacities must be at least 1".to_owned());
        }
        if let Some((field, value)) = self.tuning.invalid_field() {
            return invalid(format!("tuning.{field} must be finite and >= 0, got {value}"));
        }
        Ok(())
    }

    pub fn world_size(&self) -> WorldSize {
        WorldSize::new(self.world_width, self.world_height)
    }

    /// Broadcast settings for the delta broadcaster.
    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            broadcast_rate_hz: self.broadcast_rate_hz,
            full_sync_interval_secs: self.full_sync_interval_secs,
            movement_threshold: self.movement_threshold,
        }
    }

    pub fn interaction(&self) -> InteractionApplier {
        InteractionApplier::new(self.tap_radius, self.default_tap_force)
    }

    /// Options for a world started with `settings`.
    pub fn world_options(&self, settings: WorldSettings) -> WorldOptions {
        WorldOptions {
            size: self.world_size(),
            settings,
            tuning: self.tuning,
            step_rate_hz: self.physics_rate_hz,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = ServerConfig::default();
        c.validate().unwrap();
        assert_eq!(c.world_size(), WorldSize::new(1920.0, 1080.0));
        assert_eq!(c.sync().full_sync_every(), 60);
        assert_eq!(c.interaction().radius, 150.0);
    }

    #[test]
    fn broadcast_faster_than_physics_is_rejected() {
        let c = ServerConfig {
            broadcast_rate_hz: 120.0,
            ..ServerConfig::default()
        };
        assert!(matches!(c.validate(), Err(ServerError::InvalidConfig(_))));
    }

    #[test]
    fn non_positive_values_are_rejected() {
        for c in [
            ServerConfig {
                world_width: 0.0,
                ..ServerConfig::default()
            },
            ServerConfig {
                physics_rate_hz: f32::NAN,
                ..ServerConfig::default()
            },
            ServerConfig {
                tap_queue_capacity: 0,
                ..ServerConfig::default()
            },
            ServerConfig {
                movement_threshold: -1.0,
                ..ServerConfig::default()
            },
        ] {
            assert!(c.validate().is_err(), "{c:?}");
        }
    }

    #[test]
    fn vanishing_rates_are_rejected() {
        let c = ServerConfig {
            physics_rate_hz: 1e-20,
            broadcast_rate_hz: 1e-20,
            ..ServerConfig::default()
        };
        assert!(matches!(c.validate(), Err(ServerError::InvalidConfig(_))));

        let slow = ServerConfig {
            physics_rate_hz: MIN_RATE_HZ,
            broadcast_rate_hz: MIN_RATE_HZ,
            ..ServerConfig::default()
        };
        slow.validate().unwrap();
        assert!(slow.sync().interval() > std::time::Duration::from_secs(999));
    }

    #[test]
    fn invalid_tuning_is_rejected() {
        for tuning in [
            PhysicsTuning {
                gravity_scale: f32::NAN,
                ..PhysicsTuning::default()
            },
            PhysicsTuning {
                wall_thickness: f32::INFINITY,
                ..PhysicsTuning::default()
            },
            PhysicsTuning {
                wall_restitution: -0.5,
                ..PhysicsTuning::default()
            },
        ] {
            let c = ServerConfig {
                tuning,
                ..ServerConfig::default()
            };
            assert!(matches!(c.validate(), Err(ServerError::InvalidConfig(_))), "{tuning:?}");
        }
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: ServerConfig =
            serde_json::from_str(r#"{"broadcast_rate_hz": 20, "tuning": {"spawn_speed": 0}}"#)
                .unwrap();
        assert_eq!(c.broadcast_rate_hz, 20.0);
        assert_eq!(c.physics_rate_hz, 60.0);
        assert_eq!(c.tuning.spawn_speed, 0.0);
        assert_eq!(c.tuning.impulse_scale, PhysicsTuning::default().impulse_scale);
    }
}
