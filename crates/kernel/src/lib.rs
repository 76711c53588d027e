//! World Kernel: the authoritative puck world, fixed-step physics, tap impulses.
//!
//! # Invariants
//! - Every body has exactly one config and one rigid body; both live and die together.
//! - Only stepping and impulses change body dynamics.
//! - No body leaves the walls or carries non-finite values after a step.

mod error;
pub mod interaction;
mod physics;
pub mod stepper;
mod tuning;
pub mod world;

pub use error::WorldError;
pub use interaction::{InteractionApplier, Tap, impulse_magnitude};
pub use stepper::{edge_pull_force, step_interval};
pub use tuning::PhysicsTuning;
pub use world::{MAX_ACCELERATION, World, WorldOptions};
