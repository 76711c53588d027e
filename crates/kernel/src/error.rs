use arena_common::BodyId;

/// Errors from world store operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldError {
    #[error("body {0} already exists")]
    DuplicateBody(BodyId),
    #[error("body limit of {limit} reached")]
    CapacityExceeded { limit: u32 },
    #[error("body {id} has invalid shape: diameter={diameter}, mass={mass}")]
    InvalidBody { id: BodyId, diameter: f32, mass: f32 },
    /// The timestep is not a positive finite number. Stepping cannot continue.
    #[error("non-finite simulation parameter: {0}")]
    NonFiniteSettings(&'static str),
}
