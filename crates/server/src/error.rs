use arena_kernel::WorldError;
use arena_persist::StoreError;

/// Errors from running the arena server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid server config: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The simulation could not be stepped. Not recoverable.
    #[error("physics fault: {0}")]
    PhysicsFault(#[source] WorldError),

    #[error("server has been shut down")]
    AlreadyStopped,

    #[error("config source error: {0}")]
    Source(#[from] StoreError),
}
