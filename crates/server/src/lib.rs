//! Arena server: owns one world and drives it.
//!
//! Glues the kernel, the stream layer and the persistence boundary into a
//! running service: a physics loop, a broadcast loop, tap ingress from any
//! number of observer threads, and config sync from the collaborator store.
//! The transport is left to the binary; observers are plain channels here.

mod config;
mod config_sync;
mod error;
mod server;
mod tasks;

pub use config::ServerConfig;
pub use config_sync::{ConfigSync, SourceListener};
pub use error::ServerError;
pub use server::{ArenaServer, ServerStats};
pub use tasks::PeriodicTask;
