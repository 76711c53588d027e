//! Streaming: wire protocol, delta-compressed state broadcasts, observer registry.
//!
//! # Invariants
//! - Every state message carries a fresh, strictly increasing tick.
//! - A full sync goes out at least once per configured interval.
//! - Losing a message to one observer never blocks or disconnects the others.

mod broadcast;
pub mod protocol;
mod registry;

pub use broadcast::{
    BroadcastKind, BroadcastStats, DeltaBroadcaster, SyncConfig, TickCounter, state_message,
};
pub use protocol::{
    ClientMessage, ConfigUpdate, FullSync, ProtocolError, ServerMessage, StateUpdate, TapEffect,
    now_millis,
};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, DEFAULT_OUTBOX_CAPACITY};
