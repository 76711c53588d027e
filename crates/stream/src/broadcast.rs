use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arena_common::BodyState;
use arena_kernel::World;
use serde::{Deserialize, Serialize};

use crate::protocol::StateUpdate;

/// Broadcast configuration: rate, resync floor and delta threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic broadcasts per second.
    pub broadcast_rate_hz: f32,
    /// Wall time between forced full-state broadcasts.
    pub full_sync_interval_secs: f32,
    /// Bodies at or below this speed (world units/s) are left out of deltas.
    pub movement_threshold: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            broadcast_rate_hz: 30.0,
            full_sync_interval_secs: 2.0,
            // 0.1 world units per 60 Hz step.
            movement_threshold: 6.0,
        }
    }
}

impl SyncConfig {
    /// Number of broadcast ticks between full syncs, at least 1.
    pub fn full_sync_every(&self) -> u32 {
        let ticks = (self.broadcast_rate_hz * self.full_sync_interval_secs).round();
        if ticks.is_finite() && ticks >= 1.0 {
            ticks as u32
        } else {
            1
        }
    }

    /// Time between periodic broadcasts. Saturates to [`Duration::MAX`] for
    /// rates too small to express.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / f64::from(self.broadcast_rate_hz))
            .unwrap_or(Duration::MAX)
    }
}

/// Monotonic broadcast tick source shared by every state message producer.
#[derive(Debug, Default)]
pub struct TickCounter(AtomicU64);

impl TickCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next tick number.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of ticks claimed so far.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// What a periodic broadcast tick decided to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastKind {
    Full,
    Delta,
}

/// Counters for instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub full_syncs: u64,
    pub deltas: u64,
    /// Delta ticks with nothing moving.
    pub skipped: u64,
}

/// Decides, per broadcast tick, between a full snapshot, a delta of
/// moving bodies, or nothing.
#[derive(Debug)]
pub struct DeltaBroadcaster {
    config: SyncConfig,
    full_sync_every: u32,
    counter: u32,
    stats: BroadcastStats,
}

impl DeltaBroadcaster {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            full_sync_every: config.full_sync_every(),
            counter: 0,
            stats: BroadcastStats::default(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats
    }

    /// Advance the full-sync counter and pick this tick's kind.
    pub fn plan(&mut self) -> BroadcastKind {
        self.counter += 1;
        if self.counter >= self.full_sync_every {
            self.counter = 0;
            BroadcastKind::Full
        } else {
            BroadcastKind::Delta
        }
    }

    /// Collect the bodies to send this tick. `None` means nothing to send.
    ///
    /// Full syncs are sent even for an empty world so observers still see
    /// a resync.
    pub fn collect(&mut self, world: &World) -> Option<(BroadcastKind, Vec<BodyState>)> {
        match self.plan() {
            BroadcastKind::Full => {
                self.stats.full_syncs += 1;
                Some((BroadcastKind::Full, world.all_states()))
            }
            BroadcastKind::Delta => {
                let moving = world.changed_states(self.config.movement_threshold);
                if moving.is_empty() {
                    self.stats.skipped += 1;
                    None
                } else {
                    self.stats.deltas += 1;
                    Some((BroadcastKind::Delta, moving))
                }
            }
        }
    }

    /// Build this tick's state message, claiming a tick number only when
    /// something is sent.
    pub fn next_message(
        &mut self,
        world: &World,
        ticks: &TickCounter,
        timestamp: u64,
    ) -> Option<(BroadcastKind, StateUpdate)> {
        let (kind, bodies) = self.collect(world)?;
        tracing::trace!(?kind, bodies = bodies.len(), "broadcast tick");
        Some((kind, state_message(bodies, ticks, timestamp)))
    }
}

/// Tag `bodies` with the next tick.
pub fn state_message(bodies: Vec<BodyState>, ticks: &TickCounter, timestamp: u64) -> StateUpdate {
    StateUpdate {
        tick: ticks.next(),
        bodies,
        timestamp,
    }
}
