//! The owned arena server.
//!
//! One [`ArenaServer`] owns one world. Everything the loops touch lives in
//! a shared block behind an `Arc`, so the physics thread, the broadcast
//! thread and the transport threads all work on the same instance without
//! globals.
//!
//! # Invariants
//! - The world mutex is held for exactly one step, one tap batch plus step,
//!   one broadcast read, one config swap or one observer join. Nothing
//!   waits on I/O under it.
//! - Taps are queued and applied by the physics thread between steps.
//! - Everything derived from the world goes out under one ordering lock,
//!   taken before the world lock is released. Observers therefore see
//!   snapshots in world order, and ticks in increasing order.
//! - Lock order is world, then ordering lock, then registry.
//! - A step failure is recorded once, stops both loops and is reported by
//!   [`ArenaServer::check`].

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arena_common::{BodyId, BodyState, WorldSettings, WorldSize};
use arena_kernel::{InteractionApplier, Tap, World, WorldError, step_interval};
use arena_persist::ConfigSource;
use arena_stream::{
    BroadcastKind, BroadcastStats, ClientMessage, Connection, ConnectionId, ConnectionRegistry,
    DeltaBroadcaster, FullSync, ServerMessage, TapEffect, TickCounter, now_millis, state_message,
};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::config::ServerConfig;
use crate::config_sync::ConfigSync;
use crate::error::ServerError;
use crate::tasks::PeriodicTask;

/// Counters describing a running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    pub viewers: usize,
    pub peak_viewers: usize,
    /// Taps accepted since start.
    pub total_taps: u64,
    /// Taps lost to a full ingress queue.
    pub dropped_taps: u64,
    /// State messages sent.
    pub ticks: u64,
    pub steps: u64,
    pub bodies: usize,
    pub broadcasts: BroadcastStats,
}

pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    world: Mutex<World>,
    pub(crate) registry: ConnectionRegistry,
    ticks: TickCounter,
    broadcaster: Mutex<DeltaBroadcaster>,
    state_order: Mutex<()>,
    applier: InteractionApplier,
    taps_tx: Sender<Tap>,
    taps_rx: Receiver<Tap>,
    taps_accepted: AtomicU64,
    taps_dropped: AtomicU64,
    fault: Mutex<Option<WorldError>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub(crate) fn world(&self) -> MutexGuard<'_, World> {
        lock(&self.world)
    }

    fn fault(&self) -> Option<WorldError> {
        lock(&self.fault).clone()
    }

    fn record_fault(&self, err: WorldError) {
        let mut slot = lock(&self.fault);
        if slot.is_none() {
            tracing::error!(%err, "physics fault, stopping simulation");
            *slot = Some(err);
        }
    }

    /// Take the ordering lock, then give up the world.
    ///
    /// Whatever the caller read from `world` goes out before anything read
    /// after this returns.
    pub(crate) fn order(&self, world: MutexGuard<'_, World>) -> MutexGuard<'_, ()> {
        let order = lock(&self.state_order);
        drop(world);
        order
    }

    /// Tick-stamp `bodies`, read from `world`, and send them to every observer.
    fn emit_state(&self, world: MutexGuard<'_, World>, bodies: Vec<BodyState>) -> u64 {
        let _order = self.order(world);
        let msg = state_message(bodies, &self.ticks, now_millis());
        let tick = msg.tick;
        self.registry.broadcast(ServerMessage::State(msg));
        tick
    }

    /// Apply queued taps, then advance the world one step.
    ///
    /// Bodies hit by a tap are sent with their state after the step.
    fn step_once(&self) -> Result<(), WorldError> {
        let mut affected: BTreeSet<BodyId> = BTreeSet::new();
        let mut world = self.world();
        for tap in self.taps_rx.try_iter() {
            affected.extend(self.applier.apply(&mut world, &tap).into_iter().map(|s| s.id));
        }
        world.step()?;
        if !affected.is_empty() {
            let states = affected.iter().filter_map(|id| world.state(id)).collect();
            self.emit_state(world, states);
        }
        Ok(())
    }

    fn broadcast_once(&self) -> Option<BroadcastKind> {
        let world = self.world();
        let (kind, bodies) = lock(&self.broadcaster).collect(&world)?;
        self.emit_state(world, bodies);
        Some(kind)
    }

    fn submit_tap(&self, tap: Tap) -> bool {
        let Some(tap) = tap.sanitized() else {
            tracing::debug!(?tap, "dropping malformed tap");
            return false;
        };
        self.registry.broadcast(ServerMessage::TapEffect(TapEffect {
            x: tap.x,
            y: tap.y,
            timestamp: now_millis(),
        }));
        match self.taps_tx.try_send(tap) {
            Ok(()) => {
                self.taps_accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.taps_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("tap queue full, dropping tap");
                false
            }
        }
    }
}

/// Authoritative arena: one world, its loops, and its observers.
pub struct ArenaServer {
    shared: Arc<Shared>,
    physics: Mutex<Option<PeriodicTask>>,
    broadcast: Mutex<Option<PeriodicTask>>,
    shut_down: AtomicBool,
}

impl ArenaServer {
    /// Build a server with an empty world. Loops are not started.
    pub fn new(config: ServerConfig, settings: WorldSettings) -> Result<Self, ServerError> {
        config.validate()?;
        let world = World::new(config.world_options(settings));
        let (taps_tx, taps_rx) = crossbeam_channel::bounded(config.tap_queue_capacity);
        let shared = Shared {
            world: Mutex::new(world),
            registry: ConnectionRegistry::new(config.outbox_capacity),
            ticks: TickCounter::new(),
            broadcaster: Mutex::new(DeltaBroadcaster::new(config.sync())),
            state_order: Mutex::new(()),
            applier: config.interaction(),
            taps_tx,
            taps_rx,
            taps_accepted: AtomicU64::new(0),
            taps_dropped: AtomicU64::new(0),
            fault: Mutex::new(None),
            config,
        };
        Ok(Self {
            shared: Arc::new(shared),
            physics: Mutex::new(None),
            broadcast: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Build a server from the collaborator's current settings and active pucks.
    pub fn bootstrap(config: ServerConfig, source: &dyn ConfigSource) -> Result<Self, ServerError> {
        let settings = source.load_settings()?;
        let server = Self::new(config, settings)?;
        let update = server
            .config_sync()
            .reconcile_bodies(source.load_active_body_configs()?);
        tracing::info!(
            bodies = update.body_configs.map_or(0, |c| c.len()),
            "world bootstrapped from config source"
        );
        Ok(server)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Start the physics and broadcast loops. Loops already running are left alone.
    pub fn start(&self) -> Result<(), ServerError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ServerError::AlreadyStopped);
        }
        self.check()?;

        let mut physics = lock(&self.physics);
        if physics.is_none() {
            let shared = Arc::clone(&self.shared);
            let interval = step_interval(self.shared.config.physics_rate_hz);
            *physics = Some(PeriodicTask::spawn("physics", interval, move || {
                if shared.fault().is_some() {
                    return ControlFlow::Break(());
                }
                match shared.step_once() {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(err) => {
                        shared.record_fault(err);
                        ControlFlow::Break(())
                    }
                }
            })?);
        }
        drop(physics);

        let mut broadcast = lock(&self.broadcast);
        if broadcast.is_none() {
            let shared = Arc::clone(&self.shared);
            let interval = self.shared.config.sync().interval();
            *broadcast = Some(PeriodicTask::spawn("broadcast", interval, move || {
                if shared.fault().is_some() {
                    return ControlFlow::Break(());
                }
                shared.broadcast_once();
                ControlFlow::Continue(())
            })?);
        }
        Ok(())
    }

    /// Stop the physics loop. Returns false if it was not running.
    pub fn stop_physics(&self) -> bool {
        lock(&self.physics).take().is_some_and(|task| task.stop())
    }

    /// Stop the broadcast loop. Returns false if it was not running.
    pub fn stop_broadcast(&self) -> bool {
        lock(&self.broadcast).take().is_some_and(|task| task.stop())
    }

    /// Stop both loops for good. Safe to call any number of times.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_broadcast();
        self.stop_physics();
        tracing::info!("arena server shut down");
    }

    /// Whether both loops are alive.
    pub fn is_running(&self) -> bool {
        let alive = |slot: &Mutex<Option<PeriodicTask>>| {
            lock(slot).as_ref().is_some_and(PeriodicTask::is_running)
        };
        alive(&self.physics) && alive(&self.broadcast)
    }

    /// Surface a recorded physics fault.
    pub fn check(&self) -> Result<(), ServerError> {
        match self.shared.fault() {
            Some(err) => Err(ServerError::PhysicsFault(err)),
            None => Ok(()),
        }
    }

    /// Apply queued taps and advance one step, outside the physics loop.
    pub fn step(&self) -> Result<(), ServerError> {
        self.check()?;
        self.shared.step_once().map_err(|err| {
            self.shared.record_fault(err.clone());
            ServerError::PhysicsFault(err)
        })
    }

    /// Run one broadcast tick outside the broadcast loop.
    pub fn broadcast(&self) -> Option<BroadcastKind> {
        self.shared.broadcast_once()
    }

    /// Queue a tap for the next step and show its effect to every observer.
    ///
    /// Returns false if the tap was malformed or the queue was full.
    pub fn submit_tap(&self, tap: Tap) -> bool {
        self.shared.submit_tap(tap)
    }

    /// Dispatch one decoded client message.
    pub fn handle_message(&self, from: ConnectionId, msg: ClientMessage) {
        match msg {
            ClientMessage::Tap(tap) => {
                self.submit_tap(tap);
            }
            ClientMessage::Join { client_id } => {
                tracing::info!(conn = %from, client_id, "observer identified");
            }
        }
    }

    /// Register an observer. Its first message is a full sync; every state
    /// it receives afterwards was read after that sync.
    pub fn connect(&self) -> Connection {
        let shared = &self.shared;
        let world = shared.world();
        let _order = lock(&shared.state_order);
        shared.registry.join(|viewer_count| {
            ServerMessage::FullSync(FullSync {
                body_configs: world.configs(),
                body_states: world.all_states(),
                settings: *world.settings(),
                viewer_count,
            })
        })
    }

    /// Drop an observer. Returns false if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.shared.registry.leave(id)
    }

    /// Move the walls and send everyone the clamped positions.
    pub fn resize(&self, size: WorldSize) -> Result<(), ServerError> {
        if !(size.width.is_finite() && size.width > 0.0 && size.height.is_finite() && size.height > 0.0)
        {
            return Err(ServerError::InvalidConfig(format!(
                "world size must be positive, got {}x{}",
                size.width, size.height
            )));
        }
        let mut world = self.shared.world();
        world.resize_world(size);
        let states = world.all_states();
        self.shared.emit_state(world, states);
        Ok(())
    }

    /// Handle for pushing collaborator changes into this server.
    pub fn config_sync(&self) -> ConfigSync {
        ConfigSync::new(Arc::clone(&self.shared))
    }

    /// Snapshot of the server counters.
    pub fn stats(&self) -> ServerStats {
        let (steps, bodies) = {
            let world = self.shared.world();
            (world.steps(), world.body_count())
        };
        ServerStats {
            viewers: self.shared.registry.viewer_count(),
            peak_viewers: self.shared.registry.peak_viewers(),
            total_taps: self.shared.taps_accepted.load(Ordering::Relaxed),
            dropped_taps: self.shared.taps_dropped.load(Ordering::Relaxed),
            ticks: self.shared.ticks.current(),
            steps,
            bodies,
            broadcasts: lock(&self.shared.broadcaster).stats(),
        }
    }

    /// Read the world under its lock.
    pub fn with_world<R>(&self, f: impl FnOnce(&World) -> R) -> R {
        f(&self.shared.world())
    }
}

impl Drop for ArenaServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
