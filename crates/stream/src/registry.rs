use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::protocol::ServerMessage;

/// Default per-observer queue length before messages start being dropped.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Opaque handle of a connected observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Receiving side handed to the transport for one observer.
pub struct Connection {
    pub id: ConnectionId,
    pub outbox: Receiver<Arc<ServerMessage>>,
}

/// Set of live observers with fan-out.
///
/// Each observer has a bounded outbox. A full outbox drops the message for
/// that observer only; periodic full syncs repair the gap. An observer
/// whose receiver is gone is pruned on the next send.
///
/// Joins, leaves and count announcements are serialized, so the last count
/// every observer receives is the current one.
pub struct ConnectionRegistry {
    live: Mutex<HashMap<ConnectionId, Sender<Arc<ServerMessage>>>>,
    membership: Mutex<()>,
    next_id: AtomicU64,
    peak: AtomicUsize,
    capacity: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl ConnectionRegistry {
    /// An empty registry whose outboxes hold `outbox_capacity` messages.
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            membership: Mutex::new(()),
            next_id: AtomicU64::new(1),
            peak: AtomicUsize::new(0),
            capacity: outbox_capacity.max(1),
        }
    }

    fn live(&self) -> MutexGuard<'_, HashMap<ConnectionId, Sender<Arc<ServerMessage>>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn membership(&self) -> MutexGuard<'_, ()> {
        self.membership.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live observers.
    pub fn viewer_count(&self) -> usize {
        self.live().len()
    }

    /// Highest viewer count seen.
    pub fn peak_viewers(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Whether `id` is still registered.
    pub fn is_live(&self, id: ConnectionId) -> bool {
        self.live().contains_key(&id)
    }

    /// Register an observer, send it a bootstrap built from the new viewer
    /// count, then tell everyone the count.
    ///
    /// The bootstrap is queued before the observer is visible to fan-out, so
    /// it is always the first message on the outbox.
    pub fn join(&self, bootstrap: impl FnOnce(usize) -> ServerMessage) -> Connection {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let order = self.membership();
        let count = self.live().len() + 1;
        if let Err(err) = tx.try_send(Arc::new(bootstrap(count))) {
            tracing::warn!(%id, %err, "could not queue bootstrap");
        }
        self.live().insert(id, tx);
        self.peak.fetch_max(count, Ordering::Relaxed);
        tracing::info!(%id, viewers = count, "observer joined");

        self.announce_count(&order);
        Connection { id, outbox: rx }
    }

    /// Remove an observer. Returns false if it was not live.
    pub fn leave(&self, id: ConnectionId) -> bool {
        let order = self.membership();
        let removed = self.live().remove(&id).is_some();
        if removed {
            tracing::info!(%id, viewers = self.viewer_count(), "observer left");
            self.announce_count(&order);
        }
        removed
    }

    /// Send to one observer. Returns false if it was not delivered.
    pub fn send_to(&self, id: ConnectionId, msg: ServerMessage) -> bool {
        let sender = self.live().get(&id).cloned();
        let Some(sender) = sender else {
            return false;
        };
        match sender.try_send(Arc::new(msg)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(%id, "outbox full, message dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                if self.live().remove(&id).is_some() {
                    tracing::debug!(%id, "pruned dead observer");
                    self.broadcast_viewer_count();
                }
                false
            }
        }
    }

    /// Send to every live observer. Returns how many received it.
    pub fn broadcast(&self, msg: ServerMessage) -> usize {
        self.fan_out(Arc::new(msg))
    }

    /// Tell every observer the current viewer count.
    pub fn broadcast_viewer_count(&self) {
        let order = self.membership();
        self.announce_count(&order);
    }

    /// Caller holds the membership lock.
    fn announce_count(&self, _order: &MutexGuard<'_, ()>) {
        // Pruning dead observers changes the count, so repeat until stable.
        loop {
            let count = self.viewer_count();
            let (_, pruned) = self.fan_out_raw(Arc::new(ServerMessage::UserCount { count }));
            if pruned == 0 {
                break;
            }
        }
    }

    fn fan_out(&self, msg: Arc<ServerMessage>) -> usize {
        let (delivered, pruned) = self.fan_out_raw(msg);
        if pruned > 0 {
            self.broadcast_viewer_count();
        }
        delivered
    }

    /// Deliver without announcing pruned observers. Returns (delivered, pruned).
    fn fan_out_raw(&self, msg: Arc<ServerMessage>) -> (usize, usize) {
        let senders: Vec<(ConnectionId, Sender<Arc<ServerMessage>>)> = self
            .live()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in senders {
            match tx.try_send(Arc::clone(&msg)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(%id, kind = msg.kind(), "outbox full, message dropped");
                }
                Err(TrySendError::Disconnected(_)) => dead.push(id),
            }
        }

        let mut pruned = 0;
        if !dead.is_empty() {
            let mut live = self.live();
            for id in dead {
                if live.remove(&id).is_some() {
                    tracing::debug!(%id, "pruned dead observer");
                    pruned += 1;
                }
            }
        }
        (delivered, pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(conn: &Connection) -> Vec<ServerMessage> {
        conn.outbox.try_iter().map(|m| (*m).clone()).collect()
    }

    fn counts(msgs: &[ServerMessage]) -> Vec<usize> {
        msgs.iter()
            .filter_map(|m| match m {
                ServerMessage::UserCount { count } => Some(*count),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn join_sends_bootstrap_then_count() {
        let reg = ConnectionRegistry::default();
        let a = reg.join(|n| ServerMessage::UserCount { count: n + 100 });
        let msgs = drain(&a);
        assert_eq!(
            msgs,
            vec![
                ServerMessage::UserCount { count: 101 },
                ServerMessage::UserCount { count: 1 },
            ]
        );
    }

    #[test]
    fn membership_changes_broadcast_count() {
        let reg = ConnectionRegistry::default();
        let a = reg.join(|_| ServerMessage::UserCount { count: 0 });
        let b = reg.join(|_| ServerMessage::UserCount { count: 0 });
        drain(&b);
        assert_eq!(counts(&drain(&a)), vec![0, 1, 2]);

        assert!(reg.leave(b.id));
        assert!(!reg.leave(b.id));
        assert_eq!(counts(&drain(&a)), vec![1]);
        assert_eq!(reg.viewer_count(), 1);
        assert_eq!(reg.peak_viewers(), 2);
    }

    #[test]
    fn dropped_receiver_is_pruned() {
        let reg = ConnectionRegistry::default();
        let a = reg.join(|_| ServerMessage::UserCount { count: 0 });
        let b = reg.join(|_| ServerMessage::UserCount { count: 0 });
        drain(&a);
        let b_id = b.id;
        drop(b);

        let delivered = reg.broadcast(ServerMessage::UserCount { count: 99 });
        assert_eq!(delivered, 1);
        assert!(!reg.is_live(b_id));
        assert_eq!(counts(&drain(&a)), vec![99, 1]);
    }

    #[test]
    fn full_outbox_drops_without_disconnecting() {
        let reg = ConnectionRegistry::new(2);
        let a = reg.join(|_| ServerMessage::UserCount { count: 0 });
        // bootstrap + count fill the outbox
        assert_eq!(reg.broadcast(ServerMessage::UserCount { count: 5 }), 0);
        assert!(reg.is_live(a.id));
        assert_eq!(drain(&a).len(), 2);
        assert_eq!(reg.broadcast(ServerMessage::UserCount { count: 5 }), 1);
    }

    #[test]
    fn bootstrap_precedes_concurrent_broadcasts() {
        let reg = Arc::new(ConnectionRegistry::default());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let noise = {
            let (reg, stop) = (Arc::clone(&reg), Arc::clone(&stop));
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    reg.broadcast(ServerMessage::UserCount { count: 7777 });
                }
            })
        };
        for _ in 0..200 {
            let c = reg.join(|_| ServerMessage::UserCount { count: 5000 });
            let first = c.outbox.recv().unwrap();
            assert_eq!(*first, ServerMessage::UserCount { count: 5000 });
            reg.leave(c.id);
        }
        stop.store(true, Ordering::Relaxed);
        noise.join().unwrap();
    }

    #[test]
    fn last_count_is_current_after_concurrent_joins() {
        let reg = Arc::new(ConnectionRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    (0..10)
                        .map(|_| reg.join(|_| ServerMessage::UserCount { count: 0 }))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let conns: Vec<Connection> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(reg.viewer_count(), 80);
        for c in &conns {
            assert_eq!(counts(&drain(c)).last(), Some(&80), "{}", c.id);
        }
    }

    #[test]
    fn concurrent_join_and_leave() {
        let reg = Arc::new(ConnectionRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let c = reg.join(|_| ServerMessage::UserCount { count: 0 });
                        reg.leave(c.id);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.viewer_count(), 0);
    }
}
