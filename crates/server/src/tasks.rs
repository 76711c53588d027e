//! Fixed-rate background loops with a cooperative stop flag.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::ServerError;

/// A named thread calling `tick` every `interval` until stopped or until
/// `tick` breaks.
///
/// The stop flag is checked between ticks only, so a stop never cuts a
/// tick in half. `stop` is idempotent and joins the thread.
pub struct PeriodicTask {
    name: &'static str,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn spawn<F>(name: &'static str, interval: Duration, mut tick: F) -> Result<Self, ServerError>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("arena-{name}"))
            .spawn(move || {
                tracing::info!(task = name, ?interval, "task started");
                let mut deadline = Instant::now() + interval;
                while !flag.load(Ordering::Acquire) {
                    if tick().is_break() {
                        break;
                    }
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else {
                        // Overran; don't try to catch up with a burst of ticks.
                        deadline = now;
                    }
                    deadline += interval;
                }
                flag.store(true, Ordering::Release);
                tracing::info!(task = name, "task stopped");
            })
            .map_err(|source| ServerError::Spawn { name, source })?;

        Ok(Self {
            name,
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
    }

    /// Ask the loop to exit after the current tick, without waiting.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop the loop and wait for it. Returns false if it was already joined.
    pub fn stop(&self) -> bool {
        self.request_stop();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return false;
        };
        if handle.thread().id() == thread::current().id() {
            // Stopping from inside the loop; it exits on its own.
            return true;
        }
        if handle.join().is_err() {
            tracing::error!(task = self.name, "task panicked");
        }
        true
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn runs_until_stopped() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let task = PeriodicTask::spawn("count", Duration::from_millis(1), move || {
            c.fetch_add(1, Ordering::Relaxed);
            ControlFlow::Continue(())
        })
        .unwrap();
        while count.load(Ordering::Relaxed) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(task.is_running());
        assert!(task.stop());
        assert!(!task.is_running());
        let after = count.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::Relaxed), after);
    }

    #[test]
    fn stop_is_idempotent() {
        let task = PeriodicTask::spawn("idle", Duration::from_millis(1), || {
            ControlFlow::Continue(())
        })
        .unwrap();
        assert!(task.stop());
        assert!(!task.stop());
        assert!(!task.stop());
    }

    #[test]
    fn break_ends_the_loop() {
        let task = PeriodicTask::spawn("once", Duration::from_millis(1), || {
            ControlFlow::Break(())
        })
        .unwrap();
        while task.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(task.stop());
        assert_eq!(task.name(), "once");
    }
}
