use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct Slot {
    alive: Arc<AtomicBool>,
    _handle: JoinHandle<()>,
}

/// Clears the alive flag however the task ends.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

/// Bounded set of named worker threads. Finished slots are reused.
pub struct WorkerPool {
    name: String,
    max: usize,
    slots: Mutex<Vec<Slot>>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, max: usize) -> Self {
        WorkerPool { name: name.into(), max, slots: Mutex::new(Vec::new()) }
    }

    /// Run `task` on a new worker unless `limit` (capped at the pool size)
    /// workers are already alive. A panicking task is logged and its slot freed.
    pub fn spawn_within<F>(&self, limit: usize, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slots = self.slots.lock();
        slots.retain(|s| s.alive.load(Ordering::Acquire));
        if slots.len() >= limit.min(self.max) {
            return false;
        }
        let alive = Arc::new(AtomicBool::new(true));
        let guard = AliveGuard(Arc::clone(&alive));
        let name = format!("{}-{}", self.name, slots.len());
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let _guard = guard;
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::error!(worker = %name, "worker panicked");
            }
        });
        match spawned {
            Ok(handle) => {
                slots.push(Slot { alive, _handle: handle });
                true
            }
            Err(e) => {
                tracing::warn!(pool = %self.name, error = %e, "failed to spawn worker");
                false
            }
        }
    }

    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_within(self.max, task)
    }

    pub fn alive(&self) -> usize { self.slots.lock().iter().filter(|s| s.alive.load(Ordering::Acquire)).count() }

    pub fn any_alive(&self) -> bool { self.alive() > 0 }
}
