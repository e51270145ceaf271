//! Debounced refresh scheduling.
//!
//! Every qualifying filesystem event for a coverage root pushes that root's
//! refresh deadline out by the debounce window; the refresh runs once the
//! window passes with no further events. `DebounceTable` holds the deadlines
//! and has no I/O. `RefreshScheduler` drives a table from one background
//! thread that exists only while something is pending.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Pending refresh deadlines, one per root.
#[derive(Debug)]
pub struct DebounceTable {
    pending: HashMap<PathBuf, Instant>,
    delay: Duration,
}

impl DebounceTable {
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            delay,
        }
    }

    /// Set the deadline for `path` to `now + delay`, replacing any earlier
    /// one. Returns true when a pending refresh was superseded.
    pub fn schedule(&mut self, path: PathBuf, now: Instant) -> bool {
        self.pending.insert(path, now + self.delay).is_some()
    }

    pub fn cancel(&mut self, path: &Path) -> bool {
        self.pending.remove(path).is_some()
    }

    /// Remove and return every path whose deadline has passed.
    pub fn take_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready = Vec::new();
        self.pending.retain(|path, deadline| {
            if *deadline <= now {
                ready.push(path.clone());
                false
            } else {
                true
            }
        });
        ready.sort();
        ready
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Called with the root path when its refresh comes due.
pub type RefreshFn = Arc<dyn Fn(&Path) + Send + Sync>;

struct State {
    table: DebounceTable,
    worker_running: bool,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    on_fire: RefreshFn,
}

pub struct RefreshScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(delay: Duration, on_fire: RefreshFn) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    table: DebounceTable::new(delay),
                    worker_running: false,
                }),
                wake: Condvar::new(),
                on_fire,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Schedule (or reschedule) a refresh of `path`.
    pub fn schedule(&self, path: &Path) {
        let mut state = self.shared.state.lock();
        let replaced = state.table.schedule(path.to_path_buf(), Instant::now());
        tracing::trace!(path = %path.display(), replaced, "Refresh scheduled");

        if state.worker_running {
            self.shared.wake.notify_one();
            return;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("covwatch-refresh".to_string())
            .spawn(move || run_worker(shared));
        match spawned {
            Ok(handle) => {
                state.worker_running = true;
                drop(state);
                // Any previous handle belongs to a worker that already exited.
                *self.worker.lock() = Some(handle);
            }
            Err(e) => {
                state.table.cancel(path);
                tracing::error!(error = %e, "Failed to start refresh thread");
            }
        }
    }

    pub fn cancel(&self, path: &Path) -> bool {
        self.shared.state.lock().table.cancel(path)
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.shared.state.lock().table.contains(path)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().table.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().worker_running
    }

    /// Drop every pending refresh and wait for the worker to wind down. A
    /// refresh already in flight finishes first. Safe to call from inside a
    /// refresh callback; the worker is then left to exit on its own.
    pub fn cancel_all(&self) {
        {
            let mut state = self.shared.state.lock();
            state.table.clear();
            self.shared.wake.notify_all();
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("Refresh thread panicked");
            }
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn run_worker(shared: Arc<Shared>) {
    loop {
        let ready = {
            let mut state = shared.state.lock();
            loop {
                if state.table.is_empty() {
                    state.worker_running = false;
                    return;
                }
                let ready = state.table.take_ready(Instant::now());
                if !ready.is_empty() {
                    break ready;
                }
                if let Some(deadline) = state.table.next_deadline() {
                    shared.wake.wait_until(&mut state, deadline);
                }
            }
        };

        for path in ready {
            tracing::debug!(path = %path.display(), "Refresh due");
            if catch_unwind(AssertUnwindSafe(|| (shared.on_fire)(&path))).is_err() {
                tracing::error!(path = %path.display(), "Refresh callback panicked");
            }
        }
    }
}
