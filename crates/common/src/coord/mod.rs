//! Cross-thread handshake between filesystem calls and the sync workers
//!
//! # Protocol
//!
//! - A writer increments `active_writers`, then checks `syncing`. If a sync
//!   cycle is running it backs out, waits for `sync_done`, and tries again.
//! - The engine sets `syncing`, then checks `active_writers`. It only
//!   touches the index when the counter reads zero.
//!
//! Both sides use sequentially consistent operations, so at least one of
//! them observes the other and a write never overlaps a commit, merge or
//! push. Writers are never excluded from each other.

mod admission;
mod counter;
mod signal;

pub use admission::{AdmissionError, WriterGuard};
pub use counter::AtomicCounter;
pub use signal::Signal;

use parking_lot::{Mutex, MutexGuard};

/// Process-wide coordination flags for one mount
#[derive(Debug)]
pub struct CoordinationState {
    /// A commit/merge/push cycle is in progress
    pub syncing: Signal,
    /// Raised when a sync cycle ends; writers blocked on `syncing` wait on it
    pub sync_done: Signal,
    /// Health of the last push
    pub push_successful: Signal,
    /// Health of the last fetch
    pub fetch_successful: Signal,
    /// Temporarily reject writes (raised while merging)
    pub read_only: Signal,
    /// No job activity for the configured number of poll cycles
    pub idle: Signal,
    /// Ask the fetch worker to fetch before its next scheduled run
    pub fetch_requested: Signal,
    pub shutting_down: Signal,
    pub active_writers: AtomicCounter,
    remote: Mutex<()>,
}

impl Default for CoordinationState {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinationState {
    pub fn new() -> Self {
        Self {
            syncing: Signal::new("syncing", false),
            sync_done: Signal::new("sync_done", true),
            push_successful: Signal::new("push_successful", true),
            fetch_successful: Signal::new("fetch_successful", true),
            read_only: Signal::new("read_only", false),
            idle: Signal::new("idle", false),
            fetch_requested: Signal::new("fetch_requested", false),
            shutting_down: Signal::new("shutting_down", false),
            active_writers: AtomicCounter::default(),
            remote: Mutex::new(()),
        }
    }

    /// Serialize remote operations (fetch, push) across threads
    pub fn remote_lock(&self) -> MutexGuard<'_, ()> {
        self.remote.lock()
    }

    /// Mark the start of a sync cycle
    pub fn begin_sync(&self) {
        self.sync_done.clear();
        self.syncing.set();
    }

    /// Mark the end of a sync cycle and release blocked writers
    pub fn finish_sync(&self) {
        self.syncing.clear();
        self.sync_done.set();
    }

    /// Whether the last fetch and push both succeeded
    pub fn remote_healthy(&self) -> bool {
        self.fetch_successful.is_set() && self.push_successful.is_set()
    }

    /// Ask every worker to stop
    pub fn shutdown(&self) {
        self.shutting_down.set();
        // wake anything parked on a signal it would otherwise never see
        self.fetch_requested.set();
        self.sync_done.set();
    }
}
