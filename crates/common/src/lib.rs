//! Synchronization core for gitmount
//!
//! Keeps a local clone of a git repository in step with its upstream while
//! the working tree is being edited through a virtual filesystem.

pub mod cache;
pub mod conflict;
pub mod coord;
pub mod divergence;
pub mod jobs;
pub mod sync;
pub mod vcs;

pub mod prelude {
    pub use crate::cache::{BoundedCache, CacheError, CacheStats};
    pub use crate::conflict::{AcceptOurs, ConflictError, ConflictStrategy, MergeOutcome};
    pub use crate::coord::{AdmissionError, AtomicCounter, CoordinationState, Signal, WriterGuard};
    pub use crate::divergence::{diverge, DivergeResult, DivergenceError};
    pub use crate::jobs::{Job, JobDispatcher, JobReceiver};
    pub use crate::sync::{
        EngineState, FetchConfig, FetchWorker, Refresh, SyncConfig, SyncContext, SyncEngine,
        SyncError, SyncHandle,
    };
    pub use crate::vcs::{CommitInfo, CommitRef, Identity, VcsBackend, VcsError};
}
