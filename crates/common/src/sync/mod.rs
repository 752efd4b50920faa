//! Background synchronization with the upstream remote
//!
//! Two dedicated threads cooperate with filesystem calls through the
//! mount's [`CoordinationState`](crate::coord::CoordinationState):
//!
//! - [`SyncEngine`] drains the job queue, commits each quiet period's batch
//!   and runs fetch, merge and push with bounded retries
//! - [`FetchWorker`] keeps the remote-tracking ref fresh on a timer, or
//!   immediately after a failed push
//!
//! Neither thread ever holds a lock across a wait on the other; the only
//! shared lock is the remote-operation mutex around fetch and push.

mod backoff;
mod engine;
mod error;
mod fetch;

pub use backoff::Backoff;
pub use engine::{EngineState, SyncConfig, SyncContext, SyncEngine, SyncHandle, SyncPhase};
pub use error::{SyncError, Transience};
pub use fetch::{FetchConfig, FetchHandle, FetchWorker};

use crate::vcs::{VcsBackend, VcsError};

/// A derived view of the repository rebuilt after history changes
///
/// The engine calls every registered refresher after a local commit and
/// after each merge.
pub trait Refresh: Send + Sync {
    fn name(&self) -> &'static str;

    fn refresh(&self, backend: &dyn VcsBackend) -> Result<(), VcsError>;
}
