//! Merge policies for a local branch that fell behind its upstream
//!
//! A [`ConflictStrategy`] runs inside the sync engine's merge phase, while
//! the engine holds `syncing` and no writer is admitted. It receives the
//! repository and the names involved and leaves the local branch checked
//! out on a history that contains the remote tip.
//!
//! # Built-in Strategies
//!
//! - **[`AcceptOurs`]**: move to the remote tip, then replay every local-only
//!   commit on top, so local file versions win path by path
//!
//! # Custom Strategies
//!
//! Implement the [`ConflictStrategy`] trait to plug in another policy.

mod accept_ours;

pub use accept_ours::{AcceptOurs, TEMP_BRANCH};

use crate::divergence::DivergenceError;
use crate::vcs::{CommitRef, VcsBackend, VcsError};

/// Trait for merge strategies
pub trait ConflictStrategy: std::fmt::Debug + Send + Sync {
    /// Reconcile `local_branch` with `<upstream>/<remote_branch>`
    ///
    /// The caller guarantees exclusive access to the repository for the
    /// whole call.
    fn resolve(
        &self,
        backend: &dyn VcsBackend,
        local_branch: &str,
        remote_branch: &str,
        upstream: &str,
    ) -> Result<MergeOutcome, ConflictError>;
}

/// What a merge did to the local branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Remote tip the local branch was moved onto
    pub base: CommitRef,
    pub common_ancestor: Option<CommitRef>,
    /// New commits created by replaying local work, oldest first
    pub replayed: Vec<CommitRef>,
    /// Local commits whose changes were already present upstream
    pub skipped: usize,
}

impl MergeOutcome {
    /* Getters */

    /// Tip of the local branch after the merge
    pub fn head(&self) -> &CommitRef {
        self.replayed.last().unwrap_or(&self.base)
    }

    pub fn has_local_work(&self) -> bool {
        !self.replayed.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConflictError {
    #[error("merge setup failed: {0}")]
    Setup(#[source] VcsError),

    #[error(transparent)]
    Divergence(#[from] DivergenceError),

    /// Replay stopped part way; commits replayed so far stay on the branch
    #[error("replaying {commit} failed after {replayed} commit(s): {source}")]
    Replay {
        commit: CommitRef,
        replayed: usize,
        #[source]
        source: VcsError,
    },
}
