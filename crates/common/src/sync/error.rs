use crate::conflict::ConflictError;
use crate::vcs::VcsError;

/// How the engine should react to a failed sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transience {
    /// Network trouble; retry with backoff, then defer to the next cycle
    Transient,
    /// Merge or replay failed; re-evaluate divergence next cycle
    Conflict,
    /// Retrying will not help without outside intervention
    Permanent,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Transient)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("fetch failed: {0}")]
    Fetch(#[source] VcsError),

    #[error("push failed: {0}")]
    Push(#[source] VcsError),

    #[error("merge failed: {0}")]
    Merge(#[from] ConflictError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error("sync interrupted by shutdown")]
    ShuttingDown,
}

impl SyncError {
    pub fn transience(&self) -> Transience {
        match self {
            SyncError::Fetch(_) | SyncError::Push(_) => Transience::Transient,
            SyncError::Merge(_) => Transience::Conflict,
            SyncError::Vcs(e) if e.is_remote() => Transience::Transient,
            SyncError::Vcs(_) | SyncError::ShuttingDown => Transience::Permanent,
        }
    }
}
