use std::fmt;

/// Which backend operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VcsOp {
    Open,
    Clone,
    Resolve,
    Walk,
    Stage,
    Commit,
    Branch,
    Checkout,
    Fetch,
    Push,
    Read,
    Write,
    Status,
}

impl fmt::Display for VcsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VcsOp::Open => "open",
            VcsOp::Clone => "clone",
            VcsOp::Resolve => "resolve",
            VcsOp::Walk => "walk",
            VcsOp::Stage => "stage",
            VcsOp::Commit => "commit",
            VcsOp::Branch => "branch",
            VcsOp::Checkout => "checkout",
            VcsOp::Fetch => "fetch",
            VcsOp::Push => "push",
            VcsOp::Read => "read",
            VcsOp::Write => "write",
            VcsOp::Status => "status",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("{kind} failed: {detail}")]
    OperationFailed { kind: VcsOp, detail: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl VcsError {
    pub fn failed(kind: VcsOp, detail: impl fmt::Display) -> Self {
        VcsError::OperationFailed {
            kind,
            detail: detail.to_string(),
        }
    }

    /// Map-err adapter: `.map_err(VcsError::with(VcsOp::Push))`
    pub fn with<E: fmt::Display>(kind: VcsOp) -> impl FnOnce(E) -> Self {
        move |e| Self::failed(kind, e)
    }

    pub fn kind(&self) -> Option<VcsOp> {
        match self {
            VcsError::OperationFailed { kind, .. } => Some(*kind),
            VcsError::NotFound(_) => None,
        }
    }

    /// Network-side failures that a later attempt may get past
    pub fn is_remote(&self) -> bool {
        matches!(self.kind(), Some(VcsOp::Fetch) | Some(VcsOp::Push))
    }
}
