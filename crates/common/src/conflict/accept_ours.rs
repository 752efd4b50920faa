//! Accept-ours merge strategy

use crate::divergence::diverge;
use crate::vcs::{CommitRef, Identity, VcsBackend, VcsError, VcsOp};

use super::{ConflictError, ConflictStrategy, MergeOutcome};

/// Name the local branch is parked under while a merge runs
pub const TEMP_BRANCH: &str = "merging_local";

/// Local edits win over remote ones
///
/// The local branch is parked under [`TEMP_BRANCH`], recreated at the
/// remote tip, and every local-only commit is replayed on top in order.
/// For each path a replayed commit touched, the replayed commit's version
/// is written, so the most recent local version of a file always wins.
///
/// A failed replay is not rolled back: the branch keeps the remote tip plus
/// whatever was replayed before the failure, and the parked branch is left
/// in place so the remaining local commits are still reachable. While it
/// exists, later merges refuse to start rather than park over it.
#[derive(Debug, Clone)]
pub struct AcceptOurs {
    committer: Identity,
}

impl AcceptOurs {
    pub fn new(committer: Identity) -> Self {
        Self { committer }
    }

    fn replay(
        &self,
        backend: &dyn VcsBackend,
        commit: &CommitRef,
    ) -> Result<Option<CommitRef>, VcsError> {
        let info = backend.commit_info(commit)?;
        let paths = backend.changed_paths(commit)?;
        for path in &paths {
            let content = backend.read_file(commit, path)?;
            backend.write_worktree(path, content.as_ref())?;
        }
        backend.stage(&paths)?;
        backend.commit(&info.message, &info.author, &self.committer, None)
    }
}

impl ConflictStrategy for AcceptOurs {
    fn resolve(
        &self,
        backend: &dyn VcsBackend,
        local_branch: &str,
        remote_branch: &str,
        upstream: &str,
    ) -> Result<MergeOutcome, ConflictError> {
        let base = backend
            .remote_tip(upstream, remote_branch)
            .map_err(ConflictError::Setup)?;

        match backend.branch_tip(TEMP_BRANCH) {
            Ok(leftover) => {
                tracing::warn!(
                    tip = %leftover.short(),
                    "{} still holds unreplayed commits, refusing to merge",
                    TEMP_BRANCH
                );
                return Err(ConflictError::Setup(VcsError::failed(
                    VcsOp::Branch,
                    format!("{} already exists", TEMP_BRANCH),
                )));
            }
            Err(VcsError::NotFound(_)) => {}
            Err(e) => return Err(ConflictError::Setup(e)),
        }

        backend
            .rename_branch(local_branch, TEMP_BRANCH, true)
            .map_err(ConflictError::Setup)?;
        let parked = backend
            .branch_tip(TEMP_BRANCH)
            .map_err(ConflictError::Setup)?;
        backend
            .create_branch(local_branch, &base, true)
            .and_then(|_| backend.checkout(local_branch))
            .map_err(ConflictError::Setup)?;

        let divergence = diverge(backend, &parked, &base)?;
        tracing::info!(
            base = %base.short(),
            local_commits = divergence.ours_only.len(),
            remote_commits = divergence.theirs_only.len(),
            "replaying local commits onto remote tip"
        );

        let mut replayed = Vec::with_capacity(divergence.ours_only.len());
        let mut skipped = 0;
        for commit in &divergence.ours_only {
            match self.replay(backend, commit) {
                Ok(Some(id)) => replayed.push(id),
                Ok(None) => skipped += 1,
                Err(source) => {
                    tracing::warn!(
                        commit = %commit,
                        replayed = replayed.len(),
                        "replay failed, keeping {} for recovery",
                        TEMP_BRANCH
                    );
                    return Err(ConflictError::Replay {
                        commit: commit.clone(),
                        replayed: replayed.len(),
                        source,
                    });
                }
            }
        }

        backend
            .delete_branch(TEMP_BRANCH)
            .map_err(ConflictError::Setup)?;

        Ok(MergeOutcome {
            base,
            common_ancestor: divergence.common_ancestor,
            replayed,
            skipped,
        })
    }
}
