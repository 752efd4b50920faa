//! Caches derived from the repository and rebuilt by the sync engine

mod commit_cache;
mod ignore;

pub use commit_cache::{CommitCache, CommitSummary};
pub use ignore::{is_git_dir, IgnoreCache};
