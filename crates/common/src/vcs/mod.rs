//! Version-control backend contract
//!
//! The sync engine, the conflict strategy and the views only ever talk to a
//! repository through [`VcsBackend`]. Two implementations ship with the crate:
//!
//! - [`GitBackend`]: a real on-disk repository driven through `git2`
//! - [`MemoryBackend`]: an in-memory commit graph with a shared
//!   [`MemoryRemote`], used to exercise the engine deterministically
//!
//! All paths handed to a backend are relative to the repository root.

mod error;
mod git;
mod history;
mod memory;

pub use error::{VcsError, VcsOp};
pub use git::GitBackend;
pub use history::History;
pub use memory::{MemoryBackend, MemoryRemote};

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque commit identifier (hex object id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitRef(String);

impl CommitRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first ten hex characters, as shown in history listings
    pub fn short(&self) -> &str {
        let end = self.0.len().min(10);
        &self.0[..end]
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Author or committer identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Commit metadata as seen by a history walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: CommitRef,
    pub parents: Vec<CommitRef>,
    pub time: DateTime<Utc>,
    pub message: String,
    pub author: Identity,
    pub committer: Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Executable,
    Symlink,
    Directory,
}

impl EntryKind {
    /// Unix permission bits for the entry
    pub fn mode(&self) -> u32 {
        match self {
            EntryKind::File => 0o644,
            EntryKind::Executable => 0o755,
            EntryKind::Symlink => 0o777,
            EntryKind::Directory => 0o755,
        }
    }
}

/// A tree entry inside a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Blob size in bytes, 0 for directories
    pub size: u64,
}

/// File contents at a commit; for symlinks `data` is the link target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub data: Vec<u8>,
    pub kind: EntryKind,
}

impl FileContent {
    pub fn file(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            kind: EntryKind::File,
        }
    }
}

/// Narrow interface onto the repository shared by every mount component
///
/// Implementations serialize access internally and are safe to call from
/// any thread; callers are still expected to respect the coordination
/// protocol before mutating the index or the working tree.
pub trait VcsBackend: Send + Sync + fmt::Debug {
    /// Root of the working tree
    fn workdir(&self) -> &Path;

    /// Tip of a local branch
    fn branch_tip(&self, branch: &str) -> Result<CommitRef, VcsError>;

    /// Tip of the remote-tracking ref `<upstream>/<branch>`
    fn remote_tip(&self, upstream: &str, branch: &str) -> Result<CommitRef, VcsError>;

    fn commit_info(&self, id: &CommitRef) -> Result<CommitInfo, VcsError>;

    /// Commits the local branch has that the remote-tracking ref lacks, and vice versa
    fn ahead_behind(&self, branch: &str, upstream: &str) -> Result<(usize, usize), VcsError>;

    /// Reconcile the index with the working tree for `paths`
    ///
    /// Paths present on disk are added, missing ones are removed.
    fn stage(&self, paths: &[PathBuf]) -> Result<(), VcsError>;

    /// Commit the index on top of HEAD (or `parents` when given)
    ///
    /// Returns `None` when the resulting tree equals the single parent's
    /// tree, i.e. there is nothing to commit.
    fn commit(
        &self,
        message: &str,
        author: &Identity,
        committer: &Identity,
        parents: Option<&[CommitRef]>,
    ) -> Result<Option<CommitRef>, VcsError>;

    fn create_branch(&self, name: &str, at: &CommitRef, force: bool) -> Result<(), VcsError>;

    fn rename_branch(&self, from: &str, to: &str, force: bool) -> Result<(), VcsError>;

    fn delete_branch(&self, name: &str) -> Result<(), VcsError>;

    /// Point HEAD at `branch` and force the index and working tree to match it
    fn checkout(&self, branch: &str) -> Result<(), VcsError>;

    /// Update the remote-tracking ref for `branch` from `upstream`
    fn fetch(&self, upstream: &str, branch: &str) -> Result<(), VcsError>;

    fn push(&self, upstream: &str, branch: &str) -> Result<(), VcsError>;

    /// Paths whose working tree state differs from HEAD
    fn status(&self) -> Result<Vec<PathBuf>, VcsError>;

    /// Paths a commit touched relative to its first parent
    fn changed_paths(&self, id: &CommitRef) -> Result<Vec<PathBuf>, VcsError>;

    /// File contents at a commit; `None` if the path is absent or a directory
    fn read_file(&self, id: &CommitRef, path: &Path) -> Result<Option<FileContent>, VcsError>;

    fn list_dir(&self, id: &CommitRef, path: &Path) -> Result<Vec<TreeEntry>, VcsError>;

    /// Entry metadata at a commit; the empty path is the root directory
    fn entry(&self, id: &CommitRef, path: &Path) -> Result<Option<TreeEntry>, VcsError>;

    /// Write (or with `None`, delete) a file in the working tree
    fn write_worktree(&self, path: &Path, content: Option<&FileContent>) -> Result<(), VcsError>;

    fn is_ignored(&self, path: &Path) -> Result<bool, VcsError>;
}

/// Lazily walk history newest-first starting at `from`
pub fn walk<'a>(backend: &'a dyn VcsBackend, from: &CommitRef) -> History<'a> {
    History::new(backend, from.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_ref() {
        let id = CommitRef::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789");
        assert_eq!(CommitRef::new("abc").short(), "abc");
    }

    #[test]
    fn test_identity_display() {
        let who = Identity::new("Jo", "jo@example.com");
        assert_eq!(who.to_string(), "Jo <jo@example.com>");
    }
}
