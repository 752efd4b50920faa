use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::cache::BoundedCache;
use common::vcs::{EntryKind, VcsBackend};

use crate::caches::CommitSummary;
use crate::router::{FsError, FsResult};

use super::{Attr, DirEntry, View, ViewContext};

/// Read-only tree of a single commit
///
/// Blob contents are memoized, weighted by size, since the same files tend
/// to be read in many small chunks.
pub struct CommitView {
    commit: CommitSummary,
    backend: Arc<dyn VcsBackend>,
    blobs: BoundedCache<PathBuf, Arc<Vec<u8>>>,
    uid: u32,
    gid: u32,
}

impl CommitView {
    pub fn new(ctx: &ViewContext, date: &str, entry: &str) -> FsResult<Self> {
        let commit = ctx
            .commits
            .find(date, entry)
            .ok_or_else(|| FsError::NotFound(format!("{}/{}", date, entry)))?;
        Ok(Self {
            commit,
            backend: ctx.backend.clone(),
            blobs: BoundedCache::with_weigher(ctx.memo_capacity, |data: &Arc<Vec<u8>>| {
                data.len() as u64
            }),
            uid: ctx.uid,
            gid: ctx.gid,
        })
    }

    pub fn commit(&self) -> &CommitSummary {
        &self.commit
    }

    fn blob(&self, path: &Path) -> FsResult<Arc<Vec<u8>>> {
        self.blobs.try_get_or_insert_with(path.to_path_buf(), || {
            let content = self
                .backend
                .read_file(&self.commit.id, path)?
                .ok_or_else(|| FsError::NotFound(path.display().to_string()))?;
            Ok(Arc::new(content.data))
        })
    }
}

impl View for CommitView {
    fn name(&self) -> &'static str {
        "commit"
    }

    fn getattr(&self, path: &Path) -> FsResult<Attr> {
        let entry = self
            .backend
            .entry(&self.commit.id, path)?
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))?;
        let mut attr = Attr::directory(self.uid, self.gid, self.commit.time);
        attr.kind = entry.kind.into();
        attr.size = entry.size;
        if entry.kind != EntryKind::Directory {
            // no write bits: the tree is immutable
            attr.perm = entry.kind.mode() & 0o555;
            attr.nlink = 1;
        }
        Ok(attr)
    }

    fn readdir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        let entries = self.backend.list_dir(&self.commit.id, path)?;
        Ok(entries
            .into_iter()
            .map(|e| DirEntry {
                name: e.name,
                kind: e.kind.into(),
            })
            .collect())
    }

    fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        let content = self
            .backend
            .read_file(&self.commit.id, path)?
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))?;
        if content.kind != EntryKind::Symlink {
            return Err(FsError::Io(std::io::Error::from_raw_os_error(libc::EINVAL)));
        }
        Ok(PathBuf::from(OsStr::from_bytes(&content.data)))
    }

    fn read(&self, path: &Path, _fh: u64, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let data = self.blob(path)?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(size as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }
}

impl std::fmt::Debug for CommitView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitView")
            .field("commit", &self.commit.id)
            .field("blobs", &self.blobs)
            .finish()
    }
}
