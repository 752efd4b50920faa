//! Views: what the mount shows under each route
//!
//! | path                                    | view           |
//! |-----------------------------------------|----------------|
//! | `/`                                     | [`IndexView`]  |
//! | `/current/...`                          | [`CurrentView`]|
//! | `/history`, `/history/<date>`           | [`HistoryView`]|
//! | `/history/<date>/<HH-MM-SS>-<sha10>/...`| [`CommitView`] |
//!
//! Views receive paths relative to their route, without a leading slash.
//! Operations a view does not implement fail with `NotSupported`.

mod commit;
mod current;
mod history;
mod index;

pub use commit::CommitView;
pub use current::CurrentView;
pub use history::HistoryView;
pub use index::IndexView;

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use common::coord::CoordinationState;
use common::jobs::JobDispatcher;
use common::vcs::{EntryKind, VcsBackend};

use crate::caches::{CommitCache, IgnoreCache};
use crate::router::{FsError, FsResult, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

impl From<EntryKind> for FileKind {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::File | EntryKind::Executable => FileKind::File,
            EntryKind::Symlink => FileKind::Symlink,
            EntryKind::Directory => FileKind::Directory,
        }
    }
}

/// File attributes reported to the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub kind: FileKind,
    pub size: u64,
    /// Permission bits only
    pub perm: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: DateTime<Utc>,
}

impl Attr {
    pub fn directory(uid: u32, gid: u32, mtime: DateTime<Utc>) -> Self {
        Self {
            kind: FileKind::Directory,
            size: 0,
            perm: 0o555,
            nlink: 2,
            uid,
            gid,
            mtime,
        }
    }

    fn from_metadata(meta: &Metadata, uid: u32, gid: u32) -> Self {
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Directory
        } else {
            FileKind::File
        };
        let mtime = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Self {
            kind,
            size: meta.len(),
            perm: meta.mode() & 0o7777,
            nlink: meta.nlink() as u32,
            uid,
            gid,
            mtime,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

impl DirEntry {
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FileKind::Directory,
        }
    }
}

/// Shared state every view factory draws from
#[derive(Debug, Clone)]
pub struct ViewContext {
    pub mount_id: Uuid,
    pub mount_time: DateTime<Utc>,
    pub backend: Arc<dyn VcsBackend>,
    pub coordination: Arc<CoordinationState>,
    pub jobs: JobDispatcher,
    pub commits: Arc<CommitCache>,
    pub ignore: Arc<IgnoreCache>,
    pub uid: u32,
    pub gid: u32,
    /// Write-size guard, in bytes
    pub max_size: u64,
    /// Write-offset guard, in bytes
    pub max_offset: u64,
    /// Blob memo budget per commit view, in bytes
    pub memo_capacity: u64,
}

fn unsupported<T>(op: &'static str) -> FsResult<T> {
    Err(FsError::NotSupported(op))
}

/// Operations a route target may implement
pub trait View: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read-only views never see write calls; the router refuses them first
    fn read_only(&self) -> bool {
        true
    }

    fn getattr(&self, path: &Path) -> FsResult<Attr>;

    fn readdir(&self, _path: &Path) -> FsResult<Vec<DirEntry>> {
        unsupported("readdir")
    }

    fn readlink(&self, _path: &Path) -> FsResult<PathBuf> {
        unsupported("readlink")
    }

    fn access(&self, path: &Path, _mask: i32) -> FsResult<()> {
        self.getattr(path).map(|_| ())
    }

    /// Open for reading; read-only views refuse write access modes
    fn open(&self, path: &Path, flags: i32) -> FsResult<u64> {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(FsError::ReadOnly);
        }
        self.getattr(path).map(|_| 0)
    }

    fn read(&self, _path: &Path, _fh: u64, _offset: u64, _size: u32) -> FsResult<Vec<u8>> {
        unsupported("read")
    }

    fn write(&self, _path: &Path, _fh: u64, _offset: u64, _data: &[u8]) -> FsResult<usize> {
        unsupported("write")
    }

    fn truncate(&self, _path: &Path, _size: u64, _fh: Option<u64>) -> FsResult<()> {
        unsupported("truncate")
    }

    fn release(&self, _path: &Path, _fh: u64) -> FsResult<()> {
        Ok(())
    }

    fn create(&self, _path: &Path, _mode: u32) -> FsResult<u64> {
        unsupported("create")
    }

    fn unlink(&self, _path: &Path) -> FsResult<()> {
        unsupported("unlink")
    }

    fn mkdir(&self, _path: &Path, _mode: u32) -> FsResult<()> {
        unsupported("mkdir")
    }

    fn rmdir(&self, _path: &Path) -> FsResult<()> {
        unsupported("rmdir")
    }

    fn rename(&self, _from: &Path, _to: &Path) -> FsResult<()> {
        unsupported("rename")
    }

    fn symlink(&self, _path: &Path, _target: &str) -> FsResult<()> {
        unsupported("symlink")
    }

    fn chmod(&self, _path: &Path, _mode: u32) -> FsResult<()> {
        unsupported("chmod")
    }

    fn chown(&self, _path: &Path, _uid: u32, _gid: u32) -> FsResult<()> {
        unsupported("chown")
    }
}

/// The standard route table, most specific first
pub fn default_routes() -> FsResult<Vec<Route>> {
    Ok(vec![
        Route::new(
            r"/history/(?P<date>\d{4}-\d{1,2}-\d{1,2})/(?P<time>\d{1,2}-\d{1,2}-\d{1,2})-(?P<sha>[0-9a-f]{10})",
            |m, ctx| {
                let entry = format!("{}-{}", m.require("time")?, m.require("sha")?);
                let view = CommitView::new(ctx, m.require("date")?, &entry)?;
                Ok(Arc::new(view) as Arc<dyn View>)
            },
        )?,
        Route::new(r"/history/(?P<date>\d{4}-\d{1,2}-\d{1,2})", |m, ctx| {
            let date = m.require("date")?.to_string();
            Ok(Arc::new(HistoryView::new(ctx, Some(date))) as Arc<dyn View>)
        })?,
        Route::new("/history", |_, ctx| {
            Ok(Arc::new(HistoryView::new(ctx, None)) as Arc<dyn View>)
        })?,
        Route::new("/current", |_, ctx| {
            Ok(Arc::new(CurrentView::new(ctx)) as Arc<dyn View>)
        })?,
        Route::new("/", |_, ctx| Ok(Arc::new(IndexView::new(ctx)) as Arc<dyn View>))?,
    ])
}
