//! Writable passthrough onto the working tree
//!
//! Every mutation is applied to disk immediately and described to the sync
//! engine as a [`Job`]. Writes through a file handle are only reported when
//! the handle is released, so a burst of small writes becomes one job.

use std::collections::HashMap;
use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use common::coord::CoordinationState;
use common::jobs::{Job, JobDispatcher};

use crate::caches::{is_git_dir, IgnoreCache};
use crate::router::{FsError, FsResult};

use super::{Attr, DirEntry, FileKind, View, ViewContext};

const KEEP_FILE: &str = ".keep";

#[derive(Debug)]
struct OpenFile {
    file: Arc<File>,
    /// Written to since open; reported on release
    dirty: bool,
    /// Tripped the size guard; removed on release instead of reported
    doomed: bool,
}

#[derive(Debug)]
pub struct CurrentView {
    root: PathBuf,
    jobs: JobDispatcher,
    coordination: Arc<CoordinationState>,
    ignore: Arc<IgnoreCache>,
    uid: u32,
    gid: u32,
    max_size: u64,
    max_offset: u64,
    handles: Mutex<HashMap<u64, OpenFile>>,
    next_fh: AtomicU64,
}

impl CurrentView {
    pub fn new(ctx: &ViewContext) -> Self {
        Self {
            root: ctx.backend.workdir().to_path_buf(),
            jobs: ctx.jobs.clone(),
            coordination: ctx.coordination.clone(),
            ignore: ctx.ignore.clone(),
            uid: ctx.uid,
            gid: ctx.gid,
            max_size: ctx.max_size,
            max_offset: ctx.max_offset,
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    /// Absolute path on disk; the repository's own metadata stays hidden
    fn full(&self, path: &Path) -> FsResult<PathBuf> {
        if is_git_dir(path) {
            return Err(FsError::NotFound(path.display().to_string()));
        }
        Ok(self.root.join(path))
    }

    fn register(&self, file: File, dirty: bool) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(
            fh,
            OpenFile {
                file: Arc::new(file),
                dirty,
                doomed: false,
            },
        );
        fh
    }

    fn file(&self, fh: u64) -> FsResult<Arc<File>> {
        self.handles
            .lock()
            .get(&fh)
            .map(|h| h.file.clone())
            .ok_or_else(|| FsError::Io(io::Error::from_raw_os_error(libc::EBADF)))
    }

    fn mark_dirty(&self, fh: u64) {
        if let Some(handle) = self.handles.lock().get_mut(&fh) {
            handle.dirty = true;
        }
    }

    fn doom(&self, fh: u64) {
        if let Some(handle) = self.handles.lock().get_mut(&fh) {
            handle.doomed = true;
        }
    }

    /// Queue a job, dropping ignored paths; nothing is queued if none remain
    fn enqueue(&self, mut job: Job) {
        job.add.retain(|p| !self.ignore.is_ignored(p));
        job.remove.retain(|p| !self.ignore.is_ignored(p));
        if job.add.is_empty() && job.remove.is_empty() {
            tracing::trace!(message = %job.message, "only ignored paths, no job");
            return;
        }
        tracing::debug!(message = %job.message, "queued job");
        if let Err(e) = self.jobs.dispatch(job) {
            tracing::error!(error = %e, "dropping job, sync engine is gone");
        }
    }

    /// Files and symlinks under `rel`, relative to the tree root
    fn files_under(&self, rel: &Path) -> io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut pending = vec![rel.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(self.root.join(&dir))? {
                let entry = entry?;
                let path = dir.join(entry.file_name());
                if entry.file_type()?.is_dir() {
                    pending.push(path);
                } else {
                    found.push(path);
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

impl View for CurrentView {
    fn name(&self) -> &'static str {
        "current"
    }

    fn read_only(&self) -> bool {
        false
    }

    fn getattr(&self, path: &Path) -> FsResult<Attr> {
        let meta = fs::symlink_metadata(self.full(path)?)?;
        Ok(Attr::from_metadata(&meta, self.uid, self.gid))
    }

    fn readdir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.full(path)?)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_git_dir(&path.join(&name)) {
                continue;
            }
            let file_type = entry.file_type()?;
            let kind = if file_type.is_symlink() {
                FileKind::Symlink
            } else if file_type.is_dir() {
                FileKind::Directory
            } else {
                FileKind::File
            };
            entries.push(DirEntry { name, kind });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        Ok(fs::read_link(self.full(path)?)?)
    }

    fn access(&self, path: &Path, _mask: i32) -> FsResult<()> {
        fs::symlink_metadata(self.full(path)?)?;
        Ok(())
    }

    fn open(&self, path: &Path, flags: i32) -> FsResult<u64> {
        let access = flags & libc::O_ACCMODE;
        let writable = access != libc::O_RDONLY;
        let truncate = writable && flags & libc::O_TRUNC != 0;
        let file = OpenOptions::new()
            .read(access != libc::O_WRONLY)
            .write(writable)
            .truncate(truncate)
            .open(self.full(path)?)?;
        Ok(self.register(file, truncate))
    }

    fn read(&self, _path: &Path, fh: u64, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let file = self.file(fh)?;
        let mut buf = vec![0; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn write(&self, path: &Path, fh: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        let end = offset.saturating_add(data.len() as u64);
        if offset > self.max_offset || end > self.max_size {
            tracing::warn!(path = %path.display(), offset, end, "write exceeds size limits");
            self.doom(fh);
            return Err(FsError::TooLarge);
        }
        let file = self.file(fh)?;
        file.write_all_at(data, offset)?;
        self.mark_dirty(fh);
        Ok(data.len())
    }

    fn truncate(&self, path: &Path, size: u64, fh: Option<u64>) -> FsResult<()> {
        if size > self.max_size {
            if let Some(fh) = fh {
                self.doom(fh);
            }
            return Err(FsError::TooLarge);
        }
        match fh {
            Some(fh) => {
                self.file(fh)?.set_len(size)?;
                self.mark_dirty(fh);
            }
            None => {
                OpenOptions::new()
                    .write(true)
                    .open(self.full(path)?)?
                    .set_len(size)?;
                self.enqueue(Job::update(path, format!("Update {}", path.display())));
            }
        }
        Ok(())
    }

    fn release(&self, path: &Path, fh: u64) -> FsResult<()> {
        let Some(handle) = self.handles.lock().remove(&fh) else {
            return Ok(());
        };
        drop(handle.file);

        if handle.doomed {
            // release is not a write call, so the removal is admitted here
            let _writer = self.coordination.admit_write().map_err(|e| {
                tracing::warn!(path = %path.display(), error = %e, "oversized file left in place");
                FsError::from(e)
            })?;
            tracing::info!(path = %path.display(), "removing oversized file");
            match fs::remove_file(self.full(path)?) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }
        if handle.dirty {
            self.enqueue(Job::update(path, format!("Update {}", path.display())));
        }
        Ok(())
    }

    fn create(&self, path: &Path, mode: u32) -> FsResult<u64> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode & 0o7777)
            .open(self.full(path)?)?;
        Ok(self.register(file, true))
    }

    fn unlink(&self, path: &Path) -> FsResult<()> {
        fs::remove_file(self.full(path)?)?;
        self.enqueue(Job::remove(path, format!("Deleted {}", path.display())));
        Ok(())
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        let full = self.full(path)?;
        DirBuilder::new().mode(mode & 0o7777).create(&full)?;
        // git does not track empty directories
        File::create(full.join(KEEP_FILE))?;
        self.enqueue(Job::update(
            path.join(KEEP_FILE),
            format!("Create the {} directory", path.display()),
        ));
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> FsResult<()> {
        let full = self.full(path)?;
        let mut has_keep = false;
        for entry in fs::read_dir(&full)? {
            if entry?.file_name() == KEEP_FILE {
                has_keep = true;
            } else {
                return Err(FsError::NotEmpty(path.display().to_string()));
            }
        }
        if has_keep {
            fs::remove_file(full.join(KEEP_FILE))?;
        }
        fs::remove_dir(&full)?;
        if has_keep {
            self.enqueue(Job::remove(
                path.join(KEEP_FILE),
                format!("Delete the {} directory", path.display()),
            ));
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        let from_full = self.full(from)?;
        let to_full = self.full(to)?;
        let is_dir = fs::symlink_metadata(&from_full)?.is_dir();
        fs::rename(&from_full, &to_full)?;

        let (add, remove) = if is_dir {
            let added = self.files_under(to)?;
            let removed = added
                .iter()
                .map(|p| from.join(p.strip_prefix(to).unwrap_or(p)))
                .collect();
            (added, removed)
        } else {
            (vec![to.to_path_buf()], vec![from.to_path_buf()])
        };
        self.enqueue(Job::new(
            add,
            remove,
            format!("Rename {} to {}", from.display(), to.display()),
        ));
        Ok(())
    }

    fn symlink(&self, path: &Path, target: &str) -> FsResult<()> {
        std::os::unix::fs::symlink(target, self.full(path)?)?;
        self.enqueue(Job::update(
            path,
            format!("Create symlink to {} for {}", target, path.display()),
        ));
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        fs::set_permissions(self.full(path)?, Permissions::from_mode(mode & 0o7777))?;
        self.enqueue(Job::update(
            path,
            format!("Chmod to {:o} on {}", mode & 0o777, path.display()),
        ));
        Ok(())
    }
}
