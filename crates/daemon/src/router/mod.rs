//! Path routing for filesystem calls
//!
//! The driver hands every call to [`Router::dispatch`] with the absolute
//! mount path. Routes are tried in registration order; the first whose
//! pattern matches picks the view. View instances are cached per matched
//! prefix, so `/history/2024-01-02` is built once and reused until evicted.

mod error;
mod route;

pub use error::{FsError, FsResult};
pub use route::{Route, RouteMatch, ViewFactory};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use common::cache::{BoundedCache, CacheStats};

use crate::views::{Attr, DirEntry, View, ViewContext};

/// A filesystem operation and its arguments, minus the path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsCall<'a> {
    GetAttr,
    ReadDir,
    ReadLink,
    Access { mask: i32 },
    Open { flags: i32 },
    Read { fh: u64, offset: u64, size: u32 },
    Write { fh: u64, offset: u64, data: &'a [u8] },
    Truncate { size: u64, fh: Option<u64> },
    Release { fh: u64 },
    Create { mode: u32 },
    Unlink,
    Mkdir { mode: u32 },
    Rmdir,
    /// Destination is an absolute mount path
    Rename { to: &'a str },
    Symlink { target: &'a str },
    Chmod { mode: u32 },
    Chown { uid: u32, gid: u32 },
}

impl FsCall<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            FsCall::GetAttr => "getattr",
            FsCall::ReadDir => "readdir",
            FsCall::ReadLink => "readlink",
            FsCall::Access { .. } => "access",
            FsCall::Open { .. } => "open",
            FsCall::Read { .. } => "read",
            FsCall::Write { .. } => "write",
            FsCall::Truncate { .. } => "truncate",
            FsCall::Release { .. } => "release",
            FsCall::Create { .. } => "create",
            FsCall::Unlink => "unlink",
            FsCall::Mkdir { .. } => "mkdir",
            FsCall::Rmdir => "rmdir",
            FsCall::Rename { .. } => "rename",
            FsCall::Symlink { .. } => "symlink",
            FsCall::Chmod { .. } => "chmod",
            FsCall::Chown { .. } => "chown",
        }
    }

    /// Calls that mutate the tree and must pass write admission
    pub fn is_write(&self) -> bool {
        match self {
            // a writable open with O_TRUNC empties the file before any write
            FsCall::Open { flags } => {
                flags & libc::O_ACCMODE != libc::O_RDONLY && flags & libc::O_TRUNC != 0
            }
            FsCall::Write { .. }
            | FsCall::Truncate { .. }
            | FsCall::Create { .. }
            | FsCall::Unlink
            | FsCall::Mkdir { .. }
            | FsCall::Rmdir
            | FsCall::Rename { .. }
            | FsCall::Symlink { .. }
            | FsCall::Chmod { .. }
            | FsCall::Chown { .. } => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsReply {
    Attr(Attr),
    Entries(Vec<DirEntry>),
    Link(PathBuf),
    /// File handle from open or create
    Handle(u64),
    Data(Vec<u8>),
    Written(usize),
    Done,
}

pub struct Router {
    routes: Vec<Route>,
    views: BoundedCache<String, Arc<dyn View>>,
    context: ViewContext,
}

impl Router {
    pub fn new(context: ViewContext, cache_capacity: u64) -> Self {
        Self {
            routes: Vec::new(),
            views: BoundedCache::new(cache_capacity),
            context,
        }
    }

    /// Append a route; earlier routes take precedence
    pub fn register(&mut self, route: Route) {
        tracing::debug!(pattern = route.pattern(), "registered route");
        self.routes.push(route);
    }

    pub fn context(&self) -> &ViewContext {
        &self.context
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.views.stats()
    }

    fn find(&self, path: &str) -> FsResult<(&Route, RouteMatch)> {
        for route in &self.routes {
            if let Some(matched) = route.matches(path) {
                return Ok((route, matched));
            }
        }
        tracing::error!(path, "no route matches path");
        Err(FsError::NoRoute(path.to_string()))
    }

    /// The view serving `path`, built on first use
    pub fn resolve(&self, path: &str) -> FsResult<(Arc<dyn View>, RouteMatch)> {
        let (route, matched) = self.find(path)?;
        let view = self
            .views
            .try_get_or_insert_with(matched.prefix.clone(), || {
                tracing::debug!(prefix = %matched.prefix, "building view");
                route.build(&matched, &self.context)
            })?;
        Ok((view, matched))
    }

    pub fn dispatch(&self, path: &str, call: FsCall<'_>) -> FsResult<FsReply> {
        let (view, matched) = self.resolve(path)?;
        let rel = matched.view_path();
        tracing::trace!(op = call.name(), path, view = view.name(), "dispatch");

        let _writer = if call.is_write() {
            if view.read_only() {
                return Err(FsError::ReadOnly);
            }
            Some(self.context.coordination.admit_write()?)
        } else {
            None
        };

        match call {
            FsCall::GetAttr => view.getattr(&rel).map(FsReply::Attr),
            FsCall::ReadDir => view.readdir(&rel).map(FsReply::Entries),
            FsCall::ReadLink => view.readlink(&rel).map(FsReply::Link),
            FsCall::Access { mask } => view.access(&rel, mask).map(|_| FsReply::Done),
            FsCall::Open { flags } => view.open(&rel, flags).map(FsReply::Handle),
            FsCall::Read { fh, offset, size } => {
                view.read(&rel, fh, offset, size).map(FsReply::Data)
            }
            FsCall::Write { fh, offset, data } => {
                view.write(&rel, fh, offset, data).map(FsReply::Written)
            }
            FsCall::Truncate { size, fh } => view.truncate(&rel, size, fh).map(|_| FsReply::Done),
            FsCall::Release { fh } => view.release(&rel, fh).map(|_| FsReply::Done),
            FsCall::Create { mode } => view.create(&rel, mode).map(FsReply::Handle),
            FsCall::Unlink => view.unlink(&rel).map(|_| FsReply::Done),
            FsCall::Mkdir { mode } => view.mkdir(&rel, mode).map(|_| FsReply::Done),
            FsCall::Rmdir => view.rmdir(&rel).map(|_| FsReply::Done),
            FsCall::Rename { to } => {
                let (_, target) = self.find(to)?;
                if target.prefix != matched.prefix {
                    return Err(FsError::NotSupported("rename across views"));
                }
                view.rename(&rel, &target.view_path()).map(|_| FsReply::Done)
            }
            FsCall::Symlink { target } => view.symlink(&rel, target).map(|_| FsReply::Done),
            FsCall::Chmod { mode } => view.chmod(&rel, mode).map(|_| FsReply::Done),
            FsCall::Chown { uid, gid } => view.chown(&rel, uid, gid).map(|_| FsReply::Done),
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .field("views", &self.views)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_classification() {
        assert!(FsCall::Write {
            fh: 1,
            offset: 0,
            data: b"x"
        }
        .is_write());
        assert!(FsCall::Rename { to: "/current/b" }.is_write());
        assert!(FsCall::Chown { uid: 0, gid: 0 }.is_write());
        assert!(!FsCall::Release { fh: 1 }.is_write());
        assert!(!FsCall::Open { flags: libc::O_RDWR }.is_write());
        assert!(!FsCall::GetAttr.is_write());
    }

    #[test]
    fn test_truncating_open_is_a_write() {
        assert!(FsCall::Open {
            flags: libc::O_WRONLY | libc::O_TRUNC
        }
        .is_write());
        assert!(FsCall::Open {
            flags: libc::O_RDWR | libc::O_TRUNC
        }
        .is_write());
        // O_TRUNC without write access is ignored by open(2)
        assert!(!FsCall::Open {
            flags: libc::O_RDONLY | libc::O_TRUNC
        }
        .is_write());
        assert!(!FsCall::Open {
            flags: libc::O_WRONLY | libc::O_APPEND
        }
        .is_write());
    }
}
