//! Filesystem side of gitmount
//!
//! A [`Mount`] exposes a git clone as a directory tree: `/current` is the
//! live, writable working tree and `/history` browses past commits. The
//! filesystem driver itself is external; it forwards each call to
//! [`Router::dispatch`] and maps [`FsError::errno`] back to the kernel.

pub mod caches;
pub mod config;
pub mod mount;
pub mod router;
pub mod views;

pub use config::{ConfigError, MountConfig};
pub use mount::Mount;
pub use router::{FsCall, FsError, FsReply, FsResult, Route, RouteMatch, Router};
pub use views::{Attr, DirEntry, FileKind, View, ViewContext};
