use std::path::Path;

use chrono::{DateTime, Utc};

use crate::router::{FsError, FsResult};

use super::{Attr, DirEntry, View, ViewContext};

/// The mount root: `current` and `history`
#[derive(Debug)]
pub struct IndexView {
    uid: u32,
    gid: u32,
    mount_time: DateTime<Utc>,
}

impl IndexView {
    pub fn new(ctx: &ViewContext) -> Self {
        Self {
            uid: ctx.uid,
            gid: ctx.gid,
            mount_time: ctx.mount_time,
        }
    }
}

impl View for IndexView {
    fn name(&self) -> &'static str {
        "index"
    }

    fn getattr(&self, path: &Path) -> FsResult<Attr> {
        if path.as_os_str().is_empty() {
            return Ok(Attr::directory(self.uid, self.gid, self.mount_time));
        }
        Err(FsError::NotFound(path.display().to_string()))
    }

    fn readdir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        if !path.as_os_str().is_empty() {
            return Err(FsError::NotFound(path.display().to_string()));
        }
        Ok(vec![DirEntry::dir("current"), DirEntry::dir("history")])
    }
}
