use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::caches::CommitCache;
use crate::router::{FsError, FsResult};

use super::{Attr, DirEntry, View, ViewContext};

/// `/history` lists commit days; `/history/<date>` lists that day's commits
#[derive(Debug)]
pub struct HistoryView {
    commits: Arc<CommitCache>,
    date: Option<String>,
    uid: u32,
    gid: u32,
    mount_time: DateTime<Utc>,
}

impl HistoryView {
    pub fn new(ctx: &ViewContext, date: Option<String>) -> Self {
        Self {
            commits: ctx.commits.clone(),
            date,
            uid: ctx.uid,
            gid: ctx.gid,
            mount_time: ctx.mount_time,
        }
    }

    fn dir(&self, mtime: DateTime<Utc>) -> Attr {
        Attr::directory(self.uid, self.gid, mtime)
    }

    fn not_found(path: &Path) -> FsError {
        FsError::NotFound(path.display().to_string())
    }
}

impl View for HistoryView {
    fn name(&self) -> &'static str {
        "history"
    }

    fn getattr(&self, path: &Path) -> FsResult<Attr> {
        let name = path.to_str().ok_or_else(|| Self::not_found(path))?;
        match (&self.date, name) {
            (None, "") => {
                let mtime = self
                    .commits
                    .latest()
                    .map(|c| c.time)
                    .unwrap_or(self.mount_time);
                Ok(self.dir(mtime))
            }
            (None, date) => {
                let last = self
                    .commits
                    .commits_on(date)
                    .and_then(|day| day.last().cloned())
                    .ok_or_else(|| Self::not_found(path))?;
                Ok(self.dir(last.time))
            }
            (Some(date), "") => {
                let last = self
                    .commits
                    .commits_on(date)
                    .and_then(|day| day.last().cloned())
                    .ok_or_else(|| Self::not_found(path))?;
                Ok(self.dir(last.time))
            }
            (Some(date), entry) => {
                let commit = self
                    .commits
                    .find(date, entry)
                    .ok_or_else(|| Self::not_found(path))?;
                Ok(self.dir(commit.time))
            }
        }
    }

    fn readdir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        if !path.as_os_str().is_empty() {
            return Err(Self::not_found(path));
        }
        match &self.date {
            None => Ok(self.commits.dates().into_iter().map(DirEntry::dir).collect()),
            Some(date) => {
                let day = self
                    .commits
                    .commits_on(date)
                    .ok_or_else(|| FsError::NotFound(date.clone()))?;
                Ok(day.iter().map(|c| DirEntry::dir(c.entry_name())).collect())
            }
        }
    }
}
