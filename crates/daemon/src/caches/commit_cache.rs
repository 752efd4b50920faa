//! Commit listing for the history views
//!
//! Commits on the mounted branch grouped by UTC day. Rebuilt wholesale from
//! a history walk after every local commit and every merge; history views
//! only ever read a snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use common::sync::Refresh;
use common::vcs::{walk, CommitRef, VcsBackend, VcsError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub id: CommitRef,
    pub time: DateTime<Utc>,
    pub message: String,
}

impl CommitSummary {
    pub fn date(&self) -> String {
        self.time.format("%Y-%m-%d").to_string()
    }

    /// Directory name under `/history/<date>`: `<HH-MM-SS>-<sha10>`
    pub fn entry_name(&self) -> String {
        format!("{}-{}", self.time.format("%H-%M-%S"), self.id.short())
    }
}

#[derive(Debug)]
pub struct CommitCache {
    branch: String,
    by_date: RwLock<BTreeMap<String, Vec<CommitSummary>>>,
}

impl CommitCache {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            by_date: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn rebuild(&self, backend: &dyn VcsBackend) -> Result<(), VcsError> {
        let tip = match backend.branch_tip(&self.branch) {
            Ok(tip) => tip,
            Err(VcsError::NotFound(_)) => {
                self.by_date.write().clear();
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut by_date: BTreeMap<String, Vec<CommitSummary>> = BTreeMap::new();
        for info in walk(backend, &tip) {
            let info = info?;
            let summary = CommitSummary {
                id: info.id,
                time: info.time,
                message: info.message,
            };
            by_date.entry(summary.date()).or_default().push(summary);
        }
        // the walk is newest-first; listings read oldest-first
        for commits in by_date.values_mut() {
            commits.reverse();
        }

        let count: usize = by_date.values().map(Vec::len).sum();
        tracing::debug!(branch = %self.branch, commits = count, days = by_date.len(), "rebuilt commit cache");
        *self.by_date.write() = by_date;
        Ok(())
    }

    /// Days with at least one commit, ascending
    pub fn dates(&self) -> Vec<String> {
        self.by_date.read().keys().cloned().collect()
    }

    pub fn commits_on(&self, date: &str) -> Option<Vec<CommitSummary>> {
        self.by_date.read().get(date).cloned()
    }

    /// Look up a commit by its history entry name
    pub fn find(&self, date: &str, entry: &str) -> Option<CommitSummary> {
        self.by_date
            .read()
            .get(date)?
            .iter()
            .find(|c| c.entry_name() == entry)
            .cloned()
    }

    pub fn latest(&self) -> Option<CommitSummary> {
        self.by_date
            .read()
            .values()
            .next_back()
            .and_then(|commits| commits.last().cloned())
    }

    pub fn len(&self) -> usize {
        self.by_date.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.read().is_empty()
    }
}

impl Refresh for CommitCache {
    fn name(&self) -> &'static str {
        "commits"
    }

    fn refresh(&self, backend: &dyn VcsBackend) -> Result<(), VcsError> {
        self.rebuild(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::vcs::{Identity, MemoryBackend, MemoryRemote};
    use std::path::PathBuf;

    fn backend() -> MemoryBackend {
        let remote = MemoryRemote::new();
        remote.commit_files("master", &[("a", "1")], "initial");
        MemoryBackend::clone_from(remote, "origin", "master")
    }

    #[test]
    fn test_entry_name_format() {
        let summary = CommitSummary {
            id: CommitRef::new("0123456789abcdef"),
            time: Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 3).unwrap(),
            message: "m".into(),
        };
        assert_eq!(summary.date(), "2024-03-09");
        assert_eq!(summary.entry_name(), "07-05-03-0123456789");
    }

    #[test]
    fn test_rebuild_lists_commits_oldest_first() {
        let backend = backend();
        let who = Identity::new("t", "t@localhost");
        backend.write_file("b", "2");
        backend.stage(&[PathBuf::from("b")]).unwrap();
        backend.commit("second", &who, &who, None).unwrap().unwrap();

        let cache = CommitCache::new("master");
        assert!(cache.is_empty());
        cache.refresh(&backend).unwrap();
        assert_eq!(cache.len(), 2);

        let latest = cache.latest().unwrap();
        assert_eq!(latest.message, "second");
        let day = cache.commits_on(&latest.date()).unwrap();
        assert_eq!(day.last().unwrap().message, "second");

        let found = cache.find(&latest.date(), &latest.entry_name()).unwrap();
        assert_eq!(found.id, latest.id);
        assert!(cache.find(&latest.date(), "00-00-00-ffffffffff").is_none());
    }

    #[test]
    fn test_missing_branch_empties_cache() {
        let backend = backend();
        let cache = CommitCache::new("master");
        cache.rebuild(&backend).unwrap();
        assert!(!cache.is_empty());

        let other = CommitCache::new("no-such-branch");
        other.rebuild(&backend).unwrap();
        assert!(other.dates().is_empty());
    }
}
