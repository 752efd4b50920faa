use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use super::{CommitInfo, CommitRef, VcsBackend, VcsError};

/// Newest-first history walk that loads one commit at a time
///
/// Commits are yielded by descending commit time; commits with equal times
/// come out in discovery order, which keeps children ahead of their parents
/// on linear history. The walk stops after the first error.
pub struct History<'a> {
    backend: &'a dyn VcsBackend,
    queue: BinaryHeap<Pending>,
    seen: HashSet<CommitRef>,
    start: Option<CommitRef>,
    discovered: u64,
    done: bool,
}

struct Pending {
    info: CommitInfo,
    order: u64,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // max-heap: newest time first, then earliest discovered
    fn cmp(&self, other: &Self) -> Ordering {
        self.info
            .time
            .cmp(&other.info.time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl<'a> History<'a> {
    pub fn new(backend: &'a dyn VcsBackend, start: CommitRef) -> Self {
        Self {
            backend,
            queue: BinaryHeap::new(),
            seen: HashSet::new(),
            start: Some(start),
            discovered: 0,
            done: false,
        }
    }

    fn discover(&mut self, id: CommitRef) -> Result<(), VcsError> {
        if !self.seen.insert(id.clone()) {
            return Ok(());
        }
        let info = self.backend.commit_info(&id)?;
        self.queue.push(Pending {
            info,
            order: self.discovered,
        });
        self.discovered += 1;
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<CommitInfo>, VcsError> {
        if let Some(start) = self.start.take() {
            self.discover(start)?;
        }
        let Some(Pending { info, .. }) = self.queue.pop() else {
            return Ok(None);
        };
        for parent in &info.parents {
            self.discover(parent.clone())?;
        }
        Ok(Some(info))
    }
}

impl Iterator for History<'_> {
    type Item = Result<CommitInfo, VcsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(info)) => Some(Ok(info)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
