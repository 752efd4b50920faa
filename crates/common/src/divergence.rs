//! Common ancestor and divergent commit lists between two tips
//!
//! Both histories are walked newest-first in lockstep. Each step advances
//! ours, then theirs; the first commit one side sees that the other side has
//! already seen is the common ancestor. Checking ours first makes the result
//! deterministic when both sides would match in the same step.

use std::collections::HashSet;

use crate::vcs::{walk, CommitRef, History, VcsBackend};

/// Outcome of comparing two tips
///
/// Both lists run oldest to newest and never contain the ancestor. Equal
/// tips give no ancestor and two empty lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DivergeResult {
    pub common_ancestor: Option<CommitRef>,
    pub ours_only: Vec<CommitRef>,
    pub theirs_only: Vec<CommitRef>,
}

impl DivergeResult {
    /// The tips were identical, there is nothing to merge
    pub fn is_equal(&self) -> bool {
        self.common_ancestor.is_none() && self.ours_only.is_empty() && self.theirs_only.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DivergenceError {
    #[error("history unavailable for {reference}: {detail}")]
    HistoryUnavailable { reference: CommitRef, detail: String },
}

/// One side of the lockstep walk
struct Side<'a> {
    tip: &'a CommitRef,
    history: History<'a>,
    seen: Vec<CommitRef>,
    members: HashSet<CommitRef>,
    exhausted: bool,
}

impl<'a> Side<'a> {
    fn new(backend: &'a dyn VcsBackend, tip: &'a CommitRef) -> Self {
        Self {
            tip,
            history: walk(backend, tip),
            seen: Vec::new(),
            members: HashSet::new(),
            exhausted: false,
        }
    }

    fn advance(&mut self) -> Result<Option<CommitRef>, DivergenceError> {
        if self.exhausted {
            return Ok(None);
        }
        match self.history.next() {
            Some(Ok(info)) => Ok(Some(info.id)),
            Some(Err(e)) => Err(DivergenceError::HistoryUnavailable {
                reference: self.tip.clone(),
                detail: e.to_string(),
            }),
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    fn record(&mut self, id: CommitRef) {
        self.members.insert(id.clone());
        self.seen.push(id);
    }

    /// Commits seen before `ancestor`, oldest first
    fn unique_until(mut self, ancestor: &CommitRef) -> Vec<CommitRef> {
        if let Some(pos) = self.seen.iter().position(|id| id == ancestor) {
            self.seen.truncate(pos);
        }
        self.seen.reverse();
        self.seen
    }
}

/// Compute the common ancestor of `ours` and `theirs` and the commits
/// unique to each side
pub fn diverge(
    backend: &dyn VcsBackend,
    ours: &CommitRef,
    theirs: &CommitRef,
) -> Result<DivergeResult, DivergenceError> {
    if ours == theirs {
        return Ok(DivergeResult::default());
    }

    let mut our_side = Side::new(backend, ours);
    let mut their_side = Side::new(backend, theirs);

    loop {
        if let Some(id) = our_side.advance()? {
            if their_side.members.contains(&id) {
                return Ok(split(our_side, their_side, id));
            }
            our_side.record(id);
        }

        if let Some(id) = their_side.advance()? {
            if our_side.members.contains(&id) {
                return Ok(split(our_side, their_side, id));
            }
            their_side.record(id);
        }

        if our_side.exhausted && their_side.exhausted {
            return Ok(unrelated(our_side, their_side));
        }
    }
}

fn split(ours: Side<'_>, theirs: Side<'_>, ancestor: CommitRef) -> DivergeResult {
    DivergeResult {
        ours_only: ours.unique_until(&ancestor),
        theirs_only: theirs.unique_until(&ancestor),
        common_ancestor: Some(ancestor),
    }
}

/// No shared commit: the root of the shorter history stands in as ancestor
fn unrelated(ours: Side<'_>, theirs: Side<'_>) -> DivergeResult {
    let shorter = if theirs.seen.len() < ours.seen.len() {
        &theirs.seen
    } else {
        &ours.seen
    };
    let Some(ancestor) = shorter.last().cloned() else {
        return DivergeResult {
            common_ancestor: None,
            ours_only: ours.seen.into_iter().rev().collect(),
            theirs_only: theirs.seen.into_iter().rev().collect(),
        };
    };
    tracing::warn!(ancestor = %ancestor, "histories share no commit, using shorter root");
    split(ours, theirs, ancestor)
}
