//! Job queue between filesystem write handlers and the sync engine
//!
//! A lightweight multi-producer single-consumer queue over flume channels.
//! Handlers enqueue the index mutations their writes imply; the engine
//! drains them into batches and commits each batch once the mount goes
//! quiet.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

/// An intended index mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Paths to stage from the working tree
    pub add: Vec<PathBuf>,
    /// Paths to drop from the index
    pub remove: Vec<PathBuf>,
    /// Commit message used when this job is committed on its own
    pub message: String,
}

impl Job {
    pub fn new(add: Vec<PathBuf>, remove: Vec<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            add,
            remove,
            message: message.into(),
        }
    }

    /// Stage a single path
    pub fn update(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(vec![path.into()], Vec::new(), message)
    }

    /// Remove a single path
    pub fn remove(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(Vec::new(), vec![path.into()], message)
    }

    /// Every path this job touches, removals first
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.remove.iter().chain(self.add.iter())
    }
}

/// Job dispatcher that can be cloned and shared across threads
///
/// This is a lightweight handle; every write handler holds one.
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    tx: flume::Sender<Job>,
}

impl JobDispatcher {
    /// Create a new job dispatcher and receiver pair
    ///
    /// The dispatcher can be cloned and shared, while the receiver should be
    /// given to the sync engine.
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, JobReceiver { rx })
    }

    /// Dispatch a job to the sync engine
    ///
    /// This is non-blocking and will succeed unless the receiver has been dropped.
    pub fn dispatch(&self, job: Job) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("job receiver has been dropped"))
    }

    /// Number of jobs waiting to be picked up
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Outcome of waiting on the queue
#[derive(Debug)]
pub enum Recv {
    Job(Job),
    /// Nothing arrived within the poll interval
    Timeout,
    /// Every dispatcher has been dropped
    Closed,
}

/// Job receiver owned by the sync engine
#[derive(Debug)]
pub struct JobReceiver {
    rx: flume::Receiver<Job>,
}

impl JobReceiver {
    /// Wait up to `timeout` for the next job
    pub fn recv_timeout(&self, timeout: Duration) -> Recv {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => Recv::Job(job),
            Err(flume::RecvTimeoutError::Timeout) => Recv::Timeout,
            Err(flume::RecvTimeoutError::Disconnected) => Recv::Closed,
        }
    }

    /// Try to receive a job without blocking
    ///
    /// Returns None if no jobs are available or all senders have been dropped.
    pub fn try_recv(&self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    /// Take everything currently queued
    pub fn drain(&self) -> Vec<Job> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobs_arrive_in_order() {
        let (dispatcher, receiver) = JobDispatcher::new();
        dispatcher.dispatch(Job::update("a", "Update a")).unwrap();
        dispatcher.dispatch(Job::remove("b", "Deleted b")).unwrap();
        assert_eq!(dispatcher.pending(), 2);

        let jobs = receiver.drain();
        assert_eq!(jobs[0].message, "Update a");
        assert_eq!(jobs[1].remove, vec![PathBuf::from("b")]);
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_recv_timeout_and_close() {
        let (dispatcher, receiver) = JobDispatcher::new();
        assert!(matches!(
            receiver.recv_timeout(Duration::from_millis(10)),
            Recv::Timeout
        ));

        let clone = dispatcher.clone();
        clone.dispatch(Job::update("x", "m")).unwrap();
        drop(dispatcher);
        drop(clone);

        assert!(matches!(
            receiver.recv_timeout(Duration::from_millis(10)),
            Recv::Job(_)
        ));
        assert!(matches!(
            receiver.recv_timeout(Duration::from_millis(10)),
            Recv::Closed
        ));
    }

    #[test]
    fn test_dispatch_fails_without_receiver() {
        let (dispatcher, receiver) = JobDispatcher::new();
        drop(receiver);
        assert!(dispatcher.dispatch(Job::update("a", "m")).is_err());
    }

    #[test]
    fn test_paths_lists_removals_first() {
        let job = Job::new(
            vec![PathBuf::from("new")],
            vec![PathBuf::from("old")],
            "Rename old to new",
        );
        let paths: Vec<_> = job.paths().collect();
        assert_eq!(paths, vec![&PathBuf::from("old"), &PathBuf::from("new")]);
    }
}
