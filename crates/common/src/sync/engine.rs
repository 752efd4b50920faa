//! The sync engine state machine
//!
//! One dedicated thread owns the job queue's receiving end. Jobs accumulate
//! into a batch while they keep arriving; every poll interval that passes
//! without a job is an idle cycle, and each idle cycle runs the
//! idle transition:
//!
//! 1. raise `syncing` and bail out if any writer is still active
//! 2. commit the pending batch as a single commit
//! 3. `sync()`: fetch and merge when behind, push when ahead, retried with
//!    exponential backoff on transient failures
//! 4. lower `syncing` and signal `sync_done`

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::conflict::ConflictStrategy;
use crate::coord::CoordinationState;
use crate::jobs::{Job, JobReceiver, Recv};
use crate::vcs::{CommitRef, Identity, VcsBackend};

use super::{Backoff, Refresh, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Fetching,
    Merging,
    Pushing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Committing,
    Syncing(SyncPhase),
    Backoff { attempt: u32 },
    ShuttingDown,
}

/// Engine tunables
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub branch: String,
    pub upstream: String,
    pub author: Identity,
    pub committer: Identity,
    /// How long to wait on the job queue before counting an idle cycle
    pub poll_interval: Duration,
    /// Idle cycles before the mount is flagged `idle`
    pub min_idle_times: u32,
    pub backoff_base: Duration,
    pub max_sync_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let identity = Identity::new("gitmount", "gitmount@localhost");
        Self {
            branch: "master".to_string(),
            upstream: "origin".to_string(),
            author: identity.clone(),
            committer: identity,
            poll_interval: Duration::from_secs(2),
            min_idle_times: 10,
            backoff_base: Duration::from_millis(500),
            max_sync_attempts: 5,
        }
    }
}

/// Everything the engine thread needs, handed over at spawn
pub struct SyncContext {
    pub backend: Arc<dyn VcsBackend>,
    pub coordination: Arc<CoordinationState>,
    pub jobs: JobReceiver,
    pub strategy: Arc<dyn ConflictStrategy>,
    pub refreshers: Vec<Arc<dyn Refresh>>,
    pub config: SyncConfig,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<EngineState>,
    commits: AtomicU64,
    push_attempts: AtomicU64,
    pushes: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::Idle),
            commits: AtomicU64::new(0),
            push_attempts: AtomicU64::new(0),
            pushes: AtomicU64::new(0),
        }
    }
}

pub struct SyncEngine {
    backend: Arc<dyn VcsBackend>,
    coordination: Arc<CoordinationState>,
    jobs: JobReceiver,
    strategy: Arc<dyn ConflictStrategy>,
    refreshers: Vec<Arc<dyn Refresh>>,
    config: SyncConfig,
    backoff: Backoff,
    batch: Vec<Job>,
    idle_times: u32,
    shared: Arc<Shared>,
}

impl SyncEngine {
    pub fn new(ctx: SyncContext) -> Self {
        let backoff = Backoff::new(ctx.config.backoff_base, ctx.config.max_sync_attempts);
        Self {
            backend: ctx.backend,
            coordination: ctx.coordination,
            jobs: ctx.jobs,
            strategy: ctx.strategy,
            refreshers: ctx.refreshers,
            config: ctx.config,
            backoff,
            batch: Vec::new(),
            idle_times: 0,
            shared: Arc::new(Shared::new()),
        }
    }

    /// Run the engine on its own thread
    pub fn spawn(self) -> std::io::Result<SyncHandle> {
        let shared = self.shared.clone();
        let coordination = self.coordination.clone();
        let thread = thread::Builder::new()
            .name("sync-engine".to_string())
            .spawn(move || self.run())?;
        Ok(SyncHandle {
            shared,
            coordination,
            thread: Some(thread),
        })
    }

    pub fn run(mut self) {
        tracing::info!(
            branch = %self.config.branch,
            upstream = %self.config.upstream,
            "sync engine started"
        );
        while self.poll_once() {}
        self.stop();
    }

    /* Getters */

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    pub fn pending_jobs(&self) -> usize {
        self.batch.len()
    }

    pub fn commits(&self) -> u64 {
        self.shared.commits.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: EngineState) {
        *self.shared.state.lock() = state;
    }

    /// Wait for one job or one poll interval; false once the engine should stop
    pub fn poll_once(&mut self) -> bool {
        if self.coordination.shutting_down.is_set() {
            return false;
        }
        match self.jobs.recv_timeout(self.config.poll_interval) {
            Recv::Job(job) => {
                tracing::debug!(message = %job.message, "job queued");
                self.idle_times = 0;
                self.coordination.idle.clear();
                self.batch.push(job);
            }
            Recv::Timeout => {
                if self.coordination.shutting_down.is_set() {
                    return false;
                }
                self.idle_times = self.idle_times.saturating_add(1);
                if self.idle_times >= self.config.min_idle_times {
                    self.coordination.idle.set();
                }
                self.idle_transition();
            }
            Recv::Closed => {
                tracing::debug!("job queue closed");
                return false;
            }
        }
        true
    }

    /// Commit the pending batch and sync, if no writer is in flight
    pub fn idle_transition(&mut self) {
        self.coordination.begin_sync();
        if self.coordination.active_writers.load() != 0 {
            tracing::debug!(
                writers = self.coordination.active_writers.load(),
                "writers active, postponing sync"
            );
            self.coordination.finish_sync();
            return;
        }

        if !self.batch.is_empty() {
            self.set_state(EngineState::Committing);
            if let Err(e) = self.commit_batch() {
                tracing::error!(error = %e, jobs = self.batch.len(), "commit failed, keeping batch");
                self.coordination.finish_sync();
                self.set_state(EngineState::Idle);
                return;
            }
        }

        if let Err(e) = self.sync_with_retry() {
            tracing::warn!(error = %e, "sync gave up, retrying next cycle");
        }
        self.coordination.finish_sync();
        self.set_state(EngineState::Idle);
    }

    /// Stage every path of the batch and commit them together
    pub fn commit_batch(&mut self) -> Result<Option<CommitRef>, SyncError> {
        if self.batch.is_empty() {
            return Ok(None);
        }
        let paths = batch_paths(&self.batch);
        let message = batch_message(&self.batch, paths.len());

        self.backend.stage(&paths)?;
        let commit =
            self.backend
                .commit(&message, &self.config.author, &self.config.committer, None)?;

        let jobs = self.batch.len();
        self.batch.clear();
        match &commit {
            Some(id) => {
                self.shared.commits.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    commit = %id.short(),
                    jobs,
                    paths = paths.len(),
                    "committed: {}",
                    message
                );
                self.refresh_all();
            }
            None => tracing::debug!(jobs, "batch left the tree unchanged"),
        }
        Ok(commit)
    }

    fn sync_with_retry(&mut self) -> Result<(), SyncError> {
        let mut attempt = 1;
        loop {
            let err = match self.sync() {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if !err.transience().is_retryable() || attempt >= self.backoff.max_attempts() {
                return Err(err);
            }

            let delay = self.backoff.delay(attempt);
            self.set_state(EngineState::Backoff { attempt });
            tracing::warn!(attempt, ?delay, error = %err, "sync attempt failed, backing off");
            if self.coordination.shutting_down.wait_timeout(delay) {
                return Err(SyncError::ShuttingDown);
            }
            attempt += 1;
        }
    }

    /// Bring the local branch and the remote in line
    ///
    /// Behind: fetch, merge through the conflict strategy, then push the
    /// result. Ahead: push. Neither: just end the cycle.
    pub fn sync(&mut self) -> Result<(), SyncError> {
        let (ahead, behind) = self
            .backend
            .ahead_behind(&self.config.branch, &self.config.upstream)?;
        let mut ahead = ahead > 0;

        if behind > 0 {
            self.set_state(EngineState::Syncing(SyncPhase::Fetching));
            self.fetch()?;
            self.set_state(EngineState::Syncing(SyncPhase::Merging));
            self.merge()?;
            ahead = true;
        }

        if ahead {
            self.set_state(EngineState::Syncing(SyncPhase::Pushing));
            return self.push();
        }

        tracing::trace!("in sync with upstream");
        self.coordination.finish_sync();
        Ok(())
    }

    fn fetch(&self) -> Result<(), SyncError> {
        let _remote = self.coordination.remote_lock();
        match self
            .backend
            .fetch(&self.config.upstream, &self.config.branch)
        {
            Ok(()) => {
                self.coordination.fetch_successful.set();
                tracing::debug!("fetched {}", self.config.upstream);
                Ok(())
            }
            Err(e) => {
                self.coordination.fetch_successful.clear();
                Err(SyncError::Fetch(e))
            }
        }
    }

    fn merge(&self) -> Result<(), SyncError> {
        self.coordination.read_only.set();
        let result = self.strategy.resolve(
            self.backend.as_ref(),
            &self.config.branch,
            &self.config.branch,
            &self.config.upstream,
        );
        self.coordination.read_only.clear();
        // the branch moved even when the replay failed part way
        self.refresh_all();

        let outcome = result?;
        tracing::info!(
            head = %outcome.head().short(),
            replayed = outcome.replayed.len(),
            skipped = outcome.skipped,
            "merged upstream changes"
        );
        Ok(())
    }

    fn push(&self) -> Result<(), SyncError> {
        let _remote = self.coordination.remote_lock();
        self.shared.push_attempts.fetch_add(1, Ordering::Relaxed);
        match self
            .backend
            .push(&self.config.upstream, &self.config.branch)
        {
            Ok(()) => {
                self.shared.pushes.fetch_add(1, Ordering::Relaxed);
                self.coordination.syncing.clear();
                self.coordination.push_successful.set();
                self.coordination.sync_done.set();
                tracing::info!("pushed {} to {}", self.config.branch, self.config.upstream);
                Ok(())
            }
            Err(e) => {
                self.coordination.push_successful.clear();
                self.coordination.fetch_requested.set();
                Err(SyncError::Push(e))
            }
        }
    }

    fn refresh_all(&self) {
        for refresher in &self.refreshers {
            if let Err(e) = refresher.refresh(self.backend.as_ref()) {
                tracing::warn!(cache = refresher.name(), error = %e, "refresh failed");
            }
        }
    }

    /// Commit whatever is still queued, then stop
    fn stop(&mut self) {
        self.set_state(EngineState::ShuttingDown);
        self.batch.extend(self.jobs.drain());
        if !self.batch.is_empty() {
            self.coordination.begin_sync();
            if self.coordination.active_writers.load() == 0 {
                if let Err(e) = self.commit_batch() {
                    tracing::error!(error = %e, jobs = self.batch.len(), "final commit failed");
                }
            } else {
                tracing::warn!(
                    jobs = self.batch.len(),
                    "writers still active at shutdown, changes stay uncommitted in the working tree"
                );
            }
            self.coordination.finish_sync();
        }
        tracing::info!(commits = self.commits(), "sync engine stopped");
    }
}

/// Distinct paths of a batch in arrival order
fn batch_paths(batch: &[Job]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    batch
        .iter()
        .flat_map(Job::paths)
        .filter(|path| seen.insert(path.as_path()))
        .cloned()
        .collect()
}

fn batch_message(batch: &[Job], paths: usize) -> String {
    match batch {
        [job] => job.message.clone(),
        _ => format!("Update {} items", paths),
    }
}

/// Handle to a running engine thread
pub struct SyncHandle {
    shared: Arc<Shared>,
    coordination: Arc<CoordinationState>,
    thread: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    pub fn commits(&self) -> u64 {
        self.shared.commits.load(Ordering::Relaxed)
    }

    pub fn push_attempts(&self) -> u64 {
        self.shared.push_attempts.load(Ordering::Relaxed)
    }

    pub fn successful_pushes(&self) -> u64 {
        self.shared.pushes.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Wait for the engine thread to exit
    pub fn join(&mut self) -> anyhow::Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| anyhow::anyhow!("sync engine thread panicked")),
            None => Ok(()),
        }
    }

    /// Raise `shutting_down` and wait for the final batch to be committed
    pub fn shutdown(mut self) -> anyhow::Result<()> {
        self.coordination.shutdown();
        self.join()
    }
}
