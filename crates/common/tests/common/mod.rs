//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ::common::conflict::AcceptOurs;
use ::common::coord::CoordinationState;
use ::common::jobs::{Job, JobDispatcher};
use ::common::sync::{SyncConfig, SyncContext, SyncEngine, SyncHandle};
use ::common::vcs::{GitBackend, MemoryBackend, MemoryRemote, VcsBackend};
use tempfile::TempDir;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds, panicking after `timeout`
pub fn wait_until(timeout: Duration, what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

pub fn fast_config() -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from_millis(50),
        min_idle_times: 3,
        backoff_base: Duration::from_millis(200),
        max_sync_attempts: 5,
        ..Default::default()
    }
}

/// A clone of an in-memory remote with its engine wiring
pub struct MemoryMount {
    pub remote: Arc<MemoryRemote>,
    pub backend: Arc<MemoryBackend>,
    pub coordination: Arc<CoordinationState>,
    pub jobs: JobDispatcher,
    pending: Option<SyncEngine>,
}

impl MemoryMount {
    pub fn new(config: SyncConfig) -> Self {
        init_tracing();
        let remote = MemoryRemote::new();
        remote.commit_files("master", &[("README.md", "# test")], "initial");
        let backend = Arc::new(MemoryBackend::clone_from(remote.clone(), "origin", "master"));
        let coordination = Arc::new(CoordinationState::new());
        let (jobs, receiver) = JobDispatcher::new();
        let engine = SyncEngine::new(SyncContext {
            backend: backend.clone(),
            coordination: coordination.clone(),
            jobs: receiver,
            strategy: Arc::new(AcceptOurs::new(config.committer.clone())),
            refreshers: Vec::new(),
            config,
        });
        Self {
            remote,
            backend,
            coordination,
            jobs,
            pending: Some(engine),
        }
    }

    /// Edit a file and enqueue the matching job
    pub fn write(&self, path: &str, data: &str, message: &str) {
        self.backend.write_file(path, data);
        self.jobs.dispatch(Job::update(path, message)).unwrap();
    }

    pub fn start(&mut self) -> SyncHandle {
        self.pending
            .take()
            .expect("engine already started")
            .spawn()
            .unwrap()
    }
}

/// A bare repository seeded with one commit on `master`
pub struct BareRemote {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl BareRemote {
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.git");
        let repo = git2::Repository::init_bare(&path).unwrap();
        {
            let mut builder = repo.treebuilder(None).unwrap();
            for (name, data) in files {
                let blob = repo.blob(data.as_bytes()).unwrap();
                builder.insert(name, blob, 0o100644).unwrap();
            }
            let tree = repo.find_tree(builder.write().unwrap()).unwrap();
            let sig = git2::Signature::now("seed", "seed@localhost").unwrap();
            repo.commit(Some("refs/heads/master"), &sig, &sig, "initial", &tree, &[])
                .unwrap();
        }
        repo.set_head("refs/heads/master").unwrap();
        Self { dir, path }
    }

    pub fn url(&self) -> String {
        self.path.display().to_string()
    }

    pub fn clone_into(&self, name: &str) -> GitBackend {
        let target = self.dir.path().join(name);
        GitBackend::clone_or_open(&self.url(), &target, "master").unwrap()
    }

    /// Contents of `path` at the tip of the remote's master
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let repo = git2::Repository::open_bare(&self.path).unwrap();
        let tip = repo.refname_to_id("refs/heads/master").ok()?;
        let tree = repo.find_commit(tip).unwrap().tree().unwrap();
        let entry = tree.get_path(Path::new(path)).ok()?;
        let data = repo.find_blob(entry.id()).unwrap().content().to_vec();
        Some(data)
    }

    pub fn tip_message(&self) -> String {
        let repo = git2::Repository::open_bare(&self.path).unwrap();
        let tip = repo.refname_to_id("refs/heads/master").unwrap();
        let message = repo.find_commit(tip).unwrap().message().unwrap().to_string();
        message
    }
}

/// Write a file into a git clone's working tree
pub fn write_file(backend: &dyn VcsBackend, path: &str, data: &str) {
    let full = backend.workdir().join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, data).unwrap();
}
