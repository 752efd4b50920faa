//! Shared fixtures for the daemon integration tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ::common::coord::CoordinationState;
use ::common::jobs::{Job, JobDispatcher, JobReceiver};
use ::common::vcs::{GitBackend, VcsBackend};
use gitmount_daemon::caches::{CommitCache, IgnoreCache};
use gitmount_daemon::views::default_routes;
use gitmount_daemon::{FsCall, FsReply, MountConfig, Router, ViewContext};
use tempfile::TempDir;
use uuid::Uuid;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn wait_until(timeout: Duration, what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(20));
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

    pub fn clone_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

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

    /// Mount config with intervals short enough for tests
    pub fn config(&self, name: &str) -> MountConfig {
        let mut config = MountConfig::new(self.url(), self.clone_path(name));
        config.poll_interval_secs = 1;
        config.min_idle_times = 1;
        config.fetch_interval_secs = 1;
        config.idle_fetch_interval_secs = 1;
        config.backoff_base_ms = 50;
        config
    }
}

pub const SEED: &[(&str, &str)] = &[
    ("README.md", "# seed\n"),
    (".gitignore", "*.log\n"),
];

/// A router over a fresh clone, without background workers
///
/// The job receiver is handed back so tests can inspect what the views
/// enqueue.
pub struct Fixture {
    pub remote: BareRemote,
    pub backend: Arc<dyn VcsBackend>,
    pub coordination: Arc<CoordinationState>,
    pub commits: Arc<CommitCache>,
    pub router: Router,
    pub jobs: JobReceiver,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_limits(1024 * 1024, 1024 * 1024)
    }

    pub fn with_limits(max_size: u64, max_offset: u64) -> Self {
        init_tracing();
        let remote = BareRemote::new(SEED);
        let backend: Arc<dyn VcsBackend> = Arc::new(
            GitBackend::clone_or_open(&remote.url(), &remote.clone_path("clone"), "master")
                .unwrap(),
        );
        let coordination = Arc::new(CoordinationState::new());
        let (dispatcher, jobs): (JobDispatcher, JobReceiver) = JobDispatcher::new();
        let commits = Arc::new(CommitCache::new("master"));
        commits.rebuild(backend.as_ref()).unwrap();

        let context = ViewContext {
            mount_id: Uuid::new_v4(),
            mount_time: Utc::now(),
            backend: backend.clone(),
            coordination: coordination.clone(),
            jobs: dispatcher,
            commits: commits.clone(),
            ignore: Arc::new(IgnoreCache::new(backend.clone(), 64)),
            uid: 1000,
            gid: 1000,
            max_size,
            max_offset,
            memo_capacity: 1024 * 1024,
        };
        let mut router = Router::new(context, 16);
        for route in default_routes().unwrap() {
            router.register(route);
        }

        Self {
            remote,
            backend,
            coordination,
            commits,
            router,
            jobs,
        }
    }

    pub fn workdir(&self) -> &Path {
        self.backend.workdir()
    }

    /// Create `path`, write `data` and release the handle
    pub fn write_file(&self, path: &str, data: &[u8]) {
        let fh = match self.router.dispatch(path, FsCall::Create { mode: 0o644 }).unwrap() {
            FsReply::Handle(fh) => fh,
            other => panic!("expected a handle, got {:?}", other),
        };
        self.router
            .dispatch(path, FsCall::Write { fh, offset: 0, data })
            .unwrap();
        self.router.dispatch(path, FsCall::Release { fh }).unwrap();
    }

    pub fn drain(&self) -> Vec<Job> {
        self.jobs.drain()
    }
}
