//! Mount lifecycle
//!
//! Wires one repository to its coordination state, job channel, caches,
//! route table and background workers, and tears them down again.

use std::fs;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use uuid::Uuid;

use common::conflict::AcceptOurs;
use common::coord::CoordinationState;
use common::jobs::JobDispatcher;
use common::sync::{
    EngineState, FetchHandle, FetchWorker, Refresh, SyncContext, SyncEngine, SyncHandle,
};
use common::vcs::{GitBackend, VcsBackend};

use crate::caches::{CommitCache, IgnoreCache};
use crate::config::MountConfig;
use crate::router::{FsCall, FsReply, FsResult, Router};
use crate::views::{default_routes, ViewContext};

const IGNORE_CACHE_CAPACITY: u64 = 4096;

pub struct Mount {
    id: Uuid,
    config: MountConfig,
    backend: Arc<dyn VcsBackend>,
    coordination: Arc<CoordinationState>,
    router: Arc<Router>,
    commits: Arc<CommitCache>,
    sync: Option<SyncHandle>,
    fetch: Option<FetchHandle>,
}

impl Mount {
    /// Clone (or reuse) the repository at `config.repo_path` and start serving it
    pub fn start(config: MountConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let backend = GitBackend::clone_or_open(&config.remote_url, &config.repo_path, &config.branch)
            .with_context(|| format!("failed to open {}", config.repo_path.display()))?;
        Self::start_with_backend(config, Arc::new(backend))
    }

    pub fn start_with_backend(
        config: MountConfig,
        backend: Arc<dyn VcsBackend>,
    ) -> anyhow::Result<Self> {
        let id = Uuid::new_v4();
        let coordination = Arc::new(CoordinationState::new());
        let (jobs, receiver) = JobDispatcher::new();

        let commits = Arc::new(CommitCache::new(config.branch.clone()));
        commits
            .rebuild(backend.as_ref())
            .context("failed to read branch history")?;
        let ignore = Arc::new(IgnoreCache::new(backend.clone(), IGNORE_CACHE_CAPACITY));

        let context = ViewContext {
            mount_id: id,
            mount_time: Utc::now(),
            backend: backend.clone(),
            coordination: coordination.clone(),
            jobs,
            commits: commits.clone(),
            ignore: ignore.clone(),
            uid: config.uid,
            gid: config.gid,
            max_size: config.max_size(),
            max_offset: config.max_offset(),
            memo_capacity: config.memo_cache_capacity,
        };
        let mut router = Router::new(context, config.route_cache_capacity);
        for route in default_routes()? {
            router.register(route);
        }

        let refreshers: Vec<Arc<dyn Refresh>> = vec![commits.clone() as Arc<dyn Refresh>, ignore];
        let engine = SyncEngine::new(SyncContext {
            backend: backend.clone(),
            coordination: coordination.clone(),
            jobs: receiver,
            strategy: Arc::new(AcceptOurs::new(config.committer.clone())),
            refreshers,
            config: config.sync_config(),
        });
        let sync = engine.spawn().context("failed to spawn sync engine")?;

        let fetch = match FetchWorker::new(backend.clone(), coordination.clone(), config.fetch_config())
            .spawn()
        {
            Ok(fetch) => fetch,
            Err(e) => {
                // the engine is already running; stop it before bailing out
                abandon_engine(id, sync);
                return Err(e).context("failed to spawn fetch worker");
            }
        };

        tracing::info!(
            mount_id = %id,
            workdir = %backend.workdir().display(),
            branch = %config.branch,
            upstream = %config.upstream,
            "mount started"
        );

        Ok(Self {
            id,
            config,
            backend,
            coordination,
            router: Arc::new(router),
            commits,
            sync: Some(sync),
            fetch: Some(fetch),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn VcsBackend> {
        &self.backend
    }

    pub fn coordination(&self) -> &Arc<CoordinationState> {
        &self.coordination
    }

    /// Shared handle for driver threads
    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    pub fn commits(&self) -> &Arc<CommitCache> {
        &self.commits
    }

    pub fn dispatch(&self, path: &str, call: FsCall<'_>) -> FsResult<FsReply> {
        self.router.dispatch(path, call)
    }

    pub fn sync_state(&self) -> Option<EngineState> {
        self.sync.as_ref().map(SyncHandle::state)
    }

    pub fn commits_made(&self) -> u64 {
        self.sync.as_ref().map_or(0, SyncHandle::commits)
    }

    /// Commit outstanding work, stop both workers and optionally remove the clone
    pub fn shutdown(mut self) -> anyhow::Result<()> {
        tracing::info!(mount_id = %self.id, "shutting down mount");
        self.coordination.shutdown();

        if let Some(sync) = self.sync.take() {
            sync.shutdown()?;
        }
        if let Some(mut fetch) = self.fetch.take() {
            fetch.join()?;
        }

        if self.config.cleanup_on_unmount {
            tracing::info!(path = %self.config.repo_path.display(), "removing working tree");
            fs::remove_dir_all(&self.config.repo_path).with_context(|| {
                format!("failed to remove {}", self.config.repo_path.display())
            })?;
        }
        Ok(())
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        if self.sync.is_some() || self.fetch.is_some() {
            tracing::warn!(mount_id = %self.id, "mount dropped without shutdown");
            self.coordination.shutdown();
        }
    }
}

/// Stop an engine whose mount never finished starting
fn abandon_engine(id: Uuid, sync: SyncHandle) {
    if let Err(e) = sync.shutdown() {
        tracing::warn!(mount_id = %id, error = %e, "sync engine did not stop cleanly");
    }
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("id", &self.id)
            .field("workdir", &self.backend.workdir())
            .field("branch", &self.config.branch)
            .finish()
    }
}
