use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::coord::CoordinationState;
use crate::vcs::VcsBackend;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub branch: String,
    pub upstream: String,
    /// Fetch period while the mount sees activity
    pub interval: Duration,
    /// Fetch period once the mount is idle
    pub idle_interval: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            branch: "master".to_string(),
            upstream: "origin".to_string(),
            interval: Duration::from_secs(30),
            idle_interval: Duration::from_secs(60 * 5),
        }
    }
}

/// Periodically refreshes the remote-tracking ref
///
/// Runs on its own thread. A raised `fetch_requested` signal (set after a
/// failed push, or at shutdown) cuts the wait short.
#[derive(Debug)]
pub struct FetchWorker {
    backend: Arc<dyn VcsBackend>,
    coordination: Arc<CoordinationState>,
    config: FetchConfig,
}

impl FetchWorker {
    pub fn new(
        backend: Arc<dyn VcsBackend>,
        coordination: Arc<CoordinationState>,
        config: FetchConfig,
    ) -> Self {
        Self {
            backend,
            coordination,
            config,
        }
    }

    pub fn spawn(self) -> std::io::Result<FetchHandle> {
        let thread = thread::Builder::new()
            .name("fetch-worker".to_string())
            .spawn(move || self.run())?;
        Ok(FetchHandle {
            thread: Some(thread),
        })
    }

    pub fn run(self) {
        tracing::info!(upstream = %self.config.upstream, "fetch worker started");
        loop {
            let interval = if self.coordination.idle.is_set() {
                self.config.idle_interval
            } else {
                self.config.interval
            };
            self.coordination.fetch_requested.wait_timeout(interval);
            if self.coordination.shutting_down.is_set() {
                break;
            }
            self.fetch_once();
        }
        tracing::info!("fetch worker stopped");
    }

    /// Fetch now; updates `fetch_successful` and clears any pending request
    pub fn fetch_once(&self) -> bool {
        self.coordination.fetch_requested.clear();
        let _remote = self.coordination.remote_lock();
        match self
            .backend
            .fetch(&self.config.upstream, &self.config.branch)
        {
            Ok(()) => {
                self.coordination.fetch_successful.set();
                tracing::debug!(upstream = %self.config.upstream, "fetched");
                true
            }
            Err(e) => {
                self.coordination.fetch_successful.clear();
                tracing::warn!(error = %e, "fetch failed, mount is read-only until the next success");
                false
            }
        }
    }
}

/// Handle to a running fetch worker thread
#[derive(Debug)]
pub struct FetchHandle {
    thread: Option<JoinHandle<()>>,
}

impl FetchHandle {
    pub fn join(&mut self) -> anyhow::Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| anyhow::anyhow!("fetch worker thread panicked")),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::{MemoryBackend, MemoryRemote};

    fn worker() -> (Arc<MemoryRemote>, Arc<MemoryBackend>, Arc<CoordinationState>, FetchWorker) {
        let remote = MemoryRemote::new();
        remote.commit_files("master", &[("a", "1")], "initial");
        let backend = Arc::new(MemoryBackend::clone_from(remote.clone(), "origin", "master"));
        let coordination = Arc::new(CoordinationState::new());
        let worker = FetchWorker::new(
            backend.clone(),
            coordination.clone(),
            FetchConfig {
                interval: Duration::from_secs(60),
                idle_interval: Duration::from_secs(60),
                ..Default::default()
            },
        );
        (remote, backend, coordination, worker)
    }

    #[test]
    fn test_failed_fetch_gates_writes_until_success() {
        let (_remote, backend, coordination, worker) = worker();
        backend.fail_next_fetches(1);

        assert!(!worker.fetch_once());
        assert!(!coordination.fetch_successful.is_set());
        assert!(coordination.admit_write().is_err());

        assert!(worker.fetch_once());
        assert!(coordination.fetch_successful.is_set());
        assert!(coordination.admit_write().is_ok());
    }

    #[test]
    fn test_request_triggers_immediate_fetch() {
        let (remote, backend, coordination, worker) = worker();
        let mut handle = worker.spawn().unwrap();

        remote.commit_files("master", &[("b", "2")], "remote edit");
        coordination.fetch_requested.set();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while backend.ahead_behind("master", "origin").unwrap() != (0, 1) {
            assert!(std::time::Instant::now() < deadline, "fetch never ran");
            thread::sleep(Duration::from_millis(5));
        }

        coordination.shutdown();
        handle.join().unwrap();
    }
}
