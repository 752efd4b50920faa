//! Mount configuration
//!
//! A mount is described by a single TOML document. Only the remote and the
//! local clone path are required; everything else has a default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::sync::{FetchConfig, SyncConfig};
use common::vcs::Identity;

const MB: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Remote to clone from and sync with
    pub remote_url: String,
    /// Local clone; its working tree backs `/current`
    pub repo_path: PathBuf,

    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_upstream")]
    pub upstream: String,
    #[serde(default = "default_identity")]
    pub author: Identity,
    #[serde(default = "default_identity")]
    pub committer: Identity,

    /// Largest file a write may produce
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    /// Largest offset a write may start at
    #[serde(default = "default_max_offset_mb")]
    pub max_offset_mb: u64,

    /// How long the engine waits on the job queue before an idle cycle
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_min_idle_times")]
    pub min_idle_times: u32,
    #[serde(default = "default_fetch_interval_secs")]
    pub fetch_interval_secs: u64,
    #[serde(default = "default_idle_fetch_interval_secs")]
    pub idle_fetch_interval_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_sync_attempts")]
    pub max_sync_attempts: u32,

    /// Number of view instances kept by the router
    #[serde(default = "default_route_cache_capacity")]
    pub route_cache_capacity: u64,
    /// Bytes of blob content memoized per commit view
    #[serde(default = "default_memo_cache_capacity")]
    pub memo_cache_capacity: u64,

    #[serde(default = "default_uid")]
    pub uid: u32,
    #[serde(default = "default_gid")]
    pub gid: u32,

    /// Remove the local clone when the mount shuts down
    #[serde(default)]
    pub cleanup_on_unmount: bool,
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_upstream() -> String {
    "origin".to_string()
}

fn default_identity() -> Identity {
    Identity::new("gitmount", "gitmount@localhost")
}

fn default_max_size_mb() -> u64 {
    10
}

fn default_max_offset_mb() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_min_idle_times() -> u32 {
    10
}

fn default_fetch_interval_secs() -> u64 {
    30
}

fn default_idle_fetch_interval_secs() -> u64 {
    5 * 60
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_max_sync_attempts() -> u32 {
    5
}

fn default_route_cache_capacity() -> u64 {
    800
}

fn default_memo_cache_capacity() -> u64 {
    64 * MB
}

fn default_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail
    unsafe { libc::getuid() }
}

fn default_gid() -> u32 {
    // SAFETY: getgid has no preconditions and cannot fail
    unsafe { libc::getgid() }
}

impl MountConfig {
    /// A config with every optional field at its default
    pub fn new(remote_url: impl Into<String>, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            remote_url: remote_url.into(),
            repo_path: repo_path.into(),
            branch: default_branch(),
            upstream: default_upstream(),
            author: default_identity(),
            committer: default_identity(),
            max_size_mb: default_max_size_mb(),
            max_offset_mb: default_max_offset_mb(),
            poll_interval_secs: default_poll_interval_secs(),
            min_idle_times: default_min_idle_times(),
            fetch_interval_secs: default_fetch_interval_secs(),
            idle_fetch_interval_secs: default_idle_fetch_interval_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            max_sync_attempts: default_max_sync_attempts(),
            route_cache_capacity: default_route_cache_capacity(),
            memo_cache_capacity: default_memo_cache_capacity(),
            uid: default_uid(),
            gid: default_gid(),
            cleanup_on_unmount: false,
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: MountConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote_url.is_empty() {
            return Err(ConfigError::Invalid("remote_url is empty".into()));
        }
        if self.branch.is_empty() || self.upstream.is_empty() {
            return Err(ConfigError::Invalid(
                "branch and upstream must be named".into(),
            ));
        }
        if self.max_sync_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_sync_attempts must be at least 1".into(),
            ));
        }
        if self.min_idle_times == 0 {
            return Err(ConfigError::Invalid(
                "min_idle_times must be at least 1".into(),
            ));
        }
        if self.route_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "route_cache_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn max_size(&self) -> u64 {
        self.max_size_mb.saturating_mul(MB)
    }

    pub fn max_offset(&self) -> u64 {
        self.max_offset_mb.saturating_mul(MB)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            branch: self.branch.clone(),
            upstream: self.upstream.clone(),
            author: self.author.clone(),
            committer: self.committer.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            min_idle_times: self.min_idle_times,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            max_sync_attempts: self.max_sync_attempts,
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            branch: self.branch.clone(),
            upstream: self.upstream.clone(),
            interval: Duration::from_secs(self.fetch_interval_secs),
            idle_interval: Duration::from_secs(self.idle_fetch_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = MountConfig::from_toml_str(
            r#"
            remote_url = "https://example.com/repo.git"
            repo_path = "/tmp/repo"
            "#,
        )
        .unwrap();

        assert_eq!(config.branch, "master");
        assert_eq!(config.upstream, "origin");
        assert_eq!(config.max_sync_attempts, 5);
        assert_eq!(config.max_size(), 10 * MB);
        assert!(!config.cleanup_on_unmount);
        assert_eq!(config.uid, default_uid());
    }

    #[test]
    fn test_overrides_reach_worker_configs() {
        let config = MountConfig::from_toml_str(
            r#"
            remote_url = "git@example.com:repo.git"
            repo_path = "/srv/repo"
            branch = "main"
            poll_interval_secs = 7
            fetch_interval_secs = 11
            backoff_base_ms = 250

            [author]
            name = "Ada"
            email = "ada@example.com"
            "#,
        )
        .unwrap();

        let sync = config.sync_config();
        assert_eq!(sync.branch, "main");
        assert_eq!(sync.poll_interval, Duration::from_secs(7));
        assert_eq!(sync.backoff_base, Duration::from_millis(250));
        assert_eq!(sync.author.name, "Ada");
        assert_eq!(sync.committer, default_identity());

        let fetch = config.fetch_config();
        assert_eq!(fetch.interval, Duration::from_secs(11));
        assert_eq!(fetch.branch, "main");
    }

    #[test]
    fn test_missing_remote_is_a_parse_error() {
        let err = MountConfig::from_toml_str(r#"repo_path = "/tmp/repo""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = MountConfig::from_toml_str(
            r#"
            remote_url = "x"
            repo_path = "/tmp/repo"
            max_sync_attempts = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_serialized_config_parses_back() {
        let config = MountConfig::new("https://example.com/r.git", "/tmp/r");
        let text = config.to_toml_string().unwrap();
        assert_eq!(MountConfig::from_toml_str(&text).unwrap(), config);
    }
}
