use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use common::cache::BoundedCache;
use common::sync::Refresh;
use common::vcs::{VcsBackend, VcsError};

/// Memoized ignore decisions for working-tree paths
///
/// `.git` and everything under it is always ignored. Other paths defer to
/// the repository's ignore rules; the memo is dropped on every refresh since
/// a commit may have touched a `.gitignore`.
pub struct IgnoreCache {
    backend: Arc<dyn VcsBackend>,
    decisions: BoundedCache<PathBuf, bool>,
}

impl IgnoreCache {
    pub fn new(backend: Arc<dyn VcsBackend>, capacity: u64) -> Self {
        Self {
            backend,
            decisions: BoundedCache::new(capacity),
        }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        if is_git_dir(path) {
            return true;
        }
        self.decisions
            .try_get_or_insert_with(path.to_path_buf(), || self.backend.is_ignored(path))
            .unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignore check failed, tracking path");
                false
            })
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

/// Whether the first component of a repository-relative path is `.git`
pub fn is_git_dir(path: &Path) -> bool {
    matches!(path.components().next(), Some(Component::Normal(name)) if name == ".git")
}

impl Refresh for IgnoreCache {
    fn name(&self) -> &'static str {
        "ignore"
    }

    fn refresh(&self, _backend: &dyn VcsBackend) -> Result<(), VcsError> {
        self.decisions.clear();
        Ok(())
    }
}

impl std::fmt::Debug for IgnoreCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnoreCache")
            .field("decisions", &self.decisions)
            .finish()
    }
}
