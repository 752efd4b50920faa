//! In-memory repository and remote
//!
//! Mirrors the semantics of the git backend closely enough to drive the sync
//! engine and the conflict strategy without touching disk. Several backends
//! may share one [`MemoryRemote`] to simulate independent clones.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{
    CommitInfo, CommitRef, EntryKind, FileContent, Identity, TreeEntry, VcsBackend, VcsError,
    VcsOp,
};

type Tree = BTreeMap<PathBuf, FileContent>;

// Object ids and commit times are process-wide so that clones sharing a
// remote never mint the same id and newer commits always sort first.
static NEXT_OBJECT: AtomicU64 = AtomicU64::new(1);
static CLOCK: AtomicI64 = AtomicI64::new(1_700_000_000);

fn next_id() -> CommitRef {
    CommitRef::new(format!("{:040x}", NEXT_OBJECT.fetch_add(1, Ordering::SeqCst)))
}

fn next_time() -> DateTime<Utc> {
    let secs = CLOCK.fetch_add(1, Ordering::SeqCst);
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

#[derive(Debug, Clone)]
struct StoredCommit {
    info: CommitInfo,
    tree: Tree,
}

fn make_commit(
    message: &str,
    author: &Identity,
    committer: &Identity,
    parents: Vec<CommitRef>,
    tree: Tree,
) -> StoredCommit {
    StoredCommit {
        info: CommitInfo {
            id: next_id(),
            parents,
            time: next_time(),
            message: message.to_string(),
            author: author.clone(),
            committer: committer.clone(),
        },
        tree,
    }
}

fn ancestors(commits: &HashMap<CommitRef, StoredCommit>, tip: &CommitRef) -> HashSet<CommitRef> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([tip.clone()]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(commit) = commits.get(&id) {
            queue.extend(commit.info.parents.iter().cloned());
        }
    }
    seen
}

#[derive(Debug, Default)]
struct RemoteState {
    branches: BTreeMap<String, CommitRef>,
    commits: HashMap<CommitRef, StoredCommit>,
}

/// A shared in-memory remote
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
}

impl MemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Commit directly on the remote, as if another clone had pushed
    pub fn commit_files(&self, branch: &str, files: &[(&str, &str)], message: &str) -> CommitRef {
        let who = Identity::new("remote", "remote@localhost");
        let mut state = self.state.lock();
        let parent = state.branches.get(branch).cloned();
        let mut tree = parent
            .as_ref()
            .and_then(|id| state.commits.get(id))
            .map(|c| c.tree.clone())
            .unwrap_or_default();
        for (path, data) in files {
            tree.insert(PathBuf::from(path), FileContent::file(data.as_bytes()));
        }
        let commit = make_commit(message, &who, &who, parent.into_iter().collect(), tree);
        let id = commit.info.id.clone();
        state.commits.insert(id.clone(), commit);
        state.branches.insert(branch.to_string(), id.clone());
        id
    }

    pub fn tip(&self, branch: &str) -> Option<CommitRef> {
        self.state.lock().branches.get(branch).cloned()
    }

    pub fn message(&self, id: &CommitRef) -> Option<String> {
        self.state
            .lock()
            .commits
            .get(id)
            .map(|c| c.info.message.clone())
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let tip = state.branches.get(branch)?;
        state
            .commits
            .get(tip)?
            .tree
            .get(Path::new(path))
            .map(|c| c.data.clone())
    }
}

#[derive(Debug, Default)]
struct LocalState {
    commits: HashMap<CommitRef, StoredCommit>,
    branches: BTreeMap<String, CommitRef>,
    tracking: BTreeMap<String, CommitRef>,
    head: String,
    index: Tree,
    worktree: Tree,
    ignored: Vec<PathBuf>,
    poisoned: HashSet<CommitRef>,
    fail_pushes: usize,
    fail_fetches: usize,
    push_attempts: usize,
    pushes: usize,
    fetch_attempts: usize,
}

impl LocalState {
    fn stored(&self, id: &CommitRef) -> Result<&StoredCommit, VcsError> {
        self.commits
            .get(id)
            .ok_or_else(|| VcsError::NotFound(format!("commit {}", id)))
    }

    fn head_tree(&self) -> Tree {
        self.branches
            .get(&self.head)
            .and_then(|id| self.commits.get(id))
            .map(|c| c.tree.clone())
            .unwrap_or_default()
    }

    fn check_poison(&self, id: &CommitRef, kind: VcsOp) -> Result<(), VcsError> {
        if self.poisoned.contains(id) {
            return Err(VcsError::failed(kind, format!("object {} is unreadable", id)));
        }
        Ok(())
    }
}

/// In-memory [`VcsBackend`] cloned from a [`MemoryRemote`]
#[derive(Debug)]
pub struct MemoryBackend {
    workdir: PathBuf,
    remote: Arc<MemoryRemote>,
    state: Mutex<LocalState>,
}

impl MemoryBackend {
    /// Clone `branch` from `remote`; an empty remote yields an unborn branch
    pub fn clone_from(remote: Arc<MemoryRemote>, upstream: &str, branch: &str) -> Self {
        let backend = Self {
            workdir: PathBuf::from("/memory"),
            remote,
            state: Mutex::new(LocalState {
                head: branch.to_string(),
                ..Default::default()
            }),
        };
        {
            let mut state = backend.state.lock();
            backend.copy_from_remote(&mut state, upstream, branch);
            let key = format!("{}/{}", upstream, branch);
            if let Some(tip) = state.tracking.get(&key).cloned() {
                let tree = state.commits.get(&tip).map(|c| c.tree.clone()).unwrap_or_default();
                state.branches.insert(branch.to_string(), tip);
                state.index = tree.clone();
                state.worktree = tree;
            }
        }
        backend
    }

    fn copy_from_remote(&self, state: &mut LocalState, upstream: &str, branch: &str) {
        let remote = self.remote.state.lock();
        for (id, commit) in &remote.commits {
            state
                .commits
                .entry(id.clone())
                .or_insert_with(|| commit.clone());
        }
        if let Some(tip) = remote.branches.get(branch) {
            state
                .tracking
                .insert(format!("{}/{}", upstream, branch), tip.clone());
        }
    }

    /* Test helpers */

    pub fn write_file(&self, path: &str, data: &str) {
        self.state
            .lock()
            .worktree
            .insert(PathBuf::from(path), FileContent::file(data.as_bytes()));
    }

    pub fn remove_file(&self, path: &str) {
        self.state.lock().worktree.remove(Path::new(path));
    }

    pub fn worktree_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .worktree
            .get(Path::new(path))
            .map(|c| c.data.clone())
    }

    pub fn branches(&self) -> Vec<String> {
        self.state.lock().branches.keys().cloned().collect()
    }

    pub fn set_ignored(&self, paths: &[&str]) {
        self.state.lock().ignored = paths.iter().map(PathBuf::from).collect();
    }

    /// Make the next `n` pushes fail with a transient error
    pub fn fail_next_pushes(&self, n: usize) {
        self.state.lock().fail_pushes = n;
    }

    /// Make the next `n` fetches fail with a transient error
    pub fn fail_next_fetches(&self, n: usize) {
        self.state.lock().fail_fetches = n;
    }

    /// Make reads of a commit's contents fail
    pub fn poison(&self, id: &CommitRef) {
        self.state.lock().poisoned.insert(id.clone());
    }

    /// Commit the index with explicit parents and commit time
    ///
    /// Used to build graphs whose shape depends on timestamps (equal-time
    /// siblings, merges). The head branch is not moved.
    pub fn commit_at(
        &self,
        message: &str,
        parents: &[CommitRef],
        time: DateTime<Utc>,
    ) -> CommitRef {
        let who = Identity::new("tester", "tester@localhost");
        let mut state = self.state.lock();
        let tree = state.index.clone();
        let mut commit = make_commit(message, &who, &who, parents.to_vec(), tree);
        commit.info.time = time;
        let id = commit.info.id.clone();
        state.commits.insert(id.clone(), commit);
        id
    }

    pub fn push_attempts(&self) -> usize {
        self.state.lock().push_attempts
    }

    pub fn successful_pushes(&self) -> usize {
        self.state.lock().pushes
    }

    pub fn fetch_attempts(&self) -> usize {
        self.state.lock().fetch_attempts
    }
}

impl VcsBackend for MemoryBackend {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn branch_tip(&self, branch: &str) -> Result<CommitRef, VcsError> {
        self.state
            .lock()
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| VcsError::NotFound(format!("branch {}", branch)))
    }

    fn remote_tip(&self, upstream: &str, branch: &str) -> Result<CommitRef, VcsError> {
        let key = format!("{}/{}", upstream, branch);
        self.state
            .lock()
            .tracking
            .get(&key)
            .cloned()
            .ok_or(VcsError::NotFound(key))
    }

    fn commit_info(&self, id: &CommitRef) -> Result<CommitInfo, VcsError> {
        Ok(self.state.lock().stored(id)?.info.clone())
    }

    fn ahead_behind(&self, branch: &str, upstream: &str) -> Result<(usize, usize), VcsError> {
        let state = self.state.lock();
        let local = state
            .branches
            .get(branch)
            .map(|tip| ancestors(&state.commits, tip))
            .unwrap_or_default();
        let remote = state
            .tracking
            .get(&format!("{}/{}", upstream, branch))
            .map(|tip| ancestors(&state.commits, tip))
            .unwrap_or_default();
        Ok((
            local.difference(&remote).count(),
            remote.difference(&local).count(),
        ))
    }

    fn stage(&self, paths: &[PathBuf]) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        for path in paths {
            match state.worktree.get(path).cloned() {
                Some(content) => {
                    state.index.insert(path.clone(), content);
                }
                None => {
                    state.index.remove(path);
                }
            }
        }
        Ok(())
    }

    fn commit(
        &self,
        message: &str,
        author: &Identity,
        committer: &Identity,
        parents: Option<&[CommitRef]>,
    ) -> Result<Option<CommitRef>, VcsError> {
        let mut state = self.state.lock();
        let parents: Vec<CommitRef> = match parents {
            Some(parents) => parents.to_vec(),
            None => state.branches.get(&state.head).cloned().into_iter().collect(),
        };
        let tree = state.index.clone();
        if let [parent] = parents.as_slice() {
            if state.stored(parent)?.tree == tree {
                return Ok(None);
            }
        }
        let commit = make_commit(message, author, committer, parents, tree);
        let id = commit.info.id.clone();
        state.commits.insert(id.clone(), commit);
        let head = state.head.clone();
        state.branches.insert(head, id.clone());
        Ok(Some(id))
    }

    fn create_branch(&self, name: &str, at: &CommitRef, force: bool) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        state.stored(at)?;
        if state.branches.contains_key(name) && !force {
            return Err(VcsError::failed(
                VcsOp::Branch,
                format!("branch {} already exists", name),
            ));
        }
        state.branches.insert(name.to_string(), at.clone());
        Ok(())
    }

    fn rename_branch(&self, from: &str, to: &str, force: bool) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        if state.branches.contains_key(to) && !force {
            return Err(VcsError::failed(
                VcsOp::Branch,
                format!("branch {} already exists", to),
            ));
        }
        let tip = state
            .branches
            .remove(from)
            .ok_or_else(|| VcsError::NotFound(format!("branch {}", from)))?;
        state.branches.insert(to.to_string(), tip);
        if state.head == from {
            state.head = to.to_string();
        }
        Ok(())
    }

    fn delete_branch(&self, name: &str) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        if state.head == name {
            return Err(VcsError::failed(
                VcsOp::Branch,
                format!("cannot delete checked out branch {}", name),
            ));
        }
        state
            .branches
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VcsError::NotFound(format!("branch {}", name)))
    }

    fn checkout(&self, branch: &str) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        let tip = state
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| VcsError::NotFound(format!("branch {}", branch)))?;
        let tree = state.stored(&tip)?.tree.clone();

        // untracked files survive a hard checkout
        let mut worktree: Tree = state
            .worktree
            .iter()
            .filter(|(path, _)| !state.index.contains_key(*path))
            .map(|(path, content)| (path.clone(), content.clone()))
            .collect();
        worktree.extend(tree.clone());

        state.head = branch.to_string();
        state.index = tree;
        state.worktree = worktree;
        Ok(())
    }

    fn fetch(&self, upstream: &str, branch: &str) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        state.fetch_attempts += 1;
        if state.fail_fetches > 0 {
            state.fail_fetches -= 1;
            return Err(VcsError::failed(VcsOp::Fetch, "simulated network failure"));
        }
        self.copy_from_remote(&mut state, upstream, branch);
        Ok(())
    }

    fn push(&self, upstream: &str, branch: &str) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        state.push_attempts += 1;
        if state.fail_pushes > 0 {
            state.fail_pushes -= 1;
            return Err(VcsError::failed(VcsOp::Push, "simulated network failure"));
        }
        let tip = state
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| VcsError::NotFound(format!("branch {}", branch)))?;
        let reachable = ancestors(&state.commits, &tip);

        let mut remote = self.remote.state.lock();
        if let Some(remote_tip) = remote.branches.get(branch) {
            if !reachable.contains(remote_tip) {
                return Err(VcsError::failed(VcsOp::Push, "rejected: non-fast-forward"));
            }
        }
        for id in &reachable {
            if let Some(commit) = state.commits.get(id) {
                remote
                    .commits
                    .entry(id.clone())
                    .or_insert_with(|| commit.clone());
            }
        }
        remote.branches.insert(branch.to_string(), tip.clone());
        drop(remote);

        state.tracking.insert(format!("{}/{}", upstream, branch), tip);
        state.pushes += 1;
        Ok(())
    }

    fn status(&self) -> Result<Vec<PathBuf>, VcsError> {
        let state = self.state.lock();
        let head = state.head_tree();
        let mut changed: Vec<PathBuf> = head
            .keys()
            .chain(state.worktree.keys())
            .filter(|path| head.get(*path) != state.worktree.get(*path))
            .cloned()
            .collect();
        changed.sort();
        changed.dedup();
        Ok(changed)
    }

    fn changed_paths(&self, id: &CommitRef) -> Result<Vec<PathBuf>, VcsError> {
        let state = self.state.lock();
        state.check_poison(id, VcsOp::Read)?;
        let commit = state.stored(id)?;
        let empty = Tree::new();
        let parent_tree = match commit.info.parents.first() {
            Some(parent) => &state.stored(parent)?.tree,
            None => &empty,
        };
        let mut changed: Vec<PathBuf> = commit
            .tree
            .keys()
            .chain(parent_tree.keys())
            .filter(|path| commit.tree.get(*path) != parent_tree.get(*path))
            .cloned()
            .collect();
        changed.sort();
        changed.dedup();
        Ok(changed)
    }

    fn read_file(&self, id: &CommitRef, path: &Path) -> Result<Option<FileContent>, VcsError> {
        let state = self.state.lock();
        state.check_poison(id, VcsOp::Read)?;
        Ok(state.stored(id)?.tree.get(path).cloned())
    }

    fn list_dir(&self, id: &CommitRef, path: &Path) -> Result<Vec<TreeEntry>, VcsError> {
        let state = self.state.lock();
        let commit = state.stored(id)?;
        let mut entries: BTreeMap<String, TreeEntry> = BTreeMap::new();
        for (file, content) in &commit.tree {
            let Ok(rest) = file.strip_prefix(path) else {
                continue;
            };
            let mut components = rest.components();
            let Some(first) = components.next() else {
                continue;
            };
            let name = first.as_os_str().to_string_lossy().into_owned();
            let entry = if components.next().is_some() {
                TreeEntry {
                    name: name.clone(),
                    kind: EntryKind::Directory,
                    size: 0,
                }
            } else {
                TreeEntry {
                    name: name.clone(),
                    kind: content.kind,
                    size: content.data.len() as u64,
                }
            };
            entries.insert(name, entry);
        }
        if entries.is_empty() && !path.as_os_str().is_empty() {
            return Err(VcsError::NotFound(path.display().to_string()));
        }
        Ok(entries.into_values().collect())
    }

    fn entry(&self, id: &CommitRef, path: &Path) -> Result<Option<TreeEntry>, VcsError> {
        let state = self.state.lock();
        let commit = state.stored(id)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if path.as_os_str().is_empty() {
            return Ok(Some(TreeEntry {
                name,
                kind: EntryKind::Directory,
                size: 0,
            }));
        }
        if let Some(content) = commit.tree.get(path) {
            return Ok(Some(TreeEntry {
                name,
                kind: content.kind,
                size: content.data.len() as u64,
            }));
        }
        let is_dir = commit
            .tree
            .keys()
            .any(|file| file != path && file.starts_with(path));
        Ok(is_dir.then_some(TreeEntry {
            name,
            kind: EntryKind::Directory,
            size: 0,
        }))
    }

    fn write_worktree(&self, path: &Path, content: Option<&FileContent>) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        match content {
            Some(content) => {
                state.worktree.insert(path.to_path_buf(), content.clone());
            }
            None => {
                state.worktree.remove(path);
            }
        }
        Ok(())
    }

    fn is_ignored(&self, path: &Path) -> Result<bool, VcsError> {
        let state = self.state.lock();
        Ok(state.ignored.iter().any(|ignored| path.starts_with(ignored)))
    }
}
