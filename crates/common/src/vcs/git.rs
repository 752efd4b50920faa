//! On-disk repository driven through libgit2

use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{
    build::RepoBuilder, BranchType, Config, Cred, ErrorCode, FetchOptions, ObjectType, Oid,
    PushOptions, RemoteCallbacks, Repository, ResetType, Signature, StatusOptions, Tree,
};
use parking_lot::Mutex;

use super::{
    CommitInfo, CommitRef, EntryKind, FileContent, Identity, TreeEntry, VcsBackend, VcsError,
    VcsOp,
};

const MODE_EXECUTABLE: i32 = 0o100755;
const MODE_SYMLINK: i32 = 0o120000;

/// [`VcsBackend`] over a non-bare git repository
pub struct GitBackend {
    repo: Mutex<Repository>,
    workdir: PathBuf,
}

impl std::fmt::Debug for GitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitBackend")
            .field("workdir", &self.workdir)
            .finish()
    }
}

/// Credentials from the ssh agent, then the configured credential helper
fn remote_callbacks<'a>(cfg: Option<Config>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, allowed| {
        if allowed.is_ssh_key() {
            if let Some(user) = username_from_url {
                return Cred::ssh_key_from_agent(user);
            }
        }
        if allowed.is_user_pass_plaintext() {
            if let Some(ref cfg) = cfg {
                if let Ok(cred) = Cred::credential_helper(cfg, url, username_from_url) {
                    return Ok(cred);
                }
            }
        }
        Cred::default()
    });
    callbacks
}

fn resolve(id: &CommitRef) -> Result<Oid, VcsError> {
    Oid::from_str(id.as_str()).map_err(VcsError::with(VcsOp::Resolve))
}

fn commit_ref(oid: Oid) -> CommitRef {
    CommitRef::new(oid.to_string())
}

fn identity(sig: &Signature<'_>) -> Identity {
    Identity::new(
        sig.name().unwrap_or_default(),
        sig.email().unwrap_or_default(),
    )
}

fn signature(who: &Identity) -> Result<Signature<'static>, VcsError> {
    Signature::now(&who.name, &who.email).map_err(VcsError::with(VcsOp::Commit))
}

fn entry_kind(filemode: i32, kind: Option<ObjectType>) -> EntryKind {
    match (kind, filemode) {
        (Some(ObjectType::Tree), _) => EntryKind::Directory,
        (_, MODE_EXECUTABLE) => EntryKind::Executable,
        (_, MODE_SYMLINK) => EntryKind::Symlink,
        _ => EntryKind::File,
    }
}

fn not_found(e: &git2::Error) -> bool {
    e.code() == ErrorCode::NotFound
}

impl GitBackend {
    pub fn open(path: &Path) -> Result<Self, VcsError> {
        let repo = Repository::open(path).map_err(VcsError::with(VcsOp::Open))?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| VcsError::failed(VcsOp::Open, "bare repositories cannot be mounted"))?
            .to_path_buf();
        Ok(Self {
            repo: Mutex::new(repo),
            workdir,
        })
    }

    /// Open `path` if it already holds a clone, otherwise clone `url` into it
    pub fn clone_or_open(url: &str, path: &Path, branch: &str) -> Result<Self, VcsError> {
        if path.join(".git").exists() {
            tracing::info!("using existing clone at {}", path.display());
            return Self::open(path);
        }

        tracing::info!("cloning {} into {}", url, path.display());
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(remote_callbacks(Config::open_default().ok()));
        RepoBuilder::new()
            .branch(branch)
            .fetch_options(fo)
            .clone(url, path)
            .map_err(VcsError::with(VcsOp::Clone))?;
        Self::open(path)
    }

    fn tree_at<'r>(repo: &'r Repository, id: &CommitRef) -> Result<Tree<'r>, VcsError> {
        let oid = resolve(id)?;
        let commit = repo.find_commit(oid).map_err(|e| {
            if not_found(&e) {
                VcsError::NotFound(format!("commit {}", id))
            } else {
                VcsError::failed(VcsOp::Read, e)
            }
        })?;
        commit.tree().map_err(VcsError::with(VcsOp::Read))
    }

    /// Subtree at `path`; the empty path is the commit's root tree
    fn subtree_at<'r>(
        repo: &'r Repository,
        id: &CommitRef,
        path: &Path,
    ) -> Result<Option<Tree<'r>>, VcsError> {
        let root = Self::tree_at(repo, id)?;
        if path.as_os_str().is_empty() {
            return Ok(Some(root));
        }
        let entry = match root.get_path(path) {
            Ok(entry) => entry,
            Err(e) if not_found(&e) => return Ok(None),
            Err(e) => return Err(VcsError::failed(VcsOp::Read, e)),
        };
        if entry.kind() != Some(ObjectType::Tree) {
            return Ok(None);
        }
        let tree = entry
            .to_object(repo)
            .and_then(|o| o.peel_to_tree())
            .map_err(VcsError::with(VcsOp::Read))?;
        Ok(Some(tree))
    }
}

impl VcsBackend for GitBackend {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn branch_tip(&self, branch: &str) -> Result<CommitRef, VcsError> {
        let repo = self.repo.lock();
        let found = match repo.find_branch(branch, BranchType::Local) {
            Ok(found) => found,
            Err(e) if not_found(&e) => return Err(VcsError::NotFound(format!("branch {}", branch))),
            Err(e) => return Err(VcsError::failed(VcsOp::Resolve, e)),
        };
        found
            .get()
            .target()
            .map(commit_ref)
            .ok_or_else(|| VcsError::NotFound(format!("branch {}", branch)))
    }

    fn remote_tip(&self, upstream: &str, branch: &str) -> Result<CommitRef, VcsError> {
        let repo = self.repo.lock();
        let name = format!("refs/remotes/{}/{}", upstream, branch);
        match repo.refname_to_id(&name) {
            Ok(oid) => Ok(commit_ref(oid)),
            Err(e) if not_found(&e) => Err(VcsError::NotFound(name)),
            Err(e) => Err(VcsError::failed(VcsOp::Resolve, e)),
        }
    }

    fn commit_info(&self, id: &CommitRef) -> Result<CommitInfo, VcsError> {
        let repo = self.repo.lock();
        let oid = resolve(id)?;
        let commit = repo.find_commit(oid).map_err(|e| {
            if not_found(&e) {
                VcsError::NotFound(format!("commit {}", id))
            } else {
                VcsError::failed(VcsOp::Walk, e)
            }
        })?;
        let time = DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0)
            .unwrap_or(DateTime::UNIX_EPOCH);
        let info = CommitInfo {
            id: id.clone(),
            parents: commit.parent_ids().map(commit_ref).collect(),
            time,
            message: commit.message().unwrap_or_default().to_string(),
            author: identity(&commit.author()),
            committer: identity(&commit.committer()),
        };
        Ok(info)
    }

    fn ahead_behind(&self, branch: &str, upstream: &str) -> Result<(usize, usize), VcsError> {
        let local = match self.branch_tip(branch) {
            Ok(tip) => Some(tip),
            Err(VcsError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let remote = match self.remote_tip(upstream, branch) {
            Ok(tip) => Some(tip),
            Err(VcsError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let repo = self.repo.lock();
        match (local, remote) {
            (Some(local), Some(remote)) => repo
                .graph_ahead_behind(
                    resolve(&local)?,
                    resolve(&remote)?,
                )
                .map_err(VcsError::with(VcsOp::Walk)),
            // nothing on the remote yet: every local commit is ahead
            (Some(local), None) => {
                let mut walk = repo.revwalk().map_err(VcsError::with(VcsOp::Walk))?;
                walk.push(resolve(&local)?)
                    .map_err(VcsError::with(VcsOp::Walk))?;
                Ok((walk.count(), 0))
            }
            (None, Some(remote)) => {
                let mut walk = repo.revwalk().map_err(VcsError::with(VcsOp::Walk))?;
                walk.push(resolve(&remote)?)
                    .map_err(VcsError::with(VcsOp::Walk))?;
                Ok((0, walk.count()))
            }
            (None, None) => Ok((0, 0)),
        }
    }

    fn stage(&self, paths: &[PathBuf]) -> Result<(), VcsError> {
        let repo = self.repo.lock();
        let mut index = repo.index().map_err(VcsError::with(VcsOp::Stage))?;
        for path in paths {
            let on_disk = fs::symlink_metadata(self.workdir.join(path)).is_ok();
            if on_disk {
                index.add_path(path).map_err(VcsError::with(VcsOp::Stage))?;
            } else if let Err(e) = index.remove_path(path) {
                if !not_found(&e) {
                    return Err(VcsError::failed(VcsOp::Stage, e));
                }
            }
        }
        index.write().map_err(VcsError::with(VcsOp::Stage))
    }

    fn commit(
        &self,
        message: &str,
        author: &Identity,
        committer: &Identity,
        parents: Option<&[CommitRef]>,
    ) -> Result<Option<CommitRef>, VcsError> {
        let repo = self.repo.lock();
        let mut index = repo.index().map_err(VcsError::with(VcsOp::Commit))?;
        let tree_oid = index.write_tree().map_err(VcsError::with(VcsOp::Commit))?;
        let tree = repo
            .find_tree(tree_oid)
            .map_err(VcsError::with(VcsOp::Commit))?;

        let parent_oids: Vec<Oid> = match parents {
            Some(parents) => parents
                .iter()
                .map(resolve)
                .collect::<Result<_, _>>()?,
            None => match repo.head() {
                Ok(head) => head.target().into_iter().collect(),
                Err(e) if e.code() == ErrorCode::UnbornBranch || not_found(&e) => Vec::new(),
                Err(e) => return Err(VcsError::failed(VcsOp::Commit, e)),
            },
        };
        let parent_commits = parent_oids
            .iter()
            .map(|oid| repo.find_commit(*oid))
            .collect::<Result<Vec<_>, _>>()
            .map_err(VcsError::with(VcsOp::Commit))?;

        if let [parent] = parent_commits.as_slice() {
            if parent.tree_id() == tree_oid {
                return Ok(None);
            }
        }

        let parent_refs: Vec<_> = parent_commits.iter().collect();
        let oid = repo
            .commit(
                Some("HEAD"),
                &signature(author)?,
                &signature(committer)?,
                message,
                &tree,
                &parent_refs,
            )
            .map_err(VcsError::with(VcsOp::Commit))?;
        Ok(Some(commit_ref(oid)))
    }

    fn create_branch(&self, name: &str, at: &CommitRef, force: bool) -> Result<(), VcsError> {
        let repo = self.repo.lock();
        let commit = repo
            .find_commit(resolve(at)?)
            .map_err(VcsError::with(VcsOp::Branch))?;
        repo.branch(name, &commit, force)
            .map_err(VcsError::with(VcsOp::Branch))?;
        Ok(())
    }

    fn rename_branch(&self, from: &str, to: &str, force: bool) -> Result<(), VcsError> {
        let repo = self.repo.lock();
        let mut branch = repo
            .find_branch(from, BranchType::Local)
            .map_err(VcsError::with(VcsOp::Branch))?;
        branch
            .rename(to, force)
            .map_err(VcsError::with(VcsOp::Branch))?;
        Ok(())
    }

    fn delete_branch(&self, name: &str) -> Result<(), VcsError> {
        let repo = self.repo.lock();
        let mut branch = match repo.find_branch(name, BranchType::Local) {
            Ok(branch) => branch,
            Err(e) if not_found(&e) => return Err(VcsError::NotFound(format!("branch {}", name))),
            Err(e) => return Err(VcsError::failed(VcsOp::Branch, e)),
        };
        branch.delete().map_err(VcsError::with(VcsOp::Branch))
    }

    fn checkout(&self, branch: &str) -> Result<(), VcsError> {
        let repo = self.repo.lock();
        let refname = format!("refs/heads/{}", branch);
        let oid = repo
            .refname_to_id(&refname)
            .map_err(VcsError::with(VcsOp::Checkout))?;
        repo.set_head(&refname)
            .map_err(VcsError::with(VcsOp::Checkout))?;
        let target = repo
            .find_object(oid, Some(ObjectType::Commit))
            .map_err(VcsError::with(VcsOp::Checkout))?;
        repo.reset(&target, ResetType::Hard, None)
            .map_err(VcsError::with(VcsOp::Checkout))
    }

    fn fetch(&self, upstream: &str, branch: &str) -> Result<(), VcsError> {
        let repo = self.repo.lock();
        let mut remote = repo
            .find_remote(upstream)
            .map_err(VcsError::with(VcsOp::Fetch))?;
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(remote_callbacks(repo.config().ok()));
        let refspec = format!("+refs/heads/{b}:refs/remotes/{u}/{b}", b = branch, u = upstream);
        remote
            .fetch(&[refspec.as_str()], Some(&mut fo), None)
            .map_err(VcsError::with(VcsOp::Fetch))
    }

    fn push(&self, upstream: &str, branch: &str) -> Result<(), VcsError> {
        let repo = self.repo.lock();
        let mut remote = repo
            .find_remote(upstream)
            .map_err(VcsError::with(VcsOp::Push))?;
        let refspec = format!("refs/heads/{b}:refs/heads/{b}", b = branch);

        let rejected: RefCell<Option<String>> = RefCell::new(None);
        {
            let mut callbacks = remote_callbacks(repo.config().ok());
            callbacks.push_update_reference(|_refname, status| {
                if let Some(msg) = status {
                    *rejected.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });
            let mut po = PushOptions::new();
            po.remote_callbacks(callbacks);
            remote
                .push(&[refspec.as_str()], Some(&mut po))
                .map_err(VcsError::with(VcsOp::Push))?;
        }
        if let Some(msg) = rejected.into_inner() {
            return Err(VcsError::failed(VcsOp::Push, format!("rejected: {}", msg)));
        }

        // keep the tracking ref in step so ahead/behind reflects the push
        let oid = repo
            .refname_to_id(&format!("refs/heads/{}", branch))
            .map_err(VcsError::with(VcsOp::Push))?;
        repo.reference(
            &format!("refs/remotes/{}/{}", upstream, branch),
            oid,
            true,
            "push",
        )
        .map_err(VcsError::with(VcsOp::Push))?;
        Ok(())
    }

    fn status(&self) -> Result<Vec<PathBuf>, VcsError> {
        let repo = self.repo.lock();
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = repo
            .statuses(Some(&mut opts))
            .map_err(VcsError::with(VcsOp::Status))?;
        Ok(statuses
            .iter()
            .filter(|entry| !entry.status().is_ignored())
            .filter_map(|entry| entry.path().map(PathBuf::from))
            .collect())
    }

    fn changed_paths(&self, id: &CommitRef) -> Result<Vec<PathBuf>, VcsError> {
        let repo = self.repo.lock();
        let commit = repo
            .find_commit(resolve(id)?)
            .map_err(VcsError::with(VcsOp::Read))?;
        let tree = commit.tree().map_err(VcsError::with(VcsOp::Read))?;
        let parent_tree = match commit.parent(0) {
            Ok(parent) => Some(parent.tree().map_err(VcsError::with(VcsOp::Read))?),
            Err(_) => None,
        };
        let diff = repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
            .map_err(VcsError::with(VcsOp::Read))?;
        let mut paths: Vec<PathBuf> = diff
            .deltas()
            .filter_map(|delta| {
                delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path())
                    .map(Path::to_path_buf)
            })
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    fn read_file(&self, id: &CommitRef, path: &Path) -> Result<Option<FileContent>, VcsError> {
        let repo = self.repo.lock();
        let tree = Self::tree_at(&repo, id)?;
        let entry = match tree.get_path(path) {
            Ok(entry) => entry,
            Err(e) if not_found(&e) => return Ok(None),
            Err(e) => return Err(VcsError::failed(VcsOp::Read, e)),
        };
        let kind = entry_kind(entry.filemode(), entry.kind());
        if kind == EntryKind::Directory {
            return Ok(None);
        }
        let blob = repo
            .find_blob(entry.id())
            .map_err(VcsError::with(VcsOp::Read))?;
        Ok(Some(FileContent {
            data: blob.content().to_vec(),
            kind,
        }))
    }

    fn list_dir(&self, id: &CommitRef, path: &Path) -> Result<Vec<TreeEntry>, VcsError> {
        let repo = self.repo.lock();
        let tree = Self::subtree_at(&repo, id, path)?
            .ok_or_else(|| VcsError::NotFound(path.display().to_string()))?;
        let mut entries = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let kind = entry_kind(entry.filemode(), entry.kind());
            let size = match kind {
                EntryKind::Directory => 0,
                _ => repo
                    .find_blob(entry.id())
                    .map(|b| b.size() as u64)
                    .map_err(VcsError::with(VcsOp::Read))?,
            };
            entries.push(TreeEntry {
                name: String::from_utf8_lossy(entry.name_bytes()).into_owned(),
                kind,
                size,
            });
        }
        Ok(entries)
    }

    fn entry(&self, id: &CommitRef, path: &Path) -> Result<Option<TreeEntry>, VcsError> {
        let repo = self.repo.lock();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if path.as_os_str().is_empty() {
            Self::tree_at(&repo, id)?;
            return Ok(Some(TreeEntry {
                name,
                kind: EntryKind::Directory,
                size: 0,
            }));
        }
        let tree = Self::tree_at(&repo, id)?;
        let entry = match tree.get_path(path) {
            Ok(entry) => entry,
            Err(e) if not_found(&e) => return Ok(None),
            Err(e) => return Err(VcsError::failed(VcsOp::Read, e)),
        };
        let kind = entry_kind(entry.filemode(), entry.kind());
        let size = match kind {
            EntryKind::Directory => 0,
            _ => repo
                .find_blob(entry.id())
                .map(|b| b.size() as u64)
                .map_err(VcsError::with(VcsOp::Read))?,
        };
        Ok(Some(TreeEntry { name, kind, size }))
    }

    fn write_worktree(&self, path: &Path, content: Option<&FileContent>) -> Result<(), VcsError> {
        let full = self.workdir.join(path);
        let Some(content) = content else {
            return match fs::remove_file(&full) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => {
                    Err(VcsError::failed(VcsOp::Write, e))
                }
                _ => Ok(()),
            };
        };

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(VcsError::with(VcsOp::Write))?;
        }
        if fs::symlink_metadata(&full).is_ok() {
            fs::remove_file(&full).map_err(VcsError::with(VcsOp::Write))?;
        }
        match content.kind {
            EntryKind::Symlink => {
                let target = PathBuf::from(String::from_utf8_lossy(&content.data).into_owned());
                std::os::unix::fs::symlink(target, &full).map_err(VcsError::with(VcsOp::Write))
            }
            EntryKind::Directory => {
                fs::create_dir_all(&full).map_err(VcsError::with(VcsOp::Write))
            }
            EntryKind::File | EntryKind::Executable => {
                use std::os::unix::fs::PermissionsExt;
                fs::write(&full, &content.data).map_err(VcsError::with(VcsOp::Write))?;
                fs::set_permissions(&full, fs::Permissions::from_mode(content.kind.mode()))
                    .map_err(VcsError::with(VcsOp::Write))
            }
        }
    }

    fn is_ignored(&self, path: &Path) -> Result<bool, VcsError> {
        let repo = self.repo.lock();
        repo.is_path_ignored(path)
            .map_err(VcsError::with(VcsOp::Status))
    }
}
