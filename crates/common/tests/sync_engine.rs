//! End-to-end behaviour of the sync engine thread against an in-memory remote

mod common;

use std::time::Duration;

use ::common::sync::EngineState;
use ::common::vcs::{walk, VcsBackend};

use common::{fast_config, wait_until, MemoryMount};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Three edits inside one quiet window land in a single commit; a failed
/// push flips the health flag until the retry goes through.
#[test]
fn test_batch_then_push_retry() {
    let mut mount = MemoryMount::new(fast_config());
    mount.backend.fail_next_pushes(1);

    mount.write("a", "1", "Update a");
    mount.write("b", "2", "Update b");
    mount.write("c", "3", "Update c");
    let handle = mount.start();

    wait_until(TIMEOUT, "failed push", || {
        !mount.coordination.push_successful.is_set()
    });
    // writes are refused while the push is unhealthy
    assert!(mount.coordination.admit_write().is_err());

    wait_until(TIMEOUT, "successful retry", || {
        mount.coordination.push_successful.is_set()
    });
    assert_eq!(mount.backend.successful_pushes(), 1);
    assert_eq!(mount.backend.push_attempts(), 2);

    let tip = mount.remote.tip("master").unwrap();
    assert_eq!(mount.remote.message(&tip).as_deref(), Some("Update 3 items"));
    for (path, data) in [("a", "1"), ("b", "2"), ("c", "3")] {
        assert_eq!(mount.remote.file("master", path), Some(data.as_bytes().to_vec()));
    }
    assert_eq!(handle.commits(), 1);

    handle.shutdown().unwrap();
}

#[test]
fn test_single_job_round_trip() {
    let mut mount = MemoryMount::new(fast_config());
    mount.write("a.txt", "hello", "m");
    let handle = mount.start();

    wait_until(TIMEOUT, "push", || mount.backend.successful_pushes() == 1);

    let tip = mount.backend.branch_tip("master").unwrap();
    let history: Vec<String> = walk(mount.backend.as_ref(), &tip)
        .map(|info| info.unwrap().message)
        .collect();
    assert_eq!(history, vec!["m".to_string(), "initial".to_string()]);

    handle.shutdown().unwrap();
}

#[test]
fn test_separate_windows_make_separate_commits() {
    let mut mount = MemoryMount::new(fast_config());
    let handle = mount.start();

    mount.write("one", "1", "Update one");
    wait_until(TIMEOUT, "first push", || mount.backend.successful_pushes() == 1);
    mount.write("two", "2", "Update two");
    wait_until(TIMEOUT, "second push", || mount.backend.successful_pushes() == 2);

    assert_eq!(handle.commits(), 2);
    let tip = mount.remote.tip("master").unwrap();
    assert_eq!(mount.remote.message(&tip).as_deref(), Some("Update two"));

    handle.shutdown().unwrap();
}

#[test]
fn test_remote_changes_are_merged_before_push() {
    let mut mount = MemoryMount::new(fast_config());
    mount
        .remote
        .commit_files("master", &[("theirs.txt", "remote")], "remote edit");
    mount.backend.fetch("origin", "master").unwrap();

    mount.write("ours.txt", "local", "Update ours.txt");
    let handle = mount.start();

    wait_until(TIMEOUT, "merged push", || mount.backend.successful_pushes() == 1);
    assert_eq!(mount.remote.file("master", "ours.txt"), Some(b"local".to_vec()));
    assert_eq!(mount.remote.file("master", "theirs.txt"), Some(b"remote".to_vec()));
    assert_eq!(mount.backend.worktree_file("theirs.txt"), Some(b"remote".to_vec()));

    handle.shutdown().unwrap();
}

#[test]
fn test_shutdown_commits_without_pushing() {
    let mut config = fast_config();
    config.poll_interval = Duration::from_millis(100);
    let mut mount = MemoryMount::new(config);
    let mut handle = mount.start();
    // hold a writer so the idle cycle cannot take the job
    let guard = mount.coordination.admit_write().unwrap();
    mount.write("late", "x", "Update late");
    drop(guard);

    mount.coordination.shutdown();
    handle.join().unwrap();

    assert_eq!(handle.state(), EngineState::ShuttingDown);
    assert_eq!(mount.backend.ahead_behind("master", "origin").unwrap().0, 1);
    assert_eq!(mount.backend.successful_pushes(), 0);
}
