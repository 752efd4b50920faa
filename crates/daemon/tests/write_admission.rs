//! Writes are gated on remote health and excluded from sync cycles

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gitmount_daemon::{FsCall, FsError, FsReply};

use common::Fixture;

#[test]
fn test_failed_fetch_makes_mount_read_only() {
    let fx = Fixture::new();
    fx.coordination.fetch_successful.clear();
    let before = fx.coordination.active_writers.load();

    let err = fx
        .router
        .dispatch("/current/new.txt", FsCall::Create { mode: 0o644 })
        .unwrap_err();
    assert!(matches!(err, FsError::ReadOnly));
    assert_eq!(err.errno(), libc::EROFS);
    assert_eq!(fx.coordination.active_writers.load(), before);
    assert!(!fx.workdir().join("new.txt").exists());

    // reads stay available
    assert!(matches!(
        fx.router.dispatch("/current/README.md", FsCall::GetAttr),
        Ok(FsReply::Attr(_))
    ));

    fx.coordination.fetch_successful.set();
    fx.write_file("/current/new.txt", b"ok");
    assert_eq!(fx.drain().len(), 1);
    assert_eq!(fx.coordination.active_writers.load(), before);
}

#[test]
fn test_failed_push_makes_mount_read_only() {
    let fx = Fixture::new();
    fx.coordination.push_successful.clear();

    for call in [
        FsCall::Unlink,
        FsCall::Chmod { mode: 0o600 },
        FsCall::Truncate { size: 0, fh: None },
    ] {
        let err = fx.router.dispatch("/current/README.md", call).unwrap_err();
        assert!(matches!(err, FsError::ReadOnly), "{} was admitted", call.name());
    }
    assert_eq!(fx.coordination.active_writers.load(), 0);
    assert!(fx.workdir().join("README.md").exists());
    assert!(fx.drain().is_empty());
}

#[test]
fn test_truncating_open_refused_while_read_only() {
    let fx = Fixture::new();
    fx.coordination.push_successful.clear();
    let readme = fx.workdir().join("README.md");
    let before = std::fs::metadata(&readme).unwrap().len();

    let err = fx
        .router
        .dispatch(
            "/current/README.md",
            FsCall::Open {
                flags: libc::O_WRONLY | libc::O_TRUNC,
            },
        )
        .unwrap_err();
    assert!(matches!(err, FsError::ReadOnly));
    assert_eq!(std::fs::metadata(&readme).unwrap().len(), before);
    assert_eq!(fx.coordination.active_writers.load(), 0);
    assert!(fx.drain().is_empty());

    // plain opens are reads and still go through
    let fh = match fx
        .router
        .dispatch("/current/README.md", FsCall::Open { flags: libc::O_RDONLY })
        .unwrap()
    {
        FsReply::Handle(fh) => fh,
        other => panic!("expected a handle, got {:?}", other),
    };
    fx.router
        .dispatch("/current/README.md", FsCall::Release { fh })
        .unwrap();
    assert!(fx.drain().is_empty());
}

#[test]
fn test_oversized_file_kept_when_release_is_refused() {
    let fx = Fixture::with_limits(16, 8);
    let path = "/current/big.bin";
    let fh = match fx.router.dispatch(path, FsCall::Create { mode: 0o644 }).unwrap() {
        FsReply::Handle(fh) => fh,
        other => panic!("expected a handle, got {:?}", other),
    };
    let err = fx
        .router
        .dispatch(path, FsCall::Write { fh, offset: 0, data: &[0u8; 32] })
        .unwrap_err();
    assert!(matches!(err, FsError::TooLarge));

    fx.coordination.fetch_successful.clear();
    let err = fx.router.dispatch(path, FsCall::Release { fh }).unwrap_err();
    assert!(matches!(err, FsError::ReadOnly));
    assert!(fx.workdir().join("big.bin").exists());
    assert_eq!(fx.coordination.active_writers.load(), 0);
    assert!(fx.drain().is_empty());
}

#[test]
fn test_history_is_read_only_regardless_of_health() {
    let fx = Fixture::new();
    let day = fx.commits.latest().unwrap().date();

    let err = fx
        .router
        .dispatch(&format!("/history/{}/x", day), FsCall::Mkdir { mode: 0o755 })
        .unwrap_err();
    assert!(matches!(err, FsError::ReadOnly));

    let err = fx
        .router
        .dispatch("/history", FsCall::Open { flags: libc::O_WRONLY })
        .unwrap_err();
    assert!(matches!(err, FsError::ReadOnly));
}

#[test]
fn test_write_waits_for_sync_cycle() {
    let fx = Arc::new(Fixture::new());
    fx.coordination.begin_sync();

    let writer = {
        let fx = fx.clone();
        thread::spawn(move || {
            fx.router
                .dispatch("/current/README.md", FsCall::Chmod { mode: 0o644 })
                .map(|_| ())
        })
    };

    thread::sleep(Duration::from_millis(300));
    assert!(!writer.is_finished(), "write ran during a sync cycle");
    assert_eq!(fx.coordination.active_writers.load(), 0);

    fx.coordination.finish_sync();
    writer.join().unwrap().unwrap();
    assert_eq!(fx.coordination.active_writers.load(), 0);
    assert_eq!(fx.drain().len(), 1);
}

#[test]
fn test_truncating_open_waits_for_sync_cycle() {
    let fx = Arc::new(Fixture::new());
    let readme = fx.workdir().join("README.md");
    fx.coordination.begin_sync();

    let writer = {
        let fx = fx.clone();
        thread::spawn(move || {
            fx.router.dispatch(
                "/current/README.md",
                FsCall::Open {
                    flags: libc::O_WRONLY | libc::O_TRUNC,
                },
            )
        })
    };

    thread::sleep(Duration::from_millis(300));
    assert!(!writer.is_finished(), "truncating open ran during a sync cycle");
    assert!(std::fs::metadata(&readme).unwrap().len() > 0);

    fx.coordination.finish_sync();
    let fh = match writer.join().unwrap().unwrap() {
        FsReply::Handle(fh) => fh,
        other => panic!("expected a handle, got {:?}", other),
    };
    assert_eq!(std::fs::metadata(&readme).unwrap().len(), 0);
    fx.router
        .dispatch("/current/README.md", FsCall::Release { fh })
        .unwrap();
    let jobs = fx.drain();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].message, "Update README.md");
}

#[test]
fn test_shutdown_refuses_writes() {
    let fx = Fixture::new();
    fx.coordination.shutdown();
    let err = fx
        .router
        .dispatch("/current/x", FsCall::Symlink { target: "README.md" })
        .unwrap_err();
    assert!(matches!(err, FsError::ReadOnly));
}
