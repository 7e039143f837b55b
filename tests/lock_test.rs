//! Lock registry behavior across simulated processes and hosts.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Barrier;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use herd::lock::{LockError, LockMode, LockRegistry};
use serial_test::serial;

use common::TestArchive;

fn manifest_path(archive: &TestArchive, id: &str) -> PathBuf {
    archive.dataset_dir(id).join("MANIFEST.tsv")
}

/// Hand-write a sidecar as if another process on another host held the lock.
fn plant_foreign_lock(resource: &Path, mode: LockMode, heartbeat_age: Duration) {
    let now = Utc::now();
    let heartbeat = now - ChronoDuration::from_std(heartbeat_age).unwrap();
    let content = format!(
        "path: {}\nmode: {}\nowner: 4242@worker-07.cluster verify\nacquired_at: {}\nheartbeat_at: {}\n",
        resource.display(),
        mode,
        heartbeat.to_rfc3339_opts(SecondsFormat::Micros, true),
        heartbeat.to_rfc3339_opts(SecondsFormat::Micros, true),
    );
    let name = resource.file_name().unwrap().to_string_lossy();
    let sidecar = match mode {
        LockMode::Exclusive => resource.with_file_name(format!("{name}.x.lock")),
        LockMode::Shared => resource.with_file_name(format!("{name}.s-4242-worker-07.cluster.lock")),
    };
    std::fs::write(sidecar, content).unwrap();
}

#[test]
fn concurrent_exclusive_claims_have_exactly_one_winner() {
    let archive = TestArchive::with_datasets(&["GSE1"]);
    let resource = manifest_path(&archive, "GSE1");
    let registry = LockRegistry::with_default_ttl();
    let barrier = Barrier::new(2);

    let (a, b) = std::thread::scope(|scope| {
        let run = || {
            barrier.wait();
            registry.acquire(&resource, LockMode::Exclusive, "refresh")
        };
        let ta = scope.spawn(run);
        let tb = scope.spawn(run);
        (ta.join().unwrap(), tb.join().unwrap())
    });

    assert_eq!(
        a.is_ok() as usize + b.is_ok() as usize,
        1,
        "a: {:?}, b: {:?}",
        a.as_ref().map(|g| g.info().clone()),
        b.as_ref().map(|g| g.info().clone())
    );
    // The loser must see the winner's identity, not a corruption error
    for result in [a, b] {
        if let Err(e) = result {
            match e {
                LockError::Busy { held_by } => {
                    assert_eq!(held_by.owner.pid, std::process::id());
                    assert_eq!(held_by.mode, LockMode::Exclusive);
                    assert_eq!(held_by.owner.tag, "refresh");
                }
                other => panic!("expected Busy, got {other}"),
            }
        }
    }
}

#[test]
fn fresh_foreign_exclusive_lock_blocks_acquisition() {
    let archive = TestArchive::with_datasets(&["GSE1"]);
    let resource = manifest_path(&archive, "GSE1");
    plant_foreign_lock(&resource, LockMode::Exclusive, Duration::from_secs(10));

    let registry = LockRegistry::with_default_ttl();
    let err = registry
        .acquire(&resource, LockMode::Exclusive, "refresh")
        .unwrap_err();
    match err {
        LockError::Busy { held_by } => {
            assert_eq!(held_by.owner.pid, 4242);
            assert_eq!(held_by.owner.host, "worker-07.cluster");
            assert_eq!(held_by.mode, LockMode::Exclusive);
        }
        other => panic!("expected Busy, got {other}"),
    }

    // Shared acquisition is blocked by the same holder.
    let err = registry
        .acquire(&resource, LockMode::Shared, "verify")
        .unwrap_err();
    assert!(matches!(err, LockError::Busy { .. }));
}

#[test]
fn stale_foreign_lock_is_reclaimed() {
    let archive = TestArchive::with_datasets(&["GSE1"]);
    let resource = manifest_path(&archive, "GSE1");
    plant_foreign_lock(&resource, LockMode::Exclusive, Duration::from_secs(3600));

    let registry = LockRegistry::with_default_ttl();
    let guard = registry
        .acquire(&resource, LockMode::Exclusive, "refresh")
        .expect("stale holder should be reclaimed");
    assert_eq!(guard.resource(), resource.as_path());
}

#[test]
fn shared_holders_coexist_and_block_exclusive() {
    let archive = TestArchive::with_datasets(&["GSE1"]);
    let resource = manifest_path(&archive, "GSE1");
    plant_foreign_lock(&resource, LockMode::Shared, Duration::from_secs(5));

    let registry = LockRegistry::with_default_ttl();
    // Our own shared lock coexists with the foreign one.
    let guard = registry
        .acquire(&resource, LockMode::Shared, "verify")
        .expect("shared locks coexist");

    let err = registry
        .acquire(&resource, LockMode::Exclusive, "refresh")
        .unwrap_err();
    assert!(matches!(err, LockError::Busy { .. }), "{err}");

    // Releasing ours still leaves the foreign shared holder in the way.
    guard.release().unwrap();
    let err = registry
        .acquire(&resource, LockMode::Exclusive, "refresh")
        .unwrap_err();
    match err {
        LockError::Busy { held_by } => assert_eq!(held_by.mode, LockMode::Shared),
        other => panic!("expected Busy, got {other}"),
    }
}

#[test]
#[serial]
fn crashed_holder_is_reclaimed_after_ttl() {
    let archive = TestArchive::with_datasets(&["GSE1"]);
    let resource = manifest_path(&archive, "GSE1");
    let registry = LockRegistry::new(Duration::from_millis(50));

    let guard = registry
        .acquire(&resource, LockMode::Exclusive, "refresh")
        .unwrap();
    // A crash never runs Drop; leak the guard so the sidecar stays behind.
    std::mem::forget(guard);

    let err = registry
        .acquire(&resource, LockMode::Exclusive, "refresh")
        .unwrap_err();
    assert!(matches!(err, LockError::Busy { .. }));

    std::thread::sleep(Duration::from_millis(120));
    registry
        .acquire(&resource, LockMode::Exclusive, "refresh")
        .expect("holder past its TTL should be reclaimed");
}

#[test]
#[serial]
fn heartbeat_keeps_a_long_holder_alive() {
    let archive = TestArchive::with_datasets(&["GSE1"]);
    let resource = manifest_path(&archive, "GSE1");
    let registry = LockRegistry::new(Duration::from_millis(150));

    let mut guard = registry
        .acquire(&resource, LockMode::Exclusive, "refresh")
        .unwrap();
    for _ in 0..6 {
        std::thread::sleep(Duration::from_millis(50));
        guard.heartbeat().unwrap();
        let err = registry
            .acquire(&resource, LockMode::Exclusive, "steal")
            .unwrap_err();
        assert!(matches!(err, LockError::Busy { .. }), "{err}");
    }
    guard.release().unwrap();
}

#[test]
fn listing_honors_the_depth_bound() {
    let archive = TestArchive::with_datasets(&["GSE1"]);
    let root = archive.root();
    let deep = root.join("GSE1/raw/run1");
    std::fs::create_dir_all(&deep).unwrap();
    std::fs::write(root.join("top.dat"), b"x").unwrap();
    std::fs::write(root.join("GSE1/mid.dat"), b"x").unwrap();
    std::fs::write(deep.join("deep.dat"), b"x").unwrap();

    let registry = LockRegistry::with_default_ttl();
    let g0 = registry.acquire(&root.join("top.dat"), LockMode::Exclusive, "t").unwrap();
    let g1 = registry.acquire(&root.join("GSE1/mid.dat"), LockMode::Shared, "t").unwrap();
    let g3 = registry.acquire(&deep.join("deep.dat"), LockMode::Exclusive, "t").unwrap();

    let at_depth = |d: usize| registry.list_locks(root, d).count();
    assert_eq!(at_depth(0), 1);
    assert_eq!(at_depth(1), 2);
    assert_eq!(at_depth(5), 3);

    // Listing never caches: a release is visible to the next walk.
    g1.release().unwrap();
    assert_eq!(at_depth(5), 2);
    drop(g0);
    drop(g3);
}
