//! End-to-end cycle tests: scan → delta → queue against a real SQLite
//! catalog on a real filesystem tree.

mod common;

use common::{PROJECT_A, PROJECT_B, PROJECT_DUP, TestEnvironment, assert_cycle, catalog_key};
use source_index_watcher::catalog::Catalog;
use source_index_watcher::daemon::runner::WatcherWorker;
use source_index_watcher::watcher::locks::{LockManager, LockPayload, LockState, WORKER_NAME};

#[test]
fn empty_root_produces_empty_cycle() {
    let env = TestEnvironment::new();
    env.declare_project_json("", PROJECT_A, "E");

    let stats = env.run_cycle();
    assert_eq!(stats.scanned_dirs, 1);
    assert_cycle(&stats, 0, 0, 0, 0);
}

#[test]
fn first_time_indexing_then_idempotent() {
    let env = TestEnvironment::new();
    env.declare_project("", PROJECT_A);
    env.write_file("a.py", "x = 1\n", 1000);
    env.write_file("sub/b.py", "y = 2\n", 2000);

    let first = env.run_cycle();
    assert_cycle(&first, 2, 0, 0, 0);

    // No filesystem change: the second cycle must be an empty delta.
    let second = env.run_cycle();
    assert_cycle(&second, 0, 0, 0, 0);

    let catalog = env.catalog();
    let files = catalog.get_project_files(PROJECT_A, false).unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.needs_chunking));
    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert!(paths.contains(&catalog_key(&env, "a.py").as_str()));
    assert!(paths.contains(&catalog_key(&env, "sub/b.py").as_str()));
}

#[test]
fn modification_is_reported_once() {
    let env = TestEnvironment::new();
    env.declare_project("", PROJECT_A);
    env.write_file("a.py", "x = 1\n", 1000);
    assert_cycle(&env.run_cycle(), 1, 0, 0, 0);

    env.set_mtime("a.py", 1100);
    assert_cycle(&env.run_cycle(), 0, 1, 0, 0);
    assert_cycle(&env.run_cycle(), 0, 0, 0, 0);
}

#[test]
fn sub_tolerance_mtime_drift_is_not_a_change() {
    let env = TestEnvironment::new();
    env.declare_project("", PROJECT_A);
    env.write_file("a.py", "x = 1\n", 1000);
    assert_cycle(&env.run_cycle(), 1, 0, 0, 0);

    // Whole-second granularity cannot go below the 0.1 s tolerance, so
    // re-stamping the same second must not flag a change.
    env.set_mtime("a.py", 1000);
    assert_cycle(&env.run_cycle(), 0, 0, 0, 0);
}

#[test]
fn deletion_archives_once_with_version_dir() {
    let env = TestEnvironment::new();
    env.declare_project("", PROJECT_A);
    env.write_file("a.py", "x = 1\n", 1000);
    env.write_file("sub/b.py", "y = 2\n", 2000);
    assert_cycle(&env.run_cycle(), 2, 0, 0, 0);

    env.delete_file("sub/b.py");
    assert_cycle(&env.run_cycle(), 0, 0, 1, 0);

    // Deletion stability: logically deleted rows leave the live view, so
    // the next cycle reports nothing.
    assert_cycle(&env.run_cycle(), 0, 0, 0, 0);

    let catalog = env.catalog();
    assert_eq!(catalog.get_project_files(PROJECT_A, false).unwrap().len(), 1);
    let all = catalog.get_project_files(PROJECT_A, true).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|f| f.deleted));
}

#[test]
fn deletion_without_version_dir_is_an_error() {
    let env = TestEnvironment::without_version_dir();
    env.declare_project("", PROJECT_A);
    env.write_file("a.py", "x = 1\n", 1000);
    assert_cycle(&env.run_cycle(), 1, 0, 0, 0);

    env.delete_file("a.py");
    let stats = env.run_cycle();
    assert_eq!(stats.deleted_files, 0);
    assert_eq!(stats.errors, 1);

    // The row stays live, so the deletion is re-attempted (and re-fails)
    // next cycle.
    let stats = env.run_cycle();
    assert_eq!(stats.errors, 1);
}

#[test]
fn nested_project_poisons_its_branch() {
    let env = TestEnvironment::new();
    env.declare_project("", PROJECT_A);
    env.declare_project("x", PROJECT_B);
    env.write_file("a.py", "x = 1\n", 1000);
    env.write_file("x/inner.py", "y = 2\n", 1000);

    let stats = env.run_cycle();
    // Every file sits on the double-marker branch, so nothing is queued and
    // the nesting violations are counted.
    assert_eq!(stats.new_files, 0);
    assert!(stats.errors > 0);

    let catalog = env.catalog();
    assert!(catalog.get_project_files(PROJECT_A, true).unwrap().is_empty());
    assert!(catalog.get_project_files(PROJECT_B, true).unwrap().is_empty());
}

#[test]
fn sibling_projects_index_independently() {
    let env = TestEnvironment::new();
    env.declare_project("p1", PROJECT_A);
    env.declare_project("p2", PROJECT_B);
    env.write_file("p1/a.py", "x = 1\n", 1000);
    env.write_file("p2/b.py", "y = 2\n", 1000);
    env.write_file("p2/deep/nested/c.py", "z = 3\n", 1000);

    let stats = env.run_cycle();
    assert_cycle(&stats, 3, 0, 0, 0);

    let catalog = env.catalog();
    assert_eq!(catalog.get_project_files(PROJECT_A, false).unwrap().len(), 1);
    assert_eq!(catalog.get_project_files(PROJECT_B, false).unwrap().len(), 2);

    // Every file carries a dataset resolving to its project under this
    // watched root.
    for id in [PROJECT_A, PROJECT_B] {
        let dataset = catalog.get_dataset_id(id, &env.watch_dir).unwrap().unwrap();
        for file in catalog.get_project_files(id, false).unwrap() {
            assert_eq!(file.dataset_id, dataset);
        }
    }
}

#[test]
fn duplicate_project_ids_abort_the_root() {
    let env = TestEnvironment::new();
    env.declare_project("p1", PROJECT_DUP);
    env.declare_project("p2", PROJECT_DUP);
    env.write_file("p1/a.py", "x = 1\n", 1000);
    env.write_file("p2/b.py", "y = 2\n", 1000);

    let stats = env.run_cycle();
    assert_eq!(stats.scanned_dirs, 0);
    assert_eq!(stats.new_files, 0);
    assert!(stats.errors > 0);

    // No catalog writes were attempted for this root.
    let catalog = env.catalog();
    assert!(catalog.get_project(PROJECT_DUP).unwrap().is_none());
    assert!(catalog.get_project_files(PROJECT_DUP, true).unwrap().is_empty());
}

#[test]
fn stale_lock_is_recovered_and_cycle_completes() {
    let env = TestEnvironment::new();
    env.declare_project("", PROJECT_A);
    env.write_file("a.py", "x = 1\n", 1000);

    // Pre-populate the lock file with a pid known to be dead.
    let owner_key = LockManager::lock_key(&env.watch_dir);
    let manager = LockManager::new(&env.config.watcher.locks_dir, &owner_key).unwrap();
    let lock_path = manager.lock_path(&env.watch_dir);
    let dead = LockPayload {
        pid: i32::MAX - 1,
        timestamp: 0.0,
        watch_dir: env.watch_dir.to_string_lossy().into_owned(),
        worker_name: WORKER_NAME.to_string(),
        hostname: "ghost".to_string(),
        project_id: owner_key,
    };
    std::fs::write(&lock_path, serde_json::to_string(&dead).unwrap()).unwrap();

    let stats = env.run_cycle();
    assert_eq!(stats.scanned_dirs, 1);
    assert_cycle(&stats, 1, 0, 0, 0);
    // The lock is released after the cycle.
    assert!(!lock_path.exists());
}

#[test]
fn live_lock_skips_the_root_for_the_cycle() {
    let env = TestEnvironment::new();
    env.declare_project("", PROJECT_A);
    env.write_file("a.py", "x = 1\n", 1000);

    let owner_key = LockManager::lock_key(&env.watch_dir);
    let manager = LockManager::new(&env.config.watcher.locks_dir, &owner_key).unwrap();
    let own_pid = i32::try_from(std::process::id()).unwrap();
    assert_eq!(
        manager.acquire(&env.watch_dir, own_pid).unwrap(),
        LockState::Acquired
    );

    let stats = env.run_cycle();
    assert_eq!(stats.scanned_dirs, 0);
    assert_eq!(stats.errors, 1);

    // After release the next cycle proceeds.
    manager.release(&env.watch_dir);
    let stats = env.run_cycle();
    assert_eq!(stats.scanned_dirs, 1);
    assert_cycle(&stats, 1, 0, 0, 0);
}

#[test]
fn rename_appears_as_delete_plus_new() {
    let env = TestEnvironment::new();
    env.declare_project("", PROJECT_A);
    env.write_file("old.py", "x = 1\n", 1000);
    assert_cycle(&env.run_cycle(), 1, 0, 0, 0);

    env.delete_file("old.py");
    env.write_file("new.py", "x = 1\n", 1000);
    let stats = env.run_cycle();
    assert_cycle(&stats, 1, 0, 1, 0);
}

#[test]
fn project_description_updates_follow_the_marker() {
    let env = TestEnvironment::new();
    env.declare_project_json("", PROJECT_A, "before");
    env.run_cycle();

    let catalog = env.catalog();
    assert_eq!(
        catalog.get_project(PROJECT_A).unwrap().unwrap().description,
        "before"
    );
    drop(catalog);

    env.declare_project_json("", PROJECT_A, "after");
    env.run_cycle();
    let catalog = env.catalog();
    assert_eq!(
        catalog.get_project(PROJECT_A).unwrap().unwrap().description,
        "after"
    );
}

#[test]
fn nonexistent_watch_dir_is_skipped_quietly() {
    let mut env = TestEnvironment::new();
    env.declare_project("", PROJECT_A);
    env.write_file("a.py", "x = 1\n", 1000);
    env.config
        .watcher
        .watch_dirs
        .push(std::path::PathBuf::from("/nonexistent/siw-extra-root"));

    let stats = env.run_cycle();
    // The real root still indexes; the missing one is logged and skipped
    // without failing the cycle.
    assert_eq!(stats.scanned_dirs, 1);
    assert_cycle(&stats, 1, 0, 0, 0);
}

#[test]
fn unreachable_catalog_keeps_worker_in_connecting() {
    let mut env = TestEnvironment::new();
    env.declare_project("", PROJECT_A);
    // Point the catalog at a path whose parent is a file: the adapter
    // cannot create it.
    let blocker = env.watch_dir.join("not-a-dir");
    std::fs::write(&blocker, "plain file").unwrap();
    env.config.watcher.db_path = blocker.join("catalog.sqlite3");

    let worker = WatcherWorker::init(env.config.clone()).unwrap();
    let signals = worker.signals().clone();
    let join = std::thread::spawn(move || worker.run());

    // Give the worker time to fail at least one connection attempt.
    std::thread::sleep(std::time::Duration::from_millis(1500));
    signals.request_stop();
    let stats = join.join().unwrap();

    assert_eq!(stats.cycles, 0, "no cycle may run without a catalog");
    assert!(stats.errors >= 1);
}

#[test]
fn worker_loop_runs_cycles_until_stopped() {
    let env = TestEnvironment::new();
    env.declare_project("", PROJECT_A);
    env.write_file("a.py", "x = 1\n", 1000);

    let worker = WatcherWorker::init(env.config.clone()).unwrap();
    let signals = worker.signals().clone();
    let join = std::thread::spawn(move || worker.run());

    std::thread::sleep(std::time::Duration::from_millis(500));
    signals.request_stop();
    let stats = join.join().unwrap();

    assert!(stats.cycles >= 1);
    assert_eq!(stats.new_files, 1);
    assert_eq!(stats.watch_dirs, 1);
}
