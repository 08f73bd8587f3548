//! Shared test infrastructure for source_index_watcher.
//!
//! `TestEnvironment` builds a realistic watch-dir tree plus the service
//! state directories (catalog, locks, versions) the worker needs, and runs
//! single cycles against them.

// Not every test binary uses every item; suppress dead-code warnings for
// the shared module.
#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use filetime::FileTime;
use tempfile::TempDir;

use source_index_watcher::catalog::sqlite::SqliteCatalog;
use source_index_watcher::core::config::Config;
use source_index_watcher::daemon::runner::{CycleStats, WatcherWorker};
use source_index_watcher::project::identity::MARKER_FILENAME;

pub const PROJECT_A: &str = "00000000-0000-4000-8000-000000000001";
pub const PROJECT_B: &str = "00000000-0000-4000-8000-000000000002";
pub const PROJECT_DUP: &str = "00000000-0000-4000-8000-00000000000a";

/// A watch directory plus service state, wired into a `Config`.
pub struct TestEnvironment {
    _watch: TempDir,
    _state: TempDir,
    pub watch_dir: PathBuf,
    pub config: Config,
}

impl TestEnvironment {
    /// Build an environment with a version directory configured (deletions
    /// archive instead of erroring).
    pub fn new() -> Self {
        let watch = TempDir::new().expect("create watch dir");
        let state = TempDir::new().expect("create state dir");
        let watch_dir = watch.path().canonicalize().expect("canonicalize watch dir");

        let mut config = Config::default();
        config.watcher.db_path = state.path().join("catalog.sqlite3");
        config.watcher.locks_dir = state.path().join("locks");
        config.watcher.watch_dirs = vec![watch_dir.clone()];
        config.watcher.version_dir = Some(state.path().join("versions"));
        config.watcher.scan_interval_secs = 1;

        Self {
            _watch: watch,
            _state: state,
            watch_dir,
            config,
        }
    }

    /// Same, but with no deletion archive configured.
    pub fn without_version_dir() -> Self {
        let mut env = Self::new();
        env.config.watcher.version_dir = None;
        env
    }

    /// Declare a project by writing a bare-UUID marker. `rel = ""` puts the
    /// marker at the watch root.
    pub fn declare_project(&self, rel: &str, id: &str) -> PathBuf {
        let root = self.resolve(rel);
        fs::create_dir_all(&root).expect("create project root");
        fs::write(root.join(MARKER_FILENAME), id).expect("write marker");
        root
    }

    /// Declare a project with the JSON marker form.
    pub fn declare_project_json(&self, rel: &str, id: &str, description: &str) -> PathBuf {
        let root = self.resolve(rel);
        fs::create_dir_all(&root).expect("create project root");
        fs::write(
            root.join(MARKER_FILENAME),
            format!(r#"{{"id": "{id}", "description": "{description}"}}"#),
        )
        .expect("write marker");
        root
    }

    /// Create a file with a pinned mtime.
    pub fn write_file(&self, rel: &str, content: &str, mtime_secs: i64) -> PathBuf {
        let path = self.resolve(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, content).expect("write file");
        filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime_secs, 0))
            .expect("set mtime");
        path
    }

    /// Touch an existing file to a new mtime.
    pub fn set_mtime(&self, rel: &str, mtime_secs: i64) {
        let path = self.resolve(rel);
        filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime_secs, 0))
            .expect("set mtime");
    }

    /// Delete a file.
    pub fn delete_file(&self, rel: &str) {
        fs::remove_file(self.resolve(rel)).expect("remove file");
    }

    /// Run exactly one scan cycle and return its counters.
    pub fn run_cycle(&self) -> CycleStats {
        let mut worker = WatcherWorker::init(self.config.clone()).expect("init worker");
        let result = worker.run_once();
        worker.finish();
        result.expect("cycle should reach the catalog")
    }

    /// Open the catalog this environment's worker writes to.
    pub fn catalog(&self) -> SqliteCatalog {
        SqliteCatalog::open(&self.config.watcher.db_path).expect("open catalog")
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.watch_dir.clone()
        } else {
            self.watch_dir.join(rel)
        }
    }
}

/// Assert a cycle's per-category counters in one line.
pub fn assert_cycle(stats: &CycleStats, new: u64, changed: u64, deleted: u64, errors: u64) {
    assert_eq!(stats.new_files, new, "new_files mismatch: {stats:?}");
    assert_eq!(stats.changed_files, changed, "changed_files mismatch: {stats:?}");
    assert_eq!(stats.deleted_files, deleted, "deleted_files mismatch: {stats:?}");
    assert_eq!(stats.errors, errors, "errors mismatch: {stats:?}");
}

/// Path string of a file under the watch dir, as the catalog keys it.
pub fn catalog_key(env: &TestEnvironment, rel: &str) -> String {
    env.watch_dir.join(rel).to_string_lossy().into_owned()
}
