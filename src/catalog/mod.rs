//! Catalog contract: the narrow interface the watcher core consumes.
//!
//! The catalog is an external collaborator — persistent, transactional at
//! single-statement granularity, possibly remote over local IPC. The core
//! talks to it exclusively through the [`Catalog`] trait; concrete adapters
//! live in submodules. Records crossing the boundary are tagged structs,
//! never loosely-typed maps.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::project::discovery::ProjectRoot;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCatalog;

/// Environment flag the runner sets before constructing an adapter: the
/// worker process must never spawn a catalog helper process of its own, it
/// only opens a client handle.
pub const NO_SPAWN_ENV: &str = "SIW_CATALOG_WORKER_NO_SPAWN";

/// Whether catalog-worker spawning is disabled for this process.
pub fn worker_spawning_disabled() -> bool {
    flag_enabled(std::env::var_os(NO_SPAWN_ENV).as_deref())
}

fn flag_enabled(value: Option<&std::ffi::OsStr>) -> bool {
    value.is_some_and(|v| v == "1")
}

/// Insert-time metadata probe: line count and whether the file opens with a
/// module docstring (`"""` or `'''` after leading whitespace).
///
/// This is the only content read the core performs. Unreadable files fall
/// back to zero lines and no docstring.
pub fn probe_file_metadata(path: &Path) -> (i64, bool) {
    let Ok(bytes) = std::fs::read(path) else {
        return (0, false);
    };
    if bytes.is_empty() {
        return (0, false);
    }

    let newlines = memchr::memchr_iter(b'\n', &bytes).count();
    let lines = i64::try_from(newlines).unwrap_or(i64::MAX).saturating_add(1);

    let stripped = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |start| &bytes[start..]);
    let has_docstring = stripped.starts_with(b"\"\"\"") || stripped.starts_with(b"'''");

    (lines, has_docstring)
}

/// A project row as the catalog stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Project id (UUID-v4 string).
    pub id: String,
    /// Absolute, symlink-resolved project root.
    pub root_path: String,
    /// Short name (defaults to the root directory's basename).
    pub name: String,
    /// Opaque description text from the identity marker.
    pub description: String,
}

/// A file row, restricted to the attributes the core reads and writes.
/// Downstream analyzers own everything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Row id.
    pub id: i64,
    /// Owning project.
    pub project_id: String,
    /// Dataset scoping this file to one watched root.
    pub dataset_id: String,
    /// Absolute path string.
    pub path: String,
    /// Line count captured at insert time.
    pub lines: i64,
    /// POSIX mtime as a real number.
    pub last_modified: f64,
    /// Leading-docstring probe result captured at insert time.
    pub has_docstring: bool,
    /// Whether the file awaits (re-)chunking by downstream analyzers.
    pub needs_chunking: bool,
    /// Logical deletion flag.
    pub deleted: bool,
}

/// Fields for inserting a minimal file record.
#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    /// Absolute path string.
    pub path: &'a str,
    /// Line count from the insert-time probe.
    pub lines: i64,
    /// POSIX mtime.
    pub last_modified: f64,
    /// Leading-docstring probe result.
    pub has_docstring: bool,
    /// Owning project id.
    pub project_id: &'a str,
    /// Dataset id.
    pub dataset_id: &'a str,
}

/// Result of the synchronous refresh hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    /// Whether the file's catalog state reflects the filesystem afterwards.
    pub success: bool,
    /// Whether an existing row's derived state was refreshed (as opposed to
    /// a fresh insert or a no-op).
    pub ast_updated: bool,
}

/// What `register_project` did with a discovered project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The project did not exist and was created.
    Created,
    /// The project exists and matches the marker.
    Unchanged,
    /// The project exists; its description was refreshed from the marker.
    DescriptionUpdated,
    /// The id already belongs to a different root. Conservative policy:
    /// refuse, never rewrite (the stored row is left untouched).
    RootConflict {
        /// Root path the catalog already associates with this id.
        existing_root: String,
    },
    /// The root is already registered under a different id. Conservative
    /// policy: refuse, never rewrite a primary key.
    IdConflict {
        /// Id the catalog already associates with this root.
        existing_id: String,
    },
}

/// Operations the watcher core requires from the catalog. Nothing else in
/// the catalog is a contract surface.
pub trait Catalog {
    /// Cheap availability probe; used by the runner's CONNECTING state.
    fn ping(&self) -> Result<()>;

    /// Idempotently resolve the dataset for `(project_id, root_path)`,
    /// creating it when absent. Returns the dataset id.
    fn get_or_create_dataset(
        &self,
        project_id: &str,
        root_path: &Path,
        name: Option<&str>,
    ) -> Result<String>;

    /// Read-only dataset lookup.
    fn get_dataset_id(&self, project_id: &str, root_path: &Path) -> Result<Option<String>>;

    /// Read-only project lookup by id.
    fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>>;

    /// Read-only reverse lookup by root path.
    fn get_project_id(&self, root_path: &Path) -> Result<Option<String>>;

    /// All file rows of a project. Deleted rows are excluded unless
    /// `include_deleted` is set.
    fn get_project_files(&self, project_id: &str, include_deleted: bool)
    -> Result<Vec<FileRecord>>;

    /// Reconcile a discovered project with the stored row (create, refresh
    /// description, or refuse on conflicts). Never rewrites a stored id.
    fn register_project(&self, project: &ProjectRoot) -> Result<RegisterOutcome>;

    /// Insert (or upsert by `(project_id, path)`) a minimal file record.
    ///
    /// Before committing, the adapter MUST validate that a `projectid`
    /// marker discovered from the file's filesystem position matches
    /// `project_id`, failing `ProjectIdMismatch` otherwise.
    fn add_file(&self, file: &NewFile<'_>) -> Result<i64>;

    /// Flag a file for (re-)chunking: clears derived chunk state and bumps
    /// `updated_at`. Returns `false` iff no live row exists.
    fn mark_file_needs_chunking(&self, path: &str, project_id: &str) -> Result<bool>;

    /// Logically delete a file, recording the archival directory. Returns
    /// `false` iff no live row exists.
    fn mark_file_deleted(&self, path: &str, project_id: &str, version_dir: &Path) -> Result<bool>;

    /// Synchronous refresh hook invoked after external writers mutate a
    /// file. Performs the same marker check as [`Catalog::add_file`].
    fn update_file_data(
        &self,
        path: &str,
        project_id: &str,
        root_dir: &Path,
    ) -> Result<UpdateOutcome>;

    /// Bulk mtime refresh for a queued file (the only raw-write path the
    /// core uses).
    fn touch_last_modified(&self, path: &str, project_id: &str, mtime: f64) -> Result<()>;
}
