//! Change queue: apply a delta to the catalog as a batched, best-effort
//! transaction.
//!
//! Buckets are processed in order — new, changed, deleted — so a rename
//! seen as delete+new cannot leave the catalog in a missing state
//! mid-cycle. Operations are issued sequentially per bucket; the catalog
//! commits per statement. Per-item failures count an error and move on.

use std::path::Path;

use crate::catalog::{Catalog, NewFile, probe_file_metadata};
use crate::core::errors::Result;
use crate::watcher::delta::FileDelta;

/// Per-category counters for one queued delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    /// New files queued for chunking.
    pub new_files: u64,
    /// Changed files queued for re-chunking.
    pub changed_files: u64,
    /// Files marked logically deleted.
    pub deleted_files: u64,
    /// Items that failed.
    pub errors: u64,
    /// Of the failures, how many were catalog-loss class errors.
    #[serde(skip)]
    pub catalog_errors: u64,
}

impl QueueStats {
    /// Fold another stats block into this one.
    pub fn absorb(&mut self, other: Self) {
        self.new_files += other.new_files;
        self.changed_files += other.changed_files;
        self.deleted_files += other.deleted_files;
        self.errors += other.errors;
        self.catalog_errors += other.catalog_errors;
    }
}

/// Queue one project's delta into the catalog.
///
/// The dataset for `(project_id, watch_root)` is resolved first; when that
/// fails every delta item is counted as an error and nothing is written.
/// Deletions require a configured `version_dir` (archival storage); without
/// one each deletion counts as an error.
pub fn queue_changes(
    catalog: &dyn Catalog,
    watch_root: &Path,
    project_id: &str,
    delta: &FileDelta,
    version_dir: Option<&Path>,
) -> QueueStats {
    let mut stats = QueueStats::default();

    let dataset_id = match resolve_dataset(catalog, watch_root, project_id) {
        Ok(id) => id,
        Err(err) => {
            stats.errors = delta.len() as u64;
            if err.is_catalog_error() {
                stats.catalog_errors = stats.errors;
            }
            return stats;
        }
    };

    for (path, mtime, _size) in &delta.new_files {
        match queue_file(catalog, path, *mtime, project_id, &dataset_id) {
            Ok(true) => stats.new_files += 1,
            Ok(false) => stats.errors += 1,
            Err(err) => {
                stats.errors += 1;
                if err.is_catalog_error() {
                    stats.catalog_errors += 1;
                }
            }
        }
    }

    for (path, mtime, _size) in &delta.changed_files {
        match queue_file(catalog, path, *mtime, project_id, &dataset_id) {
            Ok(true) => stats.changed_files += 1,
            Ok(false) => stats.errors += 1,
            Err(err) => {
                stats.errors += 1;
                if err.is_catalog_error() {
                    stats.catalog_errors += 1;
                }
            }
        }
    }

    for path in &delta.deleted_files {
        let Some(version_dir) = version_dir else {
            stats.errors += 1;
            continue;
        };
        match catalog.mark_file_deleted(path, project_id, version_dir) {
            Ok(true) => stats.deleted_files += 1,
            Ok(false) => stats.errors += 1,
            Err(err) => {
                stats.errors += 1;
                if err.is_catalog_error() {
                    stats.catalog_errors += 1;
                }
            }
        }
    }

    stats
}

fn resolve_dataset(catalog: &dyn Catalog, watch_root: &Path, project_id: &str) -> Result<String> {
    if let Some(id) = catalog.get_dataset_id(project_id, watch_root)? {
        return Ok(id);
    }
    catalog.get_or_create_dataset(project_id, watch_root, None)
}

/// Flag one file for chunking, inserting a minimal record first when the
/// catalog has never seen it. Finishes by refreshing `last_modified` so the
/// next cycle's delta sees the file as settled.
fn queue_file(
    catalog: &dyn Catalog,
    path: &str,
    mtime: f64,
    project_id: &str,
    dataset_id: &str,
) -> Result<bool> {
    let mut marked = catalog.mark_file_needs_chunking(path, project_id)?;
    if !marked {
        let (lines, has_docstring) = probe_file_metadata(Path::new(path));
        catalog.add_file(&NewFile {
            path,
            lines,
            last_modified: mtime,
            has_docstring,
            project_id,
            dataset_id,
        })?;
        marked = catalog.mark_file_needs_chunking(path, project_id)?;
    }
    if marked {
        catalog.touch_last_modified(path, project_id, mtime)?;
    }
    Ok(marked)
}
