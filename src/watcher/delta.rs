//! Delta engine: classify a scan against catalog state, per project.
//!
//! Read-only with respect to the catalog (dataset resolution may create the
//! dataset row, which is the one permitted write). Catalog failures never
//! fail the cycle: the affected project gets an empty delta and an error
//! count.

use std::collections::BTreeMap;
use std::path::Path;

use crate::catalog::Catalog;
use crate::scanner::walk::ScannedFile;

/// Filesystem mtimes drift across stat calls and filesystems; differences
/// within this tolerance are not changes. The exact threshold matters for
/// cross-implementation reproducibility.
pub const MTIME_TOLERANCE_SECS: f64 = 0.1;

/// Per-project classification of one scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileDelta {
    /// Files on disk with no live catalog row: `(path, mtime, size)`.
    pub new_files: Vec<(String, f64, u64)>,
    /// Files whose disk mtime disagrees with the catalog beyond tolerance.
    pub changed_files: Vec<(String, f64, u64)>,
    /// Paths with a live catalog row but absent from the scan.
    pub deleted_files: Vec<String>,
}

impl FileDelta {
    /// Whether the delta carries no work.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.changed_files.is_empty() && self.deleted_files.is_empty()
    }

    /// Total number of items across all three buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.new_files.len() + self.changed_files.len() + self.deleted_files.len()
    }
}

/// Deltas for every project seen in a scan, plus error accounting.
#[derive(Debug, Default)]
pub struct DeltaOutcome {
    /// Delta per project id.
    pub per_project: BTreeMap<String, FileDelta>,
    /// Projects whose catalog reads failed (they got empty deltas).
    pub errors: usize,
    /// How many of those failures were catalog-loss class errors; the
    /// runner reconnects when nonzero.
    pub catalog_errors: usize,
}

/// Compare scan output with catalog state and produce a per-project delta.
///
/// For each project referenced by the scan, the project's dataset under
/// `watch_root` is resolved (created when absent) and its live file rows are
/// read, filtered to that dataset. The comparison itself is pure.
pub fn compute_delta(
    catalog: &dyn Catalog,
    watch_root: &Path,
    scanned: &BTreeMap<String, ScannedFile>,
) -> DeltaOutcome {
    let mut outcome = DeltaOutcome::default();

    // Group scanned paths by owning project.
    let mut by_project: BTreeMap<&str, Vec<&ScannedFile>> = BTreeMap::new();
    for file in scanned.values() {
        by_project.entry(&file.project_id).or_default().push(file);
    }

    for (project_id, files) in by_project {
        match project_delta(catalog, watch_root, project_id, &files) {
            Ok(delta) => {
                outcome.per_project.insert(project_id.to_string(), delta);
            }
            Err(err) => {
                outcome.errors += 1;
                if err.is_catalog_error() {
                    outcome.catalog_errors += 1;
                }
                outcome
                    .per_project
                    .insert(project_id.to_string(), FileDelta::default());
            }
        }
    }

    outcome
}

fn project_delta(
    catalog: &dyn Catalog,
    watch_root: &Path,
    project_id: &str,
    files: &[&ScannedFile],
) -> crate::core::errors::Result<FileDelta> {
    let dataset_id = match catalog.get_dataset_id(project_id, watch_root)? {
        Some(id) => id,
        None => catalog.get_or_create_dataset(project_id, watch_root, None)?,
    };

    let db_files = catalog.get_project_files(project_id, false)?;
    let db_by_path: BTreeMap<&str, f64> = db_files
        .iter()
        .filter(|f| f.dataset_id == dataset_id)
        .map(|f| (f.path.as_str(), f.last_modified))
        .collect();

    let mut delta = FileDelta::default();

    for file in files {
        let key = file.path.to_string_lossy();
        match db_by_path.get(key.as_ref()) {
            None => delta
                .new_files
                .push((key.into_owned(), file.mtime, file.size)),
            Some(&db_mtime) => {
                if (file.mtime - db_mtime).abs() > MTIME_TOLERANCE_SECS {
                    delta
                        .changed_files
                        .push((key.into_owned(), file.mtime, file.size));
                }
            }
        }
    }

    // Live rows missing on disk are deletions.
    let scanned_paths: std::collections::BTreeSet<String> = files
        .iter()
        .map(|f| f.path.to_string_lossy().into_owned())
        .collect();
    for path in db_by_path.keys() {
        if !scanned_paths.contains(*path) {
            delta.deleted_files.push((*path).to_string());
        }
    }

    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::sqlite::SqliteCatalog;
    use crate::catalog::{Catalog, NewFile};
    use crate::project::discovery::ProjectRoot;
    use crate::project::identity::MARKER_FILENAME;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const ID: &str = "00000000-0000-4000-8000-000000000001";

    fn scanned(path: &Path, mtime: f64, size: u64, root: &Path) -> (String, ScannedFile) {
        (
            path.to_string_lossy().into_owned(),
            ScannedFile {
                path: path.to_path_buf(),
                mtime,
                size,
                project_root: root.to_path_buf(),
                project_id: ID.to_string(),
            },
        )
    }

    fn fixture() -> (TempDir, SqliteCatalog, PathBuf) {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(MARKER_FILENAME), ID).unwrap();
        let root = tmp.path().canonicalize().unwrap();

        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog
            .register_project(&ProjectRoot {
                root_path: root.clone(),
                project_id: ID.to_string(),
                description: String::new(),
                watch_dir: root.clone(),
            })
            .unwrap();
        (tmp, catalog, root)
    }

    fn insert_file(catalog: &SqliteCatalog, root: &Path, path: &Path, mtime: f64) {
        let dataset = catalog.get_or_create_dataset(ID, root, None).unwrap();
        fs::write(path, "pass\n").unwrap();
        catalog
            .add_file(&NewFile {
                path: &path.to_string_lossy(),
                lines: 1,
                last_modified: mtime,
                has_docstring: false,
                project_id: ID,
                dataset_id: &dataset,
            })
            .unwrap();
    }

    #[test]
    fn unknown_files_are_new() {
        let (_tmp, catalog, root) = fixture();
        let mut scan = BTreeMap::new();
        let (k, v) = scanned(&root.join("a.py"), 1000.0, 3, &root);
        scan.insert(k, v);

        let outcome = compute_delta(&catalog, &root, &scan);
        assert_eq!(outcome.errors, 0);
        let delta = &outcome.per_project[ID];
        assert_eq!(delta.new_files.len(), 1);
        assert!(delta.changed_files.is_empty());
        assert!(delta.deleted_files.is_empty());
    }

    #[test]
    fn mtime_within_tolerance_is_unchanged() {
        let (_tmp, catalog, root) = fixture();
        let file = root.join("a.py");
        insert_file(&catalog, &root, &file, 1000.0);

        let mut scan = BTreeMap::new();
        let (k, v) = scanned(&file, 1000.05, 5, &root);
        scan.insert(k, v);

        let outcome = compute_delta(&catalog, &root, &scan);
        let delta = &outcome.per_project[ID];
        assert!(delta.is_empty(), "0.05s drift must not flag a change");
    }

    #[test]
    fn mtime_beyond_tolerance_is_changed() {
        let (_tmp, catalog, root) = fixture();
        let file = root.join("a.py");
        insert_file(&catalog, &root, &file, 1000.0);

        let mut scan = BTreeMap::new();
        let (k, v) = scanned(&file, 1100.0, 5, &root);
        scan.insert(k, v);

        let outcome = compute_delta(&catalog, &root, &scan);
        let delta = &outcome.per_project[ID];
        assert_eq!(delta.changed_files.len(), 1);
        assert!(delta.new_files.is_empty());
    }

    #[test]
    fn catalog_rows_missing_on_disk_are_deleted() {
        let (_tmp, catalog, root) = fixture();
        let present = root.join("kept.py");
        let missing = root.join("gone.py");
        insert_file(&catalog, &root, &present, 1000.0);
        insert_file(&catalog, &root, &missing, 1000.0);
        fs::remove_file(&missing).unwrap();

        let mut scan = BTreeMap::new();
        let (k, v) = scanned(&present, 1000.0, 5, &root);
        scan.insert(k, v);

        let outcome = compute_delta(&catalog, &root, &scan);
        let delta = &outcome.per_project[ID];
        assert_eq!(delta.deleted_files, vec![missing.to_string_lossy().into_owned()]);
        assert!(delta.new_files.is_empty());
        assert!(delta.changed_files.is_empty());
    }

    #[test]
    fn empty_scan_of_empty_catalog_is_empty_delta() {
        let (_tmp, catalog, root) = fixture();
        let scan = BTreeMap::new();
        let outcome = compute_delta(&catalog, &root, &scan);
        assert!(outcome.per_project.is_empty());
        assert_eq!(outcome.errors, 0);
    }

    #[test]
    fn foreign_dataset_rows_are_invisible() {
        // The same project indexed under a second root must not conflate
        // file attribution across datasets.
        let (_tmp, catalog, root) = fixture();
        let other_root = TempDir::new().unwrap();
        let other = other_root.path().canonicalize().unwrap();

        let file = root.join("a.py");
        insert_file(&catalog, &root, &file, 1000.0);

        // Scanning the other root sees none of the first dataset's rows.
        let scan = BTreeMap::new();
        let outcome = compute_delta(&catalog, &other, &scan);
        assert!(outcome.per_project.is_empty());

        let mut scan = BTreeMap::new();
        let other_file = other.join("b.py");
        let (k, mut v) = scanned(&other_file, 1.0, 1, &other);
        v.project_id = ID.to_string();
        scan.insert(k, v);
        let outcome = compute_delta(&catalog, &other, &scan);
        let delta = &outcome.per_project[ID];
        // b.py is new in the second dataset; a.py is NOT reported deleted
        // because it belongs to the first dataset.
        assert_eq!(delta.new_files.len(), 1);
        assert!(delta.deleted_files.is_empty());
    }
}
