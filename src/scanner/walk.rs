//! Directory scanner: walks a watched root and attributes files to projects.
//!
//! The walk is sequential and performs no catalog I/O. Ignored paths are
//! pruned before descent, so nothing beneath an ignored directory is ever
//! emitted. Per-file failures (stat errors, unattributable files, nested
//! markers) skip that file only; the traversal always completes.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::paths::resolve_absolute_path;
use crate::project::discovery::{self, ProjectRoot};
use crate::scanner::ignore::IgnorePolicy;

/// A file surviving the walk, with the metadata the delta engine needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
    /// Absolute, symlink-resolved path.
    pub path: PathBuf,
    /// POSIX mtime as a real number of seconds.
    pub mtime: f64,
    /// Size in bytes.
    pub size: u64,
    /// Root of the owning project.
    pub project_root: PathBuf,
    /// Id of the owning project.
    pub project_id: String,
}

/// Outcome of scanning one watched root.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Eligible files keyed by their absolute path string. The walk yields
    /// each entry at most once, so duplicate emissions are impossible.
    pub files: BTreeMap<String, ScannedFile>,
    /// Files skipped because no project claims them.
    pub unattributed: usize,
    /// Per-file failures: stat errors, nested-marker violations.
    pub errors: usize,
}

/// Recursively scan `root` for eligible files and resolve each one's owning
/// project.
pub fn scan_directory(
    root: &Path,
    watch_dirs: &[PathBuf],
    policy: &IgnorePolicy,
) -> ScanReport {
    let mut report = ScanReport::default();

    let root = resolve_absolute_path(root);
    if !root.is_dir() {
        return report;
    }

    // Files in the same directory share their attribution; resolving once
    // per directory keeps the nested-marker check off the per-file hot path.
    let mut attribution: HashMap<PathBuf, Option<ProjectRoot>> = HashMap::new();

    let mut queue: Vec<PathBuf> = vec![root];
    while let Some(dir) = queue.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::PermissionDenied => continue,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(_) => {
                report.errors += 1;
                continue;
            }
        };

        for entry in entries {
            let Ok(entry) = entry else {
                continue;
            };
            let path = entry.path();

            let Ok(meta) = fs::symlink_metadata(&path) else {
                report.errors += 1;
                continue;
            };
            // Symlinks are not followed; a link cycle must not trap the walk.
            if meta.file_type().is_symlink() {
                continue;
            }

            let is_dir = meta.is_dir();
            if policy.is_ignored(&path, is_dir) {
                continue;
            }

            if is_dir {
                queue.push(path);
                continue;
            }
            if !meta.is_file() {
                continue;
            }

            let abs_path = resolve_absolute_path(&path);
            let mtime = system_time_secs(meta.modified().unwrap_or(UNIX_EPOCH));

            let parent = abs_path.parent().map_or_else(PathBuf::new, Path::to_path_buf);
            let owner = match attribution.get(&parent) {
                Some(cached) => cached.clone(),
                None => match discovery::find_project(&abs_path, watch_dirs) {
                    Ok(found) => {
                        attribution.insert(parent, found.clone());
                        found
                    }
                    // Nested-marker violations and IO failures abort only
                    // this file, not the traversal.
                    Err(_) => {
                        report.errors += 1;
                        continue;
                    }
                },
            };

            let Some(project) = owner else {
                report.unattributed += 1;
                continue;
            };

            let key = abs_path.to_string_lossy().into_owned();
            report.files.insert(
                key,
                ScannedFile {
                    path: abs_path,
                    mtime,
                    size: meta.len(),
                    project_root: project.root_path.clone(),
                    project_id: project.project_id.clone(),
                },
            );
        }
    }

    report
}

fn system_time_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}
