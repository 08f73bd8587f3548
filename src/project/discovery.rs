//! Project discovery inside watched directories.
//!
//! A `projectid` marker declares a project root, and markers are only
//! honored at depth 0 or 1 of a watched directory. Two operations live
//! here: enumerating every project in a watched root, and resolving the
//! owning project of a single file by walking up its ancestor chain.
//!
//! Invariant checks are bounded: the nested-marker subtree scan bails on
//! the first marker it finds, keeping worst-case work linear.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::{Result, SiwError};
use crate::core::paths::resolve_absolute_path;
use crate::project::identity::{self, MARKER_FILENAME};

/// A discovered project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    /// Absolute path to the directory containing the `projectid` marker.
    pub root_path: PathBuf,
    /// Project id (UUID-v4 string) loaded from the marker.
    pub project_id: String,
    /// Description text from the marker; empty for bare-UUID markers.
    pub description: String,
    /// The watched directory this project was found under.
    pub watch_dir: PathBuf,
}

/// Result of enumerating one watched directory.
///
/// Per-candidate failures do not abort enumeration; they are collected in
/// `skipped` for the caller to log and count. A duplicate project id fails
/// the enumeration as a whole: `duplicate` is set and `projects` must not
/// be used for catalog writes.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Accepted project roots, shallow-first.
    pub projects: Vec<ProjectRoot>,
    /// Candidates rejected with their reasons (marker or nesting failures).
    pub skipped: Vec<SiwError>,
    /// Set when two accepted roots declared the same project id.
    pub duplicate: Option<SiwError>,
}

impl DiscoveryReport {
    /// Whether the enumeration produced a usable project list.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.duplicate.is_none()
    }
}

/// Enumerate all projects declared within a watched directory.
///
/// Candidates are collected at depth 0 (`<watch_dir>/projectid`) and depth 1
/// (`<watch_dir>/*/projectid`) only; deeper markers are not projects but do
/// trip the nested-marker invariant below an accepted root.
pub fn discover_projects(watch_dir: &Path) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    let watch_dir = resolve_absolute_path(watch_dir);
    if !watch_dir.is_dir() {
        return report;
    }

    // Depth 0 and depth 1 candidates.
    let mut candidates: Vec<PathBuf> = Vec::new();
    if watch_dir.join(MARKER_FILENAME).is_file() {
        candidates.push(watch_dir.clone());
    }
    match fs::read_dir(&watch_dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let child = entry.path();
                if child.is_dir() && child.join(MARKER_FILENAME).is_file() {
                    candidates.push(resolve_absolute_path(&child));
                }
            }
        }
        Err(source) => {
            report.skipped.push(SiwError::Io {
                path: watch_dir,
                source,
            });
            return report;
        }
    }

    // Shallow-first so parent projects are processed before children.
    candidates.sort_by_key(|p| p.components().count());

    let all_candidate_roots = candidates.clone();
    for candidate in candidates {
        // A candidate nested under an already-accepted root violates the
        // one-marker-per-branch rule.
        if let Some(parent) = report
            .projects
            .iter()
            .find(|p| candidate.starts_with(&p.root_path) && candidate != p.root_path)
        {
            report.skipped.push(SiwError::NestedProject {
                child: candidate.clone(),
                parent: parent.root_path.clone(),
            });
            continue;
        }

        let loaded = match identity::load_identity(&candidate) {
            Ok(identity) => identity,
            Err(err) => {
                report.skipped.push(err);
                continue;
            }
        };

        // Markers deeper in the subtree that were not candidates themselves
        // (depth >= 2) invalidate this root. Sibling/descendant candidates
        // already produced their own nested rejection above.
        if let Err(err) = ensure_no_nested_marker(&candidate, &watch_dir, &all_candidate_roots) {
            report.skipped.push(err);
            continue;
        }

        report.projects.push(ProjectRoot {
            root_path: candidate,
            project_id: loaded.id,
            description: loaded.description,
            watch_dir: watch_dir.clone(),
        });
    }

    // Duplicate project ids are a hard, process-wide invariant.
    for (i, project) in report.projects.iter().enumerate() {
        if let Some(first) = report.projects[..i]
            .iter()
            .find(|p| p.project_id == project.project_id)
        {
            report.duplicate = Some(SiwError::DuplicateProjectId {
                id: project.project_id.clone(),
                first_root: first.root_path.clone(),
                second_root: project.root_path.clone(),
            });
            break;
        }
    }

    report
}

/// Resolve the owning project of a file.
///
/// Walks parent directories of the file up to the containing watched root,
/// testing for a marker only at depth 0 or 1. Returns `Ok(None)` when the
/// file lies outside every watched root or no marker claims it. Candidates
/// with unreadable or invalid markers are passed over; a nested marker
/// below the matched root fails with `NestedProject` and the caller skips
/// only that file.
pub fn find_project(file_path: &Path, watch_dirs: &[PathBuf]) -> Result<Option<ProjectRoot>> {
    let resolved = resolve_absolute_path(file_path);
    if !resolved.exists() {
        return Ok(None);
    }

    let Some(start) = resolved.parent().map(Path::to_path_buf) else {
        return Ok(None);
    };

    let Some(watch_dir) = watch_dirs
        .iter()
        .map(|wd| resolve_absolute_path(wd))
        .find(|wd| start.starts_with(wd))
    else {
        return Ok(None);
    };

    let mut current = start;
    loop {
        let Ok(rel) = current.strip_prefix(&watch_dir) else {
            break;
        };
        let depth = rel.components().count();

        if depth <= 1 && current.join(MARKER_FILENAME).is_file() {
            // Unusable markers are passed over; a shallower root may still
            // claim the file. Nested-marker violations propagate.
            if let Ok(loaded) = identity::load_identity(&current) {
                ensure_no_nested_marker(&current, &watch_dir, &[])?;
                return Ok(Some(ProjectRoot {
                    root_path: current,
                    project_id: loaded.id,
                    description: loaded.description,
                    watch_dir,
                }));
            }
        }

        if current == watch_dir {
            break;
        }
        let Some(parent) = current.parent() else {
            break;
        };
        current = parent.to_path_buf();
    }

    Ok(None)
}

/// Verify the one-marker-per-branch invariant around `project_root`.
///
/// Checks parent directories up to the watched root, then scans the subtree
/// below `project_root` for foreign markers, bailing on the first hit.
/// Roots listed in `known_roots` are exempt from the subtree check; they
/// were candidates in their own right and already judged separately.
fn ensure_no_nested_marker(
    project_root: &Path,
    watch_dir: &Path,
    known_roots: &[PathBuf],
) -> Result<()> {
    // Upward: any marker between project_root and the watched root means
    // this root is itself nested.
    let mut current = project_root.parent();
    while let Some(dir) = current {
        if !dir.starts_with(watch_dir) {
            break;
        }
        if dir.join(MARKER_FILENAME).is_file() {
            return Err(SiwError::NestedProject {
                child: project_root.to_path_buf(),
                parent: dir.to_path_buf(),
            });
        }
        if dir == watch_dir {
            break;
        }
        current = dir.parent();
    }

    // Downward: depth-first queue walk, first foreign marker wins.
    let mut queue: Vec<PathBuf> = vec![project_root.to_path_buf()];
    while let Some(dir) = queue.pop() {
        if dir != *project_root && dir.join(MARKER_FILENAME).is_file() {
            if known_roots.contains(&dir) {
                // Candidate root handled by enumeration; do not descend.
                continue;
            }
            return Err(SiwError::NestedProject {
                child: dir,
                parent: project_root.to_path_buf(),
            });
        }

        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                queue.push(entry.path());
            }
        }
    }

    Ok(())
}
