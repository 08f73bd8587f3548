//! Path normalization utilities.
//!
//! Every path that crosses a component boundary (discovery, catalog, locks)
//! must be absolute, user-expanded, and symlink-resolved. Mixing normalized
//! and non-normalized paths is a correctness bug, so normalization happens
//! once at the edges and the rest of the crate trusts it.

use std::env;
use std::path::{Component, Path, PathBuf};

use crate::core::errors::{Result, SiwError};

/// Resolve a path to an absolute, normalized path.
///
/// Expands a leading `~` against `HOME` first. If `fs::canonicalize`
/// succeeds (path exists), it is used to resolve symlinks and normalize
/// components. If it fails (e.g. path does not exist), the path is made
/// absolute relative to CWD and `..`/`.` components are resolved
/// syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        env::current_dir().map_or_else(|_| expanded.clone(), |cwd| cwd.join(&expanded))
    };

    // Try filesystem resolution first (handles symlinks).
    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    // Fallback: syntactic normalization.
    normalize_syntactic(&absolute)
}

/// Normalize a watched root or project root directory.
///
/// Same resolution as [`resolve_absolute_path`], plus existence and
/// directory checks: fails `PathNotFound` when the target does not exist and
/// `NotADirectory` when it exists but is not a directory.
pub fn normalize_dir(path: &Path) -> Result<PathBuf> {
    let resolved = resolve_absolute_path(path);
    if !resolved.exists() {
        return Err(SiwError::PathNotFound { path: resolved });
    }
    if !resolved.is_dir() {
        return Err(SiwError::NotADirectory { path: resolved });
    }
    Ok(resolved)
}

/// Normalized path as the string form used for catalog keys and lock hashes.
pub fn path_key(path: &Path) -> String {
    resolve_absolute_path(path).to_string_lossy().into_owned()
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(stripped) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    env::var_os("HOME").map_or_else(|| path.to_path_buf(), |home| PathBuf::from(home).join(stripped))
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
