//! Ignore policy: which paths the scanner never looks at.
//!
//! Exclusion layers, applied in order and all treated as final (a user glob
//! cannot re-include a built-in exclusion):
//! - a fixed set of directory names (`__pycache__`, `.git`, ...)
//! - the `data/versions` subtree (deleted-file archive lives there)
//! - the `.pyc` suffix
//! - config-supplied glob patterns, matched against the full path and every
//!   trailing subpath
//! - hidden directories
//! - files whose extension is not in the allowed set
//!
//! Patterns use shell-style globs: `*` matches within a path component,
//! `**` matches across components, `?` matches a single character.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;

use crate::core::errors::{Result, SiwError};

/// Directory names that are never scanned.
const IGNORED_DIR_NAMES: &[&str] = &[
    "__pycache__",
    ".git",
    ".pytest_cache",
    ".mypy_cache",
    "node_modules",
    ".venv",
    "venv",
];

/// Compiled glob pattern for path matching.
#[derive(Debug, Clone)]
struct GlobPattern {
    original: String,
    compiled: Regex,
}

/// Exclusion decisions for the scanner.
#[derive(Debug)]
pub struct IgnorePolicy {
    patterns: Vec<GlobPattern>,
    allowed_extensions: HashSet<String>,
}

impl IgnorePolicy {
    /// Compile a policy from config-supplied glob patterns and the allowed
    /// extension set (extensions given without the leading dot).
    pub fn new(user_patterns: &[String], allowed_extensions: &[String]) -> Result<Self> {
        let patterns = user_patterns
            .iter()
            .map(|pat| {
                let re = glob_to_regex(pat)?;
                Ok(GlobPattern {
                    original: pat.clone(),
                    compiled: re,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            allowed_extensions: allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        })
    }

    /// Decide whether `path` is excluded from scanning.
    ///
    /// `is_dir` reflects the target's type; the caller already has it from
    /// the walk metadata, so the policy never stats.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let components: Vec<String> = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        // Fixed directory-name set, anywhere on the path.
        if components
            .iter()
            .any(|part| IGNORED_DIR_NAMES.contains(&part.as_str()))
        {
            return true;
        }

        // The data/versions subtree and everything beneath it.
        if components
            .windows(2)
            .any(|pair| pair[0] == "data" && pair[1] == "versions")
        {
            return true;
        }

        // Compiled artifacts.
        if components
            .last()
            .is_some_and(|name| name.ends_with(".pyc"))
        {
            return true;
        }

        // User globs against the full path and every trailing subpath.
        if !self.patterns.is_empty() && self.matches_user_pattern(path, &components) {
            return true;
        }

        // Hidden directories.
        if is_dir
            && components
                .last()
                .is_some_and(|name| name.starts_with('.') && name != "." && name != "..")
        {
            return true;
        }

        // Files must carry an allowed extension.
        if !is_dir {
            let allowed = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                .is_some_and(|ext| self.allowed_extensions.contains(&ext));
            if !allowed {
                return true;
            }
        }

        false
    }

    /// Pattern text of every user glob, for logging.
    pub fn user_patterns(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.original.as_str()).collect()
    }

    fn matches_user_pattern(&self, path: &Path, components: &[String]) -> bool {
        let full = path.to_string_lossy().replace('\\', "/");
        for pattern in &self.patterns {
            if pattern.compiled.is_match(&full) {
                return true;
            }
            // Trailing subpaths let "sub/dir" style patterns match anywhere
            // in the tree, and single-component patterns match any part.
            for i in 0..components.len() {
                let subpath = components[i..].join("/");
                if pattern.compiled.is_match(&subpath) {
                    return true;
                }
            }
        }
        false
    }
}

/// Validate that a glob pattern can be compiled.
pub fn validate_glob_pattern(pattern: &str) -> Result<()> {
    glob_to_regex(pattern).map(|_| ())
}

/// Convert a shell-style glob pattern to a regex.
///
/// Supports:
/// - `**` → matches any path (including separators)
/// - `*`  → matches anything except `/`
/// - `?`  → matches a single character except `/`
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let normalized_pattern = pattern.replace('\\', "/");
    let mut regex_str = String::with_capacity(pattern.len() * 2);
    regex_str.push('^');

    let chars: Vec<char> = normalized_pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                if i + 2 < chars.len() && chars[i + 2] == '/' {
                    regex_str.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex_str.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                regex_str.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex_str.push_str("[^/]");
                i += 1;
            }
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
                i += 1;
            }
            c => {
                regex_str.push(c);
                i += 1;
            }
        }
    }

    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| SiwError::InvalidConfig {
        details: format!("invalid glob pattern {pattern:?}: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn policy(patterns: &[&str]) -> IgnorePolicy {
        let patterns: Vec<String> = patterns.iter().map(|s| (*s).to_string()).collect();
        let extensions: Vec<String> = crate::core::config::DEFAULT_ALLOWED_EXTENSIONS
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        IgnorePolicy::new(&patterns, &extensions).unwrap()
    }

    #[test]
    fn builtin_directory_names_are_ignored() {
        let p = policy(&[]);
        assert!(p.is_ignored(Path::new("/w/__pycache__"), true));
        assert!(p.is_ignored(Path::new("/w/.git"), true));
        assert!(p.is_ignored(Path::new("/w/node_modules"), true));
        assert!(p.is_ignored(Path::new("/w/sub/.venv"), true));
        // A file inside an ignored directory name is also caught.
        assert!(p.is_ignored(Path::new("/w/__pycache__/cached.py"), false));
    }

    #[test]
    fn versions_subtree_is_ignored() {
        let p = policy(&[]);
        assert!(p.is_ignored(Path::new("/w/data/versions"), true));
        assert!(p.is_ignored(Path::new("/w/data/versions/2026/old.py"), false));
        assert!(!p.is_ignored(Path::new("/w/data/current.py"), false));
        assert!(!p.is_ignored(Path::new("/w/versions/kept.py"), false));
    }

    #[test]
    fn pyc_suffix_is_ignored() {
        let p = policy(&[]);
        assert!(p.is_ignored(Path::new("/w/module.pyc"), false));
        assert!(!p.is_ignored(Path::new("/w/module.py"), false));
    }

    #[test]
    fn hidden_directories_are_ignored_hidden_files_kept() {
        let p = policy(&[]);
        assert!(p.is_ignored(Path::new("/w/.cache"), true));
        // Hidden *file* with an allowed extension survives.
        assert!(!p.is_ignored(Path::new("/w/.flake8.cfg"), false));
    }

    #[test]
    fn extension_filter_applies_to_files_only() {
        let p = policy(&[]);
        assert!(!p.is_ignored(Path::new("/w/app.py"), false));
        assert!(!p.is_ignored(Path::new("/w/conf.yaml"), false));
        assert!(p.is_ignored(Path::new("/w/readme.md"), false));
        assert!(p.is_ignored(Path::new("/w/binary"), false));
        // Directories carry no extension requirement.
        assert!(!p.is_ignored(Path::new("/w/src"), true));
    }

    #[test]
    fn user_glob_matches_full_path() {
        let p = policy(&["/w/generated/**"]);
        assert!(p.is_ignored(Path::new("/w/generated/a.py"), false));
        assert!(p.is_ignored(Path::new("/w/generated/deep/b.py"), false));
        assert!(!p.is_ignored(Path::new("/w/src/a.py"), false));
    }

    #[test]
    fn user_glob_matches_trailing_subpath() {
        let p = policy(&["build/out"]);
        assert!(p.is_ignored(Path::new("/w/project/build/out"), true));
        assert!(!p.is_ignored(Path::new("/w/project/build"), true));
    }

    #[test]
    fn user_glob_matches_single_component() {
        let p = policy(&["*.generated.py"]);
        assert!(p.is_ignored(Path::new("/w/api.generated.py"), false));
        assert!(p.is_ignored(Path::new("/w/deep/nested/api.generated.py"), false));
        assert!(!p.is_ignored(Path::new("/w/api.py"), false));
    }

    #[test]
    fn user_glob_cannot_reinclude_builtin() {
        // There is no re-inclusion syntax; built-ins always win.
        let p = policy(&["keep-everything-else"]);
        assert!(p.is_ignored(Path::new("/w/.git"), true));
        assert!(p.is_ignored(Path::new("/w/x.pyc"), false));
    }

    #[test]
    fn question_mark_matches_single_char() {
        let p = policy(&["tmp-?"]);
        assert!(p.is_ignored(Path::new("/w/tmp-a"), true));
        assert!(!p.is_ignored(Path::new("/w/tmp-ab"), true));
    }

    #[test]
    fn invalid_extension_case_is_normalized() {
        let p = policy(&[]);
        assert!(!p.is_ignored(Path::new("/w/APP.PY"), false));
        assert!(!p.is_ignored(PathBuf::from("/w/settings.TOML").as_path(), false));
    }

    #[test]
    fn glob_metacharacters_are_literal() {
        let p = policy(&["/w/[build]"]);
        assert!(p.is_ignored(Path::new("/w/[build]"), true));
        assert!(!p.is_ignored(Path::new("/w/b"), true));
    }
}
