//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SiwError};

/// Full watcher configuration model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub watcher: WatcherConfig,
    pub log: LogConfig,
    /// Path the config was loaded from (not part of the TOML surface).
    #[serde(skip)]
    pub config_file: PathBuf,
}

/// Watch directories, catalog location, and scan behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatcherConfig {
    /// Absolute path to the catalog database file (interpreted by the adapter).
    pub db_path: PathBuf,
    /// Root directories to observe. Nonexistent entries are logged and
    /// skipped at runtime, not rejected at load time.
    pub watch_dirs: Vec<PathBuf>,
    /// Service state directory for lock files.
    pub locks_dir: PathBuf,
    /// Seconds between successive scan cycles.
    pub scan_interval_secs: u64,
    /// Directory for archived deletions. When absent, deletions are counted
    /// as errors (deletion archival requires storage).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_dir: Option<PathBuf>,
    /// Additional glob patterns excluded from scanning, on top of the
    /// built-in ignore rules.
    pub ignore_patterns: Vec<String>,
    /// File extensions eligible for indexing (without the leading dot).
    pub allowed_extensions: Vec<String>,
}

/// Worker activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Rotating JSONL log file path. `None` disables the file log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_log_path: Option<PathBuf>,
    /// Rotation size threshold in bytes.
    pub max_bytes: u64,
    /// Kept rotation generations.
    pub backup_count: u32,
}

/// Default extensions eligible for indexing.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] =
    &["py", "json", "yaml", "yml", "toml", "ini", "cfg"];

fn data_dir() -> PathBuf {
    let home_dir = env::var_os("HOME").map_or_else(
        || {
            eprintln!(
                "[SIW-CONFIG] WARNING: HOME not set, falling back to /var/lib/siw for data paths"
            );
            PathBuf::from("/var/lib/siw")
        },
        PathBuf::from,
    );
    if home_dir == Path::new("/var/lib/siw") {
        home_dir
    } else {
        home_dir.join(".local").join("share").join("siw")
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            db_path: data.join("catalog.sqlite3"),
            watch_dirs: Vec::new(),
            locks_dir: data.join("locks"),
            scan_interval_secs: 60,
            version_dir: None,
            ignore_patterns: Vec::new(),
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            worker_log_path: None,
            max_bytes: 10 * 1024 * 1024,
            backup_count: 5,
        }
    }
}

impl Config {
    /// Default configuration path (`~/.config/siw/config.toml`).
    #[must_use]
    pub fn default_path() -> PathBuf {
        let home_dir = env::var_os("HOME").map_or_else(
            || PathBuf::from("/etc/siw"),
            |home| PathBuf::from(home).join(".config").join("siw"),
        );
        home_dir.join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Resolution order for config file path:
    /// 1. Explicit `path` argument (from `--config` CLI flag)
    /// 2. `SIW_CONFIG` environment variable
    /// 3. Default path (`~/.config/siw/config.toml`)
    ///
    /// Missing config file is not an error when loading from default path;
    /// defaults are used. When no explicit path is given and user-level
    /// config does not exist, `/etc/siw/config.toml` is tried before
    /// defaults so CLI invocations see the same config as the service.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_config = if path.is_none() {
            env::var_os("SIW_CONFIG").map(PathBuf::from)
        } else {
            None
        };

        let path_buf = path.map_or_else(
            || env_config.clone().unwrap_or_else(Self::default_path),
            Path::to_path_buf,
        );
        let is_explicit_path = path.is_some() || env_config.is_some();

        let system_config = PathBuf::from("/etc/siw/config.toml");
        let (effective_path, is_system_fallback) =
            if !is_explicit_path && !path_buf.exists() && system_config.exists() {
                (system_config, true)
            } else {
                (path_buf, false)
            };

        let mut cfg = if effective_path.exists() {
            let raw = fs::read_to_string(&effective_path).map_err(|source| SiwError::Io {
                path: effective_path.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            if is_system_fallback {
                eprintln!(
                    "[SIW-CONFIG] Using system config at {}",
                    effective_path.display()
                );
            }
            parsed
        } else if is_explicit_path {
            return Err(SiwError::MissingConfig {
                path: effective_path,
            });
        } else {
            Self::default()
        };

        cfg.config_file = effective_path;
        cfg.apply_env_overrides()?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        set_env_path("SIW_DB_PATH", &mut self.watcher.db_path);
        set_env_path_list("SIW_WATCH_DIRS", &mut self.watcher.watch_dirs);
        set_env_path("SIW_LOCKS_DIR", &mut self.watcher.locks_dir);
        set_env_u64("SIW_SCAN_INTERVAL", &mut self.watcher.scan_interval_secs)?;
        set_env_opt_path("SIW_VERSION_DIR", &mut self.watcher.version_dir);
        set_env_opt_path("SIW_WORKER_LOG_PATH", &mut self.log.worker_log_path);
        set_env_u64("SIW_LOG_MAX_BYTES", &mut self.log.max_bytes)?;
        set_env_u32("SIW_LOG_BACKUP_COUNT", &mut self.log.backup_count)?;
        Ok(())
    }

    /// Resolve configured paths to absolute form. Watch dirs that do not
    /// exist yet keep their syntactic normalization; the runner logs and
    /// skips them per cycle.
    fn normalize_paths(&mut self) {
        use crate::core::paths::resolve_absolute_path;

        self.watcher.db_path = resolve_absolute_path(&self.watcher.db_path);
        self.watcher.locks_dir = resolve_absolute_path(&self.watcher.locks_dir);
        for dir in &mut self.watcher.watch_dirs {
            *dir = resolve_absolute_path(dir);
        }
        if let Some(dir) = &self.watcher.version_dir {
            self.watcher.version_dir = Some(resolve_absolute_path(dir));
        }
        if let Some(path) = &self.log.worker_log_path {
            self.log.worker_log_path = Some(resolve_absolute_path(path));
        }
    }

    /// Reject structurally invalid configurations.
    pub fn validate(&self) -> Result<()> {
        if self.watcher.scan_interval_secs == 0 {
            return Err(SiwError::InvalidConfig {
                details: "watcher.scan_interval_secs must be at least 1".to_string(),
            });
        }
        if self.log.backup_count == 0 {
            return Err(SiwError::InvalidConfig {
                details: "log.backup_count must be at least 1".to_string(),
            });
        }
        for pattern in &self.watcher.ignore_patterns {
            crate::scanner::ignore::validate_glob_pattern(pattern)?;
        }
        if self.watcher.allowed_extensions.is_empty() {
            return Err(SiwError::InvalidConfig {
                details: "watcher.allowed_extensions must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

// ──────────────────── env override helpers ────────────────────

fn set_env_path(key: &str, target: &mut PathBuf) {
    if let Some(raw) = env::var_os(key) {
        *target = PathBuf::from(raw);
    }
}

fn set_env_opt_path(key: &str, target: &mut Option<PathBuf>) {
    if let Some(raw) = env::var_os(key) {
        if raw.is_empty() {
            *target = None;
        } else {
            *target = Some(PathBuf::from(raw));
        }
    }
}

fn set_env_path_list(key: &str, target: &mut Vec<PathBuf>) {
    if let Ok(raw) = env::var(key) {
        *target = raw
            .split(':')
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
    }
}

fn set_env_u64(key: &str, target: &mut u64) -> Result<()> {
    if let Ok(raw) = env::var(key) {
        *target = raw.parse().map_err(|_| SiwError::ConfigParse {
            context: "env",
            details: format!("{key} must be an unsigned integer, got {raw:?}"),
        })?;
    }
    Ok(())
}

fn set_env_u32(key: &str, target: &mut u32) -> Result<()> {
    if let Ok(raw) = env::var(key) {
        *target = raw.parse().map_err(|_| SiwError::ConfigParse {
            context: "env",
            details: format!("{key} must be an unsigned integer, got {raw:?}"),
        })?;
    }
    Ok(())
}
