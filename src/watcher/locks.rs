//! Inter-process lock manager: at most one concurrent scan per watched root.
//!
//! Lock files live in the service state directory, never inside watched
//! directories: `<locks_dir>/<owner>/<key>.lock`, where `<key>` is the first
//! 16 hex chars of SHA-256 over the normalized watched-root path. The file
//! holds a human-readable JSON payload naming the holder.
//!
//! Stale locks recover automatically: when the recorded pid is no longer a
//! live process on this host the next acquirer removes the file and takes
//! the lock. There is no time-based eviction. Lock writes go through a
//! sibling `.tmp` file and an atomic rename; they are never fsync'd (loss
//! on crash is self-healing).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{Result, SiwError};
use crate::core::paths::{path_key, resolve_absolute_path};

/// `worker_name` recorded in every lock payload.
pub const WORKER_NAME: &str = "file_watcher_worker";

/// JSON payload persisted for the lifetime of a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockPayload {
    /// Holder process id.
    pub pid: i32,
    /// Unix timestamp of acquisition, seconds.
    pub timestamp: f64,
    /// Normalized watched-root path the lock covers.
    pub watch_dir: String,
    /// Always [`WORKER_NAME`].
    pub worker_name: String,
    /// Host that took the lock.
    pub hostname: String,
    /// Logical owner id of the lock manager.
    pub project_id: String,
}

/// Result of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// The lock is now held by this process.
    Acquired,
    /// Another live process holds it; skip this root for the cycle.
    Busy {
        /// Pid recorded in the existing lock file.
        holder_pid: i32,
    },
}

/// One instance per watched root per worker process.
#[derive(Debug)]
pub struct LockManager {
    owner_id: String,
    owner_dir: PathBuf,
}

impl LockManager {
    /// Create a manager under `<locks_dir>/<owner_id>/`, creating the
    /// directories on demand.
    pub fn new(locks_dir: &Path, owner_id: &str) -> Result<Self> {
        let locks_dir = resolve_absolute_path(locks_dir);
        let owner_dir = locks_dir.join(owner_id);
        fs::create_dir_all(&owner_dir).map_err(|source| SiwError::Io {
            path: owner_dir.clone(),
            source,
        })?;
        Ok(Self {
            owner_id: owner_id.to_string(),
            owner_dir,
        })
    }

    /// Stable lock key for a watched root: SHA-256 of the normalized path,
    /// truncated to 16 hex chars.
    pub fn lock_key(watch_dir: &Path) -> String {
        let normalized = path_key(watch_dir);
        let digest = Sha256::digest(normalized.as_bytes());
        let mut key = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            key.push_str(&format!("{byte:02x}"));
        }
        key
    }

    /// Lock file path for a watched root.
    pub fn lock_path(&self, watch_dir: &Path) -> PathBuf {
        self.owner_dir
            .join(format!("{}.lock", Self::lock_key(watch_dir)))
    }

    /// Try to take the lock for `watch_dir` on behalf of `pid`.
    ///
    /// An existing lock held by a live process refuses acquisition. A lock
    /// whose process is dead, or whose payload cannot be parsed, is removed
    /// and acquisition proceeds.
    pub fn acquire(&self, watch_dir: &Path, pid: i32) -> Result<LockState> {
        let normalized = resolve_absolute_path(watch_dir);
        let lock_path = self.lock_path(&normalized);

        if lock_path.exists() {
            match read_payload(&lock_path) {
                Ok(payload) if is_process_alive(payload.pid) => {
                    return Ok(LockState::Busy {
                        holder_pid: payload.pid,
                    });
                }
                Ok(_) | Err(_) => {
                    // Stale or corrupt: recover by unlinking.
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let payload = LockPayload {
            pid,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0.0, |d| d.as_secs_f64()),
            watch_dir: normalized.to_string_lossy().into_owned(),
            worker_name: WORKER_NAME.to_string(),
            hostname: hostname(),
            project_id: self.owner_id.clone(),
        };

        let tmp_path = lock_path.with_extension("lock.tmp");
        let body = serde_json::to_string_pretty(&payload)?;
        fs::write(&tmp_path, body).map_err(|source| SiwError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &lock_path).map_err(|source| SiwError::Io {
            path: lock_path,
            source,
        })?;

        Ok(LockState::Acquired)
    }

    /// Release the lock for `watch_dir`; absence is not an error.
    pub fn release(&self, watch_dir: &Path) {
        let normalized = resolve_absolute_path(watch_dir);
        let _ = fs::remove_file(self.lock_path(&normalized));
    }

    /// Whether a lock file currently exists for `watch_dir`.
    pub fn has_lock(&self, watch_dir: &Path) -> bool {
        let normalized = resolve_absolute_path(watch_dir);
        self.lock_path(&normalized).exists()
    }
}

fn read_payload(lock_path: &Path) -> Result<LockPayload> {
    let raw = fs::read_to_string(lock_path).map_err(|source| SiwError::Io {
        path: lock_path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|err| SiwError::LockCorrupt {
        path: lock_path.to_path_buf(),
        details: err.to_string(),
    })
}

/// Liveness probe: a no-op signal to the stored pid.
#[cfg(unix)]
fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // Signal 0 probes existence without delivering anything. EPERM still
    // means the process exists.
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: i32) -> bool {
    // Without a cheap existence syscall, assume stale; the lock is
    // self-healing on the next cycle of a real holder.
    false
}

#[cfg(unix)]
fn hostname() -> String {
    nix::unistd::gethostname().map_or_else(
        |_| "unknown".to_string(),
        |h| h.to_string_lossy().into_owned(),
    )
}

#[cfg(not(unix))]
fn hostname() -> String {
    "unknown".to_string()
}
