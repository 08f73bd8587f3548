//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use source_index_watcher::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, SiwError};
pub use crate::core::paths::{normalize_dir, resolve_absolute_path};

// Projects
pub use crate::project::discovery::{DiscoveryReport, ProjectRoot, discover_projects, find_project};
pub use crate::project::identity::{ProjectIdentity, load_identity, require_matching};

// Scanner
pub use crate::scanner::ignore::IgnorePolicy;
pub use crate::scanner::walk::{ScanReport, ScannedFile, scan_directory};

// Catalog
pub use crate::catalog::{Catalog, FileRecord, NewFile, ProjectRecord, RegisterOutcome};
#[cfg(feature = "sqlite")]
pub use crate::catalog::sqlite::SqliteCatalog;

// Watcher
pub use crate::watcher::delta::{FileDelta, MTIME_TOLERANCE_SECS, compute_delta};
pub use crate::watcher::locks::{LockManager, LockPayload, LockState};
pub use crate::watcher::queue::{QueueStats, queue_changes};

// Daemon
#[cfg(all(feature = "daemon", feature = "sqlite"))]
pub use crate::daemon::runner::{CycleStats, WatcherWorker, WorkerStats};
#[cfg(feature = "daemon")]
pub use crate::daemon::signals::SignalHandler;
