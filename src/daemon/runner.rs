//! Cycle runner: drives scan → delta → queue for every watched root on a
//! schedule, with catalog-availability backoff.
//!
//! State machine: CONNECTING ⇄ RUNNING → STOPPING. While the catalog is
//! unreachable the runner only retries the connection (1 s doubling to
//! 60 s); it never scans without a catalog and never spawns catalog helper
//! processes. Availability transitions are logged exactly once each way.
//!
//! Scheduling is single-threaded cooperative: the loop suspends only in
//! the inter-cycle sleep (broken into 1-second stop-flag ticks) and inside
//! catalog calls.

#![allow(missing_docs)]

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::catalog::{Catalog, RegisterOutcome, SqliteCatalog};
use crate::core::config::Config;
use crate::core::errors::{Result, SiwError};
use crate::daemon::signals::SignalHandler;
use crate::logger::jsonl::JsonlConfig;
use crate::logger::worker::{
    WatcherLogHandle, WorkerEvent, WorkerLoggerConfig, spawn_logger,
};
use crate::scanner::ignore::IgnorePolicy;
use crate::scanner::walk::scan_directory;
use crate::watcher::delta::compute_delta;
use crate::watcher::locks::{LockManager, LockState};
use crate::watcher::queue::queue_changes;

const BACKOFF_INITIAL_SECS: f64 = 1.0;
const BACKOFF_MAX_SECS: f64 = 60.0;

/// Running totals returned when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub scanned_dirs: u64,
    pub new_files: u64,
    pub changed_files: u64,
    pub deleted_files: u64,
    pub errors: u64,
    pub cycles: u64,
    pub watch_dirs: usize,
}

impl WorkerStats {
    fn absorb_cycle(&mut self, cycle: &CycleStats) {
        self.scanned_dirs += cycle.scanned_dirs;
        self.new_files += cycle.new_files;
        self.changed_files += cycle.changed_files;
        self.deleted_files += cycle.deleted_files;
        self.errors += cycle.errors;
    }
}

/// Counters for one scan cycle across all watched roots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub scanned_dirs: u64,
    pub new_files: u64,
    pub changed_files: u64,
    pub deleted_files: u64,
    pub errors: u64,
    /// Catalog-loss class failures were observed; the runner drops its
    /// handle and reconnects.
    #[serde(skip)]
    pub catalog_lost: bool,
}

impl CycleStats {
    fn absorb(&mut self, other: Self) {
        self.scanned_dirs += other.scanned_dirs;
        self.new_files += other.new_files;
        self.changed_files += other.changed_files;
        self.deleted_files += other.deleted_files;
        self.errors += other.errors;
        self.catalog_lost |= other.catalog_lost;
    }
}

/// The file-watcher worker: one process, one runner, cooperative stop.
pub struct WatcherWorker {
    config: Config,
    policy: IgnorePolicy,
    signals: SignalHandler,
    log: WatcherLogHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    pid: i32,
}

impl WatcherWorker {
    /// Build the worker from configuration: compile the ignore policy,
    /// spawn the logger thread, and register signal handlers.
    pub fn init(config: Config) -> Result<Self> {
        let policy = IgnorePolicy::new(
            &config.watcher.ignore_patterns,
            &config.watcher.allowed_extensions,
        )?;

        let jsonl = config.log.worker_log_path.as_ref().map(|path| JsonlConfig {
            path: path.clone(),
            max_size_bytes: config.log.max_bytes,
            max_rotated_files: config.log.backup_count,
        });
        let (log, logger_join) = spawn_logger(WorkerLoggerConfig {
            jsonl,
            ..WorkerLoggerConfig::default()
        })?;

        Ok(Self {
            config,
            policy,
            signals: SignalHandler::new(),
            log,
            logger_join: Some(logger_join),
            pid: i32::try_from(std::process::id()).unwrap_or(0),
        })
    }

    /// Signal flags, for embedders that stop the worker programmatically.
    pub fn signals(&self) -> &SignalHandler {
        &self.signals
    }

    /// Run until stopped. Returns the accumulated statistics.
    #[allow(clippy::too_many_lines)]
    pub fn run(mut self) -> WorkerStats {
        let start = Instant::now();
        let mut stats = WorkerStats {
            watch_dirs: self.config.watcher.watch_dirs.len(),
            ..WorkerStats::default()
        };

        eprintln!(
            "[SIW-WORKER] starting | pid={} | watch_dirs={} | scan_interval={}s",
            self.pid,
            stats.watch_dirs,
            self.config.watcher.scan_interval_secs
        );
        self.log.send(WorkerEvent::WorkerStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            watch_dirs: stats.watch_dirs,
            scan_interval_secs: self.config.watcher.scan_interval_secs,
        });

        let mut catalog: Option<SqliteCatalog> = None;
        let mut catalog_available = false;
        let mut unavailable_logged = false;
        let mut backoff = BACKOFF_INITIAL_SECS;

        while !self.signals.should_stop() {
            // CONNECTING: open a handle before any scan work.
            if catalog.is_none() {
                match self.connect() {
                    Ok(handle) => {
                        catalog = Some(handle);
                        if !catalog_available {
                            eprintln!("[SIW-WORKER] catalog is now available");
                            self.log.send(WorkerEvent::CatalogAvailable);
                        }
                        catalog_available = true;
                        unavailable_logged = false;
                        backoff = BACKOFF_INITIAL_SECS;
                    }
                    Err(err) => {
                        stats.errors += 1;
                        if catalog_available || !unavailable_logged {
                            eprintln!("[SIW-WORKER] catalog unavailable: {err}");
                            self.log.send(WorkerEvent::CatalogUnavailable {
                                details: err.to_string(),
                            });
                            unavailable_logged = true;
                        }
                        catalog_available = false;
                        self.sleep_ticks(backoff);
                        backoff = (backoff * 2.0).min(BACKOFF_MAX_SECS);
                        continue;
                    }
                }
            }

            // RUNNING: one cycle over every watched root.
            let Some(handle) = catalog.as_ref() else {
                continue;
            };
            let cycle = self.run_cycle(handle);
            stats.absorb_cycle(&cycle);
            stats.cycles += 1;

            eprintln!(
                "[SIW-WORKER] cycle #{} | scanned_dirs: {} | new_files: {} | changed_files: {} | deleted_files: {} | errors: {}",
                stats.cycles,
                cycle.scanned_dirs,
                cycle.new_files,
                cycle.changed_files,
                cycle.deleted_files,
                cycle.errors
            );
            self.log.send(WorkerEvent::CycleCompleted {
                cycle: stats.cycles,
                scanned_dirs: cycle.scanned_dirs,
                new_files: cycle.new_files,
                changed_files: cycle.changed_files,
                deleted_files: cycle.deleted_files,
                errors: cycle.errors,
            });

            // CATALOG_LOST: drop the handle, re-enter CONNECTING with the
            // current backoff.
            if cycle.catalog_lost {
                catalog = None;
                if catalog_available {
                    eprintln!("[SIW-WORKER] catalog lost during cycle, reconnecting");
                    self.log.send(WorkerEvent::CatalogUnavailable {
                        details: "catalog lost during cycle".to_string(),
                    });
                }
                catalog_available = false;
                unavailable_logged = true;
                self.sleep_ticks(backoff);
                backoff = (backoff * 2.0).min(BACKOFF_MAX_SECS);
                continue;
            }

            self.sleep_scan_interval();
        }

        // STOPPING: close the handle, flush the log, report totals.
        drop(catalog);
        let uptime = start.elapsed().as_secs();
        eprintln!("[SIW-WORKER] stopped after {uptime}s");
        self.log.send(WorkerEvent::WorkerStopped {
            reason: "stop requested".to_string(),
            uptime_secs: uptime,
        });
        self.log.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }

        stats
    }

    /// Run exactly one cycle against a freshly opened catalog handle.
    ///
    /// Used by `siw scan` and by tests; connection failures surface as
    /// errors instead of entering the backoff loop.
    pub fn run_once(&mut self) -> Result<CycleStats> {
        let catalog = self.connect()?;
        let cycle = self.run_cycle(&catalog);
        Ok(cycle)
    }

    /// Flush and join the logger thread. `run` does this on its own; only
    /// `run_once` callers need it.
    pub fn finish(mut self) {
        self.log.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
    }

    fn connect(&self) -> Result<SqliteCatalog> {
        let catalog = SqliteCatalog::open(&self.config.watcher.db_path)?;
        catalog.ping()?;
        Ok(catalog)
    }

    fn run_cycle(&self, catalog: &SqliteCatalog) -> CycleStats {
        let mut cycle = CycleStats::default();
        for watch_dir in &self.config.watcher.watch_dirs {
            if self.signals.should_stop() {
                break;
            }
            cycle.absorb(self.scan_watch_dir(catalog, watch_dir));
        }
        cycle
    }

    fn scan_watch_dir(&self, catalog: &SqliteCatalog, watch_dir: &Path) -> CycleStats {
        let mut stats = CycleStats::default();

        // Normalize the root; a missing or non-directory entry is logged
        // and skipped for this cycle.
        let watch_dir = match crate::core::paths::normalize_dir(watch_dir) {
            Ok(dir) => dir,
            Err(err) => {
                eprintln!("[SIW-WORKER] skipping watched directory: {err}");
                self.log.send(WorkerEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                return stats;
            }
        };
        let watch_dir = watch_dir.as_path();
        let watch_dir_str = watch_dir.to_string_lossy().into_owned();

        // Lock ownership is keyed by the root itself: several projects can
        // share one watched root.
        let owner_key = LockManager::lock_key(watch_dir);
        let lock_manager = match LockManager::new(&self.config.watcher.locks_dir, &owner_key) {
            Ok(manager) => manager,
            Err(err) => {
                self.report_error(&mut stats, &err);
                return stats;
            }
        };

        match lock_manager.acquire(watch_dir, self.pid) {
            Ok(LockState::Acquired) => {}
            Ok(LockState::Busy { holder_pid }) => {
                eprintln!(
                    "[SIW-WORKER] could not acquire lock for {watch_dir_str} (held by pid {holder_pid}), skipping"
                );
                self.log.send(WorkerEvent::LockSkipped {
                    watch_dir: watch_dir_str,
                    holder_pid,
                });
                stats.errors += 1;
                return stats;
            }
            Err(err) => {
                self.report_error(&mut stats, &err);
                return stats;
            }
        }

        stats.absorb(self.process_locked_root(catalog, watch_dir, &watch_dir_str));
        lock_manager.release(watch_dir);
        stats
    }

    #[allow(clippy::too_many_lines)]
    fn process_locked_root(
        &self,
        catalog: &SqliteCatalog,
        watch_dir: &Path,
        watch_dir_str: &str,
    ) -> CycleStats {
        let mut stats = CycleStats::default();

        // Discover and reconcile projects before touching any files.
        let report = crate::project::discovery::discover_projects(watch_dir);
        for err in &report.skipped {
            self.log.send(WorkerEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            });
            if matches!(err, SiwError::NestedProject { .. }) {
                stats.errors += 1;
            }
        }
        if let Some(dup) = &report.duplicate {
            eprintln!("[SIW-WORKER] {dup}; skipping {watch_dir_str} this cycle");
            self.log.send(WorkerEvent::Error {
                code: dup.code().to_string(),
                message: dup.to_string(),
            });
            stats.errors += report.projects.len().max(1) as u64;
            return stats;
        }
        if report.projects.is_empty() {
            return stats;
        }

        for project in &report.projects {
            match catalog.register_project(project) {
                Ok(RegisterOutcome::Created) => {
                    self.log.send(WorkerEvent::ProjectDiscovered {
                        watch_dir: watch_dir_str.to_string(),
                        project_id: project.project_id.clone(),
                        root_path: project.root_path.to_string_lossy().into_owned(),
                    });
                }
                Ok(
                    RegisterOutcome::Unchanged | RegisterOutcome::DescriptionUpdated,
                ) => {}
                Ok(RegisterOutcome::RootConflict { existing_root }) => {
                    let message = format!(
                        "project id {} already bound to {existing_root}, refusing {}",
                        project.project_id,
                        project.root_path.display()
                    );
                    eprintln!("[SIW-WORKER] {message}");
                    self.log.send(WorkerEvent::Error {
                        code: "SIW-2202".to_string(),
                        message,
                    });
                    stats.errors += 1;
                }
                Ok(RegisterOutcome::IdConflict { existing_id }) => {
                    let message = format!(
                        "root {} already registered as {existing_id}, refusing id rewrite to {}",
                        project.root_path.display(),
                        project.project_id
                    );
                    eprintln!("[SIW-WORKER] {message}");
                    self.log.send(WorkerEvent::Error {
                        code: "SIW-2301".to_string(),
                        message,
                    });
                    stats.errors += 1;
                }
                Err(err) => self.report_error(&mut stats, &err),
            }
        }

        // Scan phase: no catalog writes.
        let scan_start = Instant::now();
        let scan = scan_directory(watch_dir, &self.config.watcher.watch_dirs, &self.policy);
        stats.errors += scan.errors as u64;

        // Delta phase: catalog reads only.
        let delta = compute_delta(catalog, watch_dir, &scan.files);
        stats.errors += delta.errors as u64;
        stats.catalog_lost |= delta.catalog_errors > 0;

        let total_new: usize = delta.per_project.values().map(|d| d.new_files.len()).sum();
        let total_changed: usize = delta
            .per_project
            .values()
            .map(|d| d.changed_files.len())
            .sum();
        let total_deleted: usize = delta
            .per_project
            .values()
            .map(|d| d.deleted_files.len())
            .sum();
        self.log.send(WorkerEvent::ScanCompleted {
            watch_dir: watch_dir_str.to_string(),
            files_scanned: scan.files.len() as u64,
            projects: delta.per_project.len() as u64,
            new_files: total_new as u64,
            changed_files: total_changed as u64,
            deleted_files: total_deleted as u64,
            duration_ms: scan_start.elapsed().as_millis() as u64,
        });

        // Queue phase: batched catalog writes, new → changed → deleted.
        let queue_start = Instant::now();
        let mut queued = crate::watcher::queue::QueueStats::default();
        for (project_id, file_delta) in &delta.per_project {
            queued.absorb(queue_changes(
                catalog,
                watch_dir,
                project_id,
                file_delta,
                self.config.watcher.version_dir.as_deref(),
            ));
        }
        self.log.send(WorkerEvent::QueueCompleted {
            watch_dir: watch_dir_str.to_string(),
            new_files: queued.new_files,
            changed_files: queued.changed_files,
            deleted_files: queued.deleted_files,
            errors: queued.errors,
            duration_ms: queue_start.elapsed().as_millis() as u64,
        });

        stats.scanned_dirs += 1;
        stats.new_files += queued.new_files;
        stats.changed_files += queued.changed_files;
        stats.deleted_files += queued.deleted_files;
        stats.errors += queued.errors;
        stats.catalog_lost |= queued.catalog_errors > 0;

        stats
    }

    fn report_error(&self, stats: &mut CycleStats, err: &SiwError) {
        eprintln!("[SIW-WORKER] {err}");
        self.log.send(WorkerEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        });
        stats.errors += 1;
        stats.catalog_lost |= err.is_catalog_error();
    }

    /// Sleep for the scan interval in 1-second ticks, waking early on stop
    /// or an immediate-cycle request.
    fn sleep_scan_interval(&self) {
        for _ in 0..self.config.watcher.scan_interval_secs {
            if self.signals.should_stop() || self.signals.should_run_cycle() {
                return;
            }
            thread::sleep(Duration::from_secs(1));
        }
    }

    /// Sleep `secs` in 1-second ticks, waking early on stop.
    fn sleep_ticks(&self, secs: f64) {
        let mut remaining = secs;
        while remaining > 0.0 {
            if self.signals.should_stop() {
                return;
            }
            let step = remaining.min(1.0);
            thread::sleep(Duration::from_secs_f64(step));
            remaining -= step;
        }
    }
}
