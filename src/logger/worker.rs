//! Worker log coordinator: a dedicated logger thread owns the JSONL writer;
//! every other part of the worker sends [`WorkerEvent`]s through a bounded
//! crossbeam channel. Non-blocking `try_send()` ensures the scan path is
//! never blocked by logging back-pressure.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, SiwError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

/// Events the worker reports through the logger.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    WorkerStarted {
        version: String,
        watch_dirs: usize,
        scan_interval_secs: u64,
    },
    WorkerStopped {
        reason: String,
        uptime_secs: u64,
    },
    CatalogAvailable,
    CatalogUnavailable {
        details: String,
    },
    CycleCompleted {
        cycle: u64,
        scanned_dirs: u64,
        new_files: u64,
        changed_files: u64,
        deleted_files: u64,
        errors: u64,
    },
    ScanCompleted {
        watch_dir: String,
        files_scanned: u64,
        projects: u64,
        new_files: u64,
        changed_files: u64,
        deleted_files: u64,
        duration_ms: u64,
    },
    QueueCompleted {
        watch_dir: String,
        new_files: u64,
        changed_files: u64,
        deleted_files: u64,
        errors: u64,
        duration_ms: u64,
    },
    ProjectDiscovered {
        watch_dir: String,
        project_id: String,
        root_path: String,
    },
    LockSkipped {
        watch_dir: String,
        holder_pid: i32,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Thread-safe, cheaply-cloneable handle for sending log events.
#[derive(Clone)]
pub struct WatcherLogHandle {
    tx: Sender<WorkerEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl WatcherLogHandle {
    /// Send an event to the logger thread. Non-blocking: if the channel is
    /// full the event is dropped and the dropped-events counter is
    /// incremented.
    pub fn send(&self, event: WorkerEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Request graceful shutdown; the logger thread flushes and exits.
    pub fn shutdown(&self) {
        let _ = self.tx.send(WorkerEvent::Shutdown);
    }
}

// ──────────────────── configuration ────────────────────

/// Options for building the worker logger.
pub struct WorkerLoggerConfig {
    /// JSONL writer config. `None` disables the file log; events are
    /// drained and discarded so senders never observe the difference.
    pub jsonl: Option<JsonlConfig>,
    /// Bounded channel capacity.
    pub channel_capacity: usize,
}

impl Default for WorkerLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl: None,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle.
///
/// The returned handle is `Clone + Send`. The thread runs until
/// `handle.shutdown()` is called or all senders are dropped.
pub fn spawn_logger(
    config: WorkerLoggerConfig,
) -> Result<(WatcherLogHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<WorkerEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = WatcherLogHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("siw-logger".to_string())
        .spawn(move || {
            logger_thread_main(&rx, config.jsonl, &dropped_clone);
        })
        .map_err(|e| SiwError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(
    rx: &Receiver<WorkerEvent>,
    jsonl_config: Option<JsonlConfig>,
    dropped: &AtomicU64,
) {
    let mut jsonl = jsonl_config.map(JsonlWriter::open);

    while let Ok(event) = rx.recv() {
        let Some(writer) = jsonl.as_mut() else {
            if matches!(event, WorkerEvent::Shutdown) {
                break;
            }
            continue;
        };

        // Report dropped events before the triggering entry.
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            writer.write_entry(&warn);
        }

        if matches!(event, WorkerEvent::Shutdown) {
            writer.flush();
            break;
        }

        let entry = event_to_log_entry(&event);
        writer.write_entry(&entry);
        writer.flush();
    }

    if let Some(writer) = jsonl.as_mut() {
        writer.flush();
    }
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &WorkerEvent) -> LogEntry {
    match event {
        WorkerEvent::WorkerStarted {
            version,
            watch_dirs,
            scan_interval_secs,
        } => {
            let mut entry = LogEntry::new(EventType::WorkerStart, Severity::Info);
            entry.details = Some(format!(
                "version {version}, {watch_dirs} watch dirs, interval {scan_interval_secs}s"
            ));
            entry
        }
        WorkerEvent::WorkerStopped {
            reason,
            uptime_secs,
        } => {
            let mut entry = LogEntry::new(EventType::WorkerStop, Severity::Info);
            entry.details = Some(format!("{reason} after {uptime_secs}s"));
            entry
        }
        WorkerEvent::CatalogAvailable => {
            let mut entry = LogEntry::new(EventType::CatalogAvailable, Severity::Info);
            entry.details = Some("catalog is now available".to_string());
            entry
        }
        WorkerEvent::CatalogUnavailable { details } => {
            let mut entry = LogEntry::new(EventType::CatalogUnavailable, Severity::Warning);
            entry.details = Some(details.clone());
            entry
        }
        WorkerEvent::CycleCompleted {
            cycle,
            scanned_dirs,
            new_files,
            changed_files,
            deleted_files,
            errors,
        } => {
            let mut entry = LogEntry::new(EventType::CycleComplete, Severity::Info);
            entry.cycle = Some(*cycle);
            entry.scanned_dirs = Some(*scanned_dirs);
            entry.new_files = Some(*new_files);
            entry.changed_files = Some(*changed_files);
            entry.deleted_files = Some(*deleted_files);
            entry.errors = Some(*errors);
            entry
        }
        WorkerEvent::ScanCompleted {
            watch_dir,
            files_scanned,
            projects,
            new_files,
            changed_files,
            deleted_files,
            duration_ms,
        } => {
            let mut entry = LogEntry::new(EventType::ScanComplete, Severity::Info);
            entry.watch_dir = Some(watch_dir.clone());
            entry.files_scanned = Some(*files_scanned);
            entry.projects = Some(*projects);
            entry.new_files = Some(*new_files);
            entry.changed_files = Some(*changed_files);
            entry.deleted_files = Some(*deleted_files);
            entry.duration_ms = Some(*duration_ms);
            entry
        }
        WorkerEvent::QueueCompleted {
            watch_dir,
            new_files,
            changed_files,
            deleted_files,
            errors,
            duration_ms,
        } => {
            let mut entry = LogEntry::new(EventType::QueueComplete, Severity::Info);
            entry.watch_dir = Some(watch_dir.clone());
            entry.new_files = Some(*new_files);
            entry.changed_files = Some(*changed_files);
            entry.deleted_files = Some(*deleted_files);
            entry.errors = Some(*errors);
            entry.duration_ms = Some(*duration_ms);
            entry
        }
        WorkerEvent::ProjectDiscovered {
            watch_dir,
            project_id,
            root_path,
        } => {
            let mut entry = LogEntry::new(EventType::ProjectDiscovered, Severity::Info);
            entry.watch_dir = Some(watch_dir.clone());
            entry.project_id = Some(project_id.clone());
            entry.details = Some(root_path.clone());
            entry
        }
        WorkerEvent::LockSkipped {
            watch_dir,
            holder_pid,
        } => {
            let mut entry = LogEntry::new(EventType::LockSkipped, Severity::Warning);
            entry.watch_dir = Some(watch_dir.clone());
            entry.holder_pid = Some(*holder_pid);
            entry
        }
        WorkerEvent::Error { code, message } => {
            let mut entry = LogEntry::new(EventType::Error, Severity::Warning);
            entry.error_code = Some(code.clone());
            entry.details = Some(message.clone());
            entry
        }
        WorkerEvent::Shutdown => LogEntry::new(EventType::WorkerStop, Severity::Info),
    }
}
