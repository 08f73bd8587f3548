//! SIW-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SiwError>;

/// Top-level error type for the source index watcher.
#[derive(Debug, Error)]
pub enum SiwError {
    #[error("[SIW-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SIW-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SIW-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SIW-2001] path does not exist: {path}")]
    PathNotFound { path: PathBuf },

    #[error("[SIW-2002] path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("[SIW-2101] missing projectid marker: {path}")]
    MissingMarker { path: PathBuf },

    #[error("[SIW-2102] empty projectid marker: {path}")]
    EmptyMarker { path: PathBuf },

    #[error("[SIW-2103] invalid projectid marker at {path}: {details}")]
    InvalidMarker { path: PathBuf, details: String },

    #[error(
        "[SIW-2104] project id mismatch for {root}: provided {provided}, marker declares {expected}"
    )]
    MarkerMismatch {
        root: PathBuf,
        provided: String,
        expected: String,
    },

    #[error("[SIW-2201] nested project: {child} is declared inside project {parent}")]
    NestedProject { child: PathBuf, parent: PathBuf },

    #[error(
        "[SIW-2202] duplicate project id {id}: already used in {first_root}, found again in {second_root}"
    )]
    DuplicateProjectId {
        id: String,
        first_root: PathBuf,
        second_root: PathBuf,
    },

    #[error(
        "[SIW-2301] project id mismatch for file {path}: caller claims {provided}, filesystem marker says {found}"
    )]
    ProjectIdMismatch {
        path: PathBuf,
        provided: String,
        found: String,
    },

    #[error("[SIW-2401] lock busy for {watch_dir}: held by live pid {holder_pid}")]
    LockBusy {
        watch_dir: PathBuf,
        holder_pid: i32,
    },

    #[error("[SIW-2402] corrupt lock file {path}: {details}")]
    LockCorrupt { path: PathBuf, details: String },

    #[error("[SIW-3001] catalog unavailable: {details}")]
    CatalogUnavailable { details: String },

    #[error("[SIW-3002] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[SIW-3101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SIW-3201] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SIW-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SiwError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SIW-1001",
            Self::MissingConfig { .. } => "SIW-1002",
            Self::ConfigParse { .. } => "SIW-1003",
            Self::PathNotFound { .. } => "SIW-2001",
            Self::NotADirectory { .. } => "SIW-2002",
            Self::MissingMarker { .. } => "SIW-2101",
            Self::EmptyMarker { .. } => "SIW-2102",
            Self::InvalidMarker { .. } => "SIW-2103",
            Self::MarkerMismatch { .. } => "SIW-2104",
            Self::NestedProject { .. } => "SIW-2201",
            Self::DuplicateProjectId { .. } => "SIW-2202",
            Self::ProjectIdMismatch { .. } => "SIW-2301",
            Self::LockBusy { .. } => "SIW-2401",
            Self::LockCorrupt { .. } => "SIW-2402",
            Self::CatalogUnavailable { .. } => "SIW-3001",
            Self::Sql { .. } => "SIW-3002",
            Self::Serialization { .. } => "SIW-3101",
            Self::Io { .. } => "SIW-3201",
            Self::Runtime { .. } => "SIW-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::LockBusy { .. }
                | Self::CatalogUnavailable { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether the failure indicates the catalog itself is gone and the
    /// runner should drop its handle and reconnect with backoff.
    ///
    /// The runner branches on this variant check, never on message text.
    #[must_use]
    pub const fn is_catalog_error(&self) -> bool {
        matches!(self, Self::CatalogUnavailable { .. } | Self::Sql { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for SiwError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for SiwError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SiwError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
