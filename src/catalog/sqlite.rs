//! SQLite catalog adapter: WAL-mode database, schema-on-open, prepared
//! statements, and the filesystem `projectid` safety gate on every write
//! that attributes a file to a project.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use uuid::Uuid;

use crate::catalog::{
    Catalog, FileRecord, NewFile, ProjectRecord, RegisterOutcome, UpdateOutcome,
    probe_file_metadata,
};
use crate::core::errors::{Result, SiwError};
use crate::core::paths::path_key;
use crate::project::discovery::ProjectRoot;
use crate::project::identity::{self, MARKER_FILENAME};

/// SQLite-backed catalog.
pub struct SqliteCatalog {
    conn: Connection,
    path: PathBuf,
}

impl SqliteCatalog {
    /// Open (or create) the catalog at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SiwError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| SiwError::CatalogUnavailable {
            details: format!("cannot open catalog at {}: {err}", path.display()),
        })?;

        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// In-memory catalog for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    /// Path to the database file.
    pub fn db_path(&self) -> &Path {
        &self.path
    }

    fn file_row_id(&self, path: &str, project_id: &str, live_only: bool) -> Result<Option<i64>> {
        let sql = if live_only {
            "SELECT id FROM files WHERE project_id = ?1 AND path = ?2 AND deleted = 0"
        } else {
            "SELECT id FROM files WHERE project_id = ?1 AND path = ?2"
        };
        let id = self
            .conn
            .prepare_cached(sql)?
            .query_row(params![project_id, path], |row| row.get(0))
            .optional()?;
        Ok(id)
    }
}

impl Catalog for SqliteCatalog {
    fn ping(&self) -> Result<()> {
        self.conn
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|err| SiwError::CatalogUnavailable {
                details: err.to_string(),
            })
    }

    fn get_or_create_dataset(
        &self,
        project_id: &str,
        root_path: &Path,
        name: Option<&str>,
    ) -> Result<String> {
        let normalized = path_key(root_path);
        if let Some(existing) = self.get_dataset_id(project_id, root_path)? {
            return Ok(existing);
        }

        let dataset_id = Uuid::new_v4().to_string();
        let dataset_name = name.map_or_else(
            || {
                Path::new(&normalized)
                    .file_name()
                    .map_or_else(|| normalized.clone(), |n| n.to_string_lossy().into_owned())
            },
            ToString::to_string,
        );
        let now = now_utc();
        self.conn
            .prepare_cached(
                "INSERT INTO datasets (id, project_id, root_path, name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            )?
            .execute(params![dataset_id, project_id, normalized, dataset_name, now])?;
        Ok(dataset_id)
    }

    fn get_dataset_id(&self, project_id: &str, root_path: &Path) -> Result<Option<String>> {
        let normalized = path_key(root_path);
        let id = self
            .conn
            .prepare_cached("SELECT id FROM datasets WHERE project_id = ?1 AND root_path = ?2")?
            .query_row(params![project_id, normalized], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let record = self
            .conn
            .prepare_cached("SELECT id, root_path, name, comment FROM projects WHERE id = ?1")?
            .query_row(params![project_id], |row| {
                Ok(ProjectRecord {
                    id: row.get(0)?,
                    root_path: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                })
            })
            .optional()?;
        Ok(record)
    }

    fn get_project_id(&self, root_path: &Path) -> Result<Option<String>> {
        let normalized = path_key(root_path);
        let id = self
            .conn
            .prepare_cached("SELECT id FROM projects WHERE root_path = ?1")?
            .query_row(params![normalized], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    fn get_project_files(
        &self,
        project_id: &str,
        include_deleted: bool,
    ) -> Result<Vec<FileRecord>> {
        let sql = if include_deleted {
            "SELECT id, project_id, dataset_id, path, lines, last_modified, has_docstring,
                    needs_chunking, deleted
             FROM files WHERE project_id = ?1"
        } else {
            "SELECT id, project_id, dataset_id, path, lines, last_modified, has_docstring,
                    needs_chunking, deleted
             FROM files WHERE project_id = ?1 AND deleted = 0"
        };
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok(FileRecord {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    dataset_id: row.get(2)?,
                    path: row.get(3)?,
                    lines: row.get(4)?,
                    last_modified: row.get(5)?,
                    has_docstring: row.get(6)?,
                    needs_chunking: row.get(7)?,
                    deleted: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn register_project(&self, project: &ProjectRoot) -> Result<RegisterOutcome> {
        let root_key = path_key(&project.root_path);
        let now = now_utc();

        if let Some(existing) = self.get_project(&project.project_id)? {
            if existing.root_path != root_key {
                return Ok(RegisterOutcome::RootConflict {
                    existing_root: existing.root_path,
                });
            }
            if existing.description != project.description {
                self.conn
                    .prepare_cached(
                        "UPDATE projects SET comment = ?1, updated_at = ?2 WHERE id = ?3",
                    )?
                    .execute(params![project.description, now, project.project_id])?;
                return Ok(RegisterOutcome::DescriptionUpdated);
            }
            return Ok(RegisterOutcome::Unchanged);
        }

        if let Some(existing_id) = self.get_project_id(&project.root_path)? {
            if existing_id != project.project_id {
                // Rewriting a stored primary key to chase a marker is how
                // catalogs get corrupted. Refuse; the operator resolves it.
                return Ok(RegisterOutcome::IdConflict { existing_id });
            }
            return Ok(RegisterOutcome::Unchanged);
        }

        let name = project
            .root_path
            .file_name()
            .map_or_else(|| root_key.clone(), |n| n.to_string_lossy().into_owned());
        self.conn
            .prepare_cached(
                "INSERT INTO projects (id, root_path, name, comment, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            )?
            .execute(params![
                project.project_id,
                root_key,
                name,
                project.description,
                now
            ])?;
        Ok(RegisterOutcome::Created)
    }

    fn add_file(&self, file: &NewFile<'_>) -> Result<i64> {
        verify_marker_for_path(Path::new(file.path), file.project_id)?;

        let now = now_utc();
        self.conn
            .prepare_cached(
                "INSERT INTO files (project_id, dataset_id, path, lines, last_modified,
                                    has_docstring, needs_chunking, deleted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7, ?7)
                 ON CONFLICT(project_id, path) DO UPDATE SET
                     dataset_id = excluded.dataset_id,
                     lines = excluded.lines,
                     last_modified = excluded.last_modified,
                     has_docstring = excluded.has_docstring,
                     deleted = 0,
                     updated_at = excluded.updated_at",
            )?
            .execute(params![
                file.project_id,
                file.dataset_id,
                file.path,
                file.lines,
                file.last_modified,
                file.has_docstring,
                now
            ])?;

        self.file_row_id(file.path, file.project_id, false)?
            .ok_or_else(|| SiwError::Sql {
                context: "add_file",
                details: format!("row vanished after upsert: {}", file.path),
            })
    }

    fn mark_file_needs_chunking(&self, path: &str, project_id: &str) -> Result<bool> {
        let Some(file_id) = self.file_row_id(path, project_id, true)? else {
            return Ok(false);
        };

        self.conn
            .prepare_cached("DELETE FROM chunks WHERE file_id = ?1")?
            .execute(params![file_id])?;
        self.conn
            .prepare_cached("UPDATE files SET needs_chunking = 1, updated_at = ?1 WHERE id = ?2")?
            .execute(params![now_utc(), file_id])?;
        Ok(true)
    }

    fn mark_file_deleted(&self, path: &str, project_id: &str, version_dir: &Path) -> Result<bool> {
        let changed = self
            .conn
            .prepare_cached(
                "UPDATE files SET deleted = 1, needs_chunking = 0, version_path = ?1,
                                  updated_at = ?2
                 WHERE project_id = ?3 AND path = ?4 AND deleted = 0",
            )?
            .execute(params![
                version_dir.to_string_lossy().into_owned(),
                now_utc(),
                project_id,
                path
            ])?;
        Ok(changed > 0)
    }

    fn update_file_data(
        &self,
        path: &str,
        project_id: &str,
        root_dir: &Path,
    ) -> Result<UpdateOutcome> {
        verify_marker_for_path(Path::new(path), project_id)?;

        let target = Path::new(path);
        if !target.is_file() {
            return Ok(UpdateOutcome {
                success: false,
                ast_updated: false,
            });
        }

        let (lines, has_docstring) = probe_file_metadata(target);
        let mtime = target
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0.0, |d| d.as_secs_f64());

        if self.file_row_id(path, project_id, false)?.is_some() {
            self.conn
                .prepare_cached(
                    "UPDATE files SET lines = ?1, last_modified = ?2, has_docstring = ?3,
                                      needs_chunking = 1, deleted = 0, updated_at = ?4
                     WHERE project_id = ?5 AND path = ?6",
                )?
                .execute(params![lines, mtime, has_docstring, now_utc(), project_id, path])?;
            return Ok(UpdateOutcome {
                success: true,
                ast_updated: true,
            });
        }

        let dataset_id = self.get_or_create_dataset(project_id, root_dir, None)?;
        self.add_file(&NewFile {
            path,
            lines,
            last_modified: mtime,
            has_docstring,
            project_id,
            dataset_id: &dataset_id,
        })?;
        self.mark_file_needs_chunking(path, project_id)?;
        Ok(UpdateOutcome {
            success: true,
            ast_updated: false,
        })
    }

    fn touch_last_modified(&self, path: &str, project_id: &str, mtime: f64) -> Result<()> {
        self.conn
            .prepare_cached(
                "UPDATE files SET last_modified = ?1, updated_at = ?2
                 WHERE project_id = ?3 AND path = ?4",
            )?
            .execute(params![mtime, now_utc(), project_id, path])?;
        Ok(())
    }
}

// ──────────────────── helpers ────────────────────

/// Safety gate shared by `add_file` and `update_file_data`: ascend from the
/// file's directory to the nearest `projectid` marker and require it to
/// declare the caller's project id.
fn verify_marker_for_path(path: &Path, project_id: &str) -> Result<()> {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.join(MARKER_FILENAME).is_file() {
            let loaded = identity::load_identity(dir)?;
            if loaded.id == project_id {
                return Ok(());
            }
            return Err(SiwError::ProjectIdMismatch {
                path: path.to_path_buf(),
                provided: project_id.to_string(),
                found: loaded.id,
            });
        }
        current = dir.parent();
    }
    Err(SiwError::ProjectIdMismatch {
        path: path.to_path_buf(),
        provided: project_id.to_string(),
        found: "<no marker found>".to_string(),
    })
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so it cannot go through pragma_update.
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS projects (
             id TEXT PRIMARY KEY,
             root_path TEXT NOT NULL UNIQUE,
             name TEXT NOT NULL,
             comment TEXT NOT NULL DEFAULT '',
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS datasets (
             id TEXT PRIMARY KEY,
             project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
             root_path TEXT NOT NULL,
             name TEXT NOT NULL,
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL,
             UNIQUE (project_id, root_path)
         );
         CREATE TABLE IF NOT EXISTS files (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
             dataset_id TEXT NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
             path TEXT NOT NULL,
             lines INTEGER NOT NULL DEFAULT 0,
             last_modified REAL NOT NULL DEFAULT 0,
             has_docstring INTEGER NOT NULL DEFAULT 0,
             needs_chunking INTEGER NOT NULL DEFAULT 0,
             deleted INTEGER NOT NULL DEFAULT 0,
             version_path TEXT,
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL,
             UNIQUE (project_id, path)
         );
         CREATE INDEX IF NOT EXISTS idx_files_project_dataset
             ON files (project_id, dataset_id);
         CREATE TABLE IF NOT EXISTS chunks (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
             ordinal INTEGER NOT NULL DEFAULT 0,
             content TEXT
         );",
    )?;
    Ok(())
}

/// Current UTC time as ISO 8601 with millisecond precision.
fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
