//! Project identity markers.
//!
//! A project is declared by a file literally named `projectid` at its root.
//! Two marker forms are accepted on read: a bare UUID-v4 string, or a JSON
//! object with at least `{"id": "<uuid-v4>"}` and an optional description.
//! New writers emit the JSON form.
//!
//! `require_matching` is the safety gate in front of every mutating
//! operation against a project: the caller-provided id must equal the id
//! the filesystem declares.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::errors::{Result, SiwError};

/// Filename of the identity marker at a project root.
pub const MARKER_FILENAME: &str = "projectid";

/// Identity loaded from a `projectid` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
    /// UUID-v4 project id, in the exact string form the marker declares.
    pub id: String,
    /// Opaque description text; empty for bare-UUID markers.
    pub description: String,
}

/// JSON marker document shape.
#[derive(Debug, Serialize, Deserialize)]
struct MarkerDocument {
    id: String,
    #[serde(default)]
    description: String,
}

/// Load and validate the identity marker at `<root>/projectid`.
pub fn load_identity(root: &Path) -> Result<ProjectIdentity> {
    let marker_path = root.join(MARKER_FILENAME);
    let raw = match fs::read_to_string(&marker_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(SiwError::MissingMarker { path: marker_path });
        }
        Err(source) => {
            return Err(SiwError::Io {
                path: marker_path,
                source,
            });
        }
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SiwError::EmptyMarker { path: marker_path });
    }

    let identity = if trimmed.starts_with('{') {
        let doc: MarkerDocument =
            serde_json::from_str(trimmed).map_err(|err| SiwError::InvalidMarker {
                path: marker_path.clone(),
                details: err.to_string(),
            })?;
        ProjectIdentity {
            id: doc.id,
            description: doc.description,
        }
    } else {
        ProjectIdentity {
            id: trimmed.to_string(),
            description: String::new(),
        }
    };

    validate_uuid_v4(&identity.id, &marker_path)?;
    Ok(identity)
}

/// Safety gate for mutating operations: load the marker and fail
/// `MarkerMismatch` when `provided_id` differs from what it declares.
pub fn require_matching(root: &Path, provided_id: &str) -> Result<ProjectIdentity> {
    let identity = load_identity(root)?;
    if identity.id != provided_id {
        return Err(SiwError::MarkerMismatch {
            root: root.to_path_buf(),
            provided: provided_id.to_string(),
            expected: identity.id,
        });
    }
    Ok(identity)
}

/// Write a `projectid` marker in the JSON form.
pub fn write_identity(root: &Path, id: &str, description: &str) -> Result<()> {
    let marker_path = root.join(MARKER_FILENAME);
    validate_uuid_v4(id, &marker_path)?;
    let doc = MarkerDocument {
        id: id.to_string(),
        description: description.to_string(),
    };
    let content = serde_json::to_string_pretty(&doc)?;
    fs::write(&marker_path, content).map_err(|source| SiwError::Io {
        path: marker_path,
        source,
    })
}

fn validate_uuid_v4(raw: &str, marker_path: &Path) -> Result<()> {
    let parsed = Uuid::parse_str(raw).map_err(|err| SiwError::InvalidMarker {
        path: marker_path.to_path_buf(),
        details: format!("expected UUID: {err}"),
    })?;
    if parsed.get_version_num() != 4 {
        return Err(SiwError::InvalidMarker {
            path: marker_path.to_path_buf(),
            details: format!(
                "expected UUID version 4, got version {}",
                parsed.get_version_num()
            ),
        });
    }
    Ok(())
}
