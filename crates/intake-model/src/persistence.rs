//! Change Set snapshots
//!
//! A snapshot is the pretty-printed JSON form of a [`ChangeSet`]. It is
//! written to a temporary file in the target directory and renamed into
//! place, so a crash never leaves a half-written snapshot behind.

use crate::change_set::{ChangeSet, CHANGE_SET_VERSION};
use crate::error::ModelError;
use std::io::Write;
use std::path::Path;

pub fn to_json(change_set: &ChangeSet) -> Result<String, ModelError> {
    Ok(serde_json::to_string_pretty(change_set)?)
}

pub fn from_json(text: &str) -> Result<ChangeSet, ModelError> {
    let change_set: ChangeSet = serde_json::from_str(text)?;
    if change_set.version() != CHANGE_SET_VERSION {
        return Err(ModelError::UnsupportedVersion {
            found: change_set.version(),
            expected: CHANGE_SET_VERSION,
        });
    }
    Ok(change_set)
}

pub fn save_snapshot(path: &Path, change_set: &ChangeSet) -> Result<(), ModelError> {
    let io_err = |source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = to_json(change_set)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(json.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    tracing::debug!(path = %path.display(), change_set = %change_set.id(), "snapshot saved");
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<ChangeSet, ModelError> {
    let text = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    from_json(&text)
}
