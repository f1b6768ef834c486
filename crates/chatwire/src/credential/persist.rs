// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session persistence: load/save to a JSON file with atomic writes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::credential::Session;

/// Errors from reading or writing the session file.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("session file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("session file format: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk layout. Versioned so a future format change can be detected.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    #[serde(default = "current_version")]
    version: u32,
    session: Session,
}

fn current_version() -> u32 {
    1
}

/// Load a persisted session. A missing file is a logged-out session.
pub fn load(path: &Path) -> Result<Option<Session>, PersistError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let persisted: PersistedSession = serde_json::from_str(&contents)?;
    Ok(Some(persisted.session))
}

/// Write `session` to a temp file beside `path`, then rename it into place.
/// Readers see either the old file or the new one, never a partial write.
pub fn save(path: &Path, session: &Session) -> Result<(), PersistError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    let record = PersistedSession { version: current_version(), session: session.clone() };
    serde_json::to_writer_pretty(&mut staged, &record)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Delete the session file. Already gone is fine.
pub fn remove(path: &Path) -> Result<(), PersistError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
