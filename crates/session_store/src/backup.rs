use std::fs;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::info;

use crate::error::SessionStoreError;
use crate::paths::{backup_file_name, compact_stamp, LOG_EXTENSION};

/// Copies session logs into a backup directory before destructive rewrites.
///
/// A failed backup is always an error; callers must not rewrite without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupManager {
    dir: PathBuf,
}

impl BackupManager {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn backup(
        &self,
        source: &Path,
        session_id: &str,
        now: OffsetDateTime,
    ) -> Result<PathBuf, SessionStoreError> {
        fs::create_dir_all(&self.dir).map_err(|error| SessionStoreError::BackupFailed {
            path: self.dir.clone(),
            source: error,
        })?;

        let target = self.free_target(session_id, now);
        fs::copy(source, &target).map_err(|error| SessionStoreError::BackupFailed {
            path: source.to_path_buf(),
            source: error,
        })?;

        info!(
            source = %source.display(),
            backup = %target.display(),
            "backed up session log"
        );
        Ok(target)
    }

    /// Backups of one session, oldest first.
    pub fn list(&self, session_id: &str) -> Result<Vec<PathBuf>, SessionStoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(SessionStoreError::io("listing backups", &self.dir, error));
            }
        };

        let prefix = format!("{session_id}_");
        let mut backups = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|error| SessionStoreError::io("listing backups", &self.dir, error))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(LOG_EXTENSION) {
                backups.push(entry.path());
            }
        }
        backups.sort();
        Ok(backups)
    }

    fn free_target(&self, session_id: &str, now: OffsetDateTime) -> PathBuf {
        let first = self.dir.join(backup_file_name(session_id, now));
        if !first.exists() {
            return first;
        }

        // Two backups within the same second get a numeric suffix.
        let stamp = compact_stamp(now);
        (1u32..)
            .map(|n| {
                self.dir
                    .join(format!("{session_id}_{stamp}_{n}.{LOG_EXTENSION}"))
            })
            .find(|candidate| !candidate.exists())
            .unwrap_or(first)
    }
}
