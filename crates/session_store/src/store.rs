use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::codec::{is_json_line, LogView};
use crate::error::SessionStoreError;
use crate::paths::session_path;

/// Outcome of a whole-file rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub written: usize,
    /// 0-based indices (into the input) of lines that were not valid JSON.
    pub dropped: Vec<usize>,
}

/// A session log on disk.
///
/// Reads are whole-file. Writes go through a temporary file in the same
/// directory that replaces the log only once fully written, so readers never
/// see a partial log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLog {
    path: PathBuf,
    session_id: String,
}

impl SessionLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let session_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, session_id }
    }

    /// Opens `{root}/{session_id}.jsonl`, which must exist.
    pub fn locate(root: &Path, session_id: &str) -> Result<Self, SessionStoreError> {
        let path = session_path(root, session_id);
        if !path.is_file() {
            return Err(SessionStoreError::SessionNotFound {
                session: session_id.to_string(),
                root: root.to_path_buf(),
            });
        }
        Ok(Self::new(path))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Physical lines of the log. Invalid UTF-8 is replaced rather than rejected.
    pub fn read_lines(&self) -> Result<Vec<String>, SessionStoreError> {
        let bytes = fs::read(&self.path)
            .map_err(|source| SessionStoreError::io("reading session log", &self.path, source))?;
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect())
    }

    pub fn read_view(&self) -> Result<LogView, SessionStoreError> {
        self.read_lines().map(LogView::parse)
    }

    pub fn modified(&self) -> Result<SystemTime, SessionStoreError> {
        fs::metadata(&self.path)
            .and_then(|metadata| metadata.modified())
            .map_err(|source| SessionStoreError::io("reading session log metadata", &self.path, source))
    }

    /// Replaces the log with `lines`, one per line with a trailing newline.
    ///
    /// Lines that are not standalone JSON are dropped and reported.
    pub fn rewrite(&self, lines: &[String]) -> Result<RewriteReport, SessionStoreError> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut report = RewriteReport::default();
        let mut body = String::new();
        for (index, line) in lines.iter().enumerate() {
            let line = line.trim_end_matches(['\r', '\n']);
            if !is_json_line(line) {
                report.dropped.push(index);
                continue;
            }
            body.push_str(line);
            body.push('\n');
            report.written += 1;
        }

        if !report.dropped.is_empty() {
            warn!(
                path = %self.path.display(),
                dropped = report.dropped.len(),
                "dropping non-JSON lines during rewrite"
            );
        }

        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|source| SessionStoreError::io("creating temporary log", dir, source))?;
        tmp.write_all(body.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|source| SessionStoreError::io("writing temporary log", tmp.path(), source))?;
        tmp.persist(&self.path).map_err(|error| {
            SessionStoreError::io("replacing session log", &self.path, error.error)
        })?;

        info!(
            path = %self.path.display(),
            lines = report.written,
            "rewrote session log"
        );
        Ok(report)
    }
}
