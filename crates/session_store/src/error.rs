use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize log record for {path}: {source}")]
    JsonSerialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("line {line} is not a valid record: {source}")]
    RecordParse {
        line: usize,
        #[source]
        source: RecordParseError,
    },

    #[error("line {line} is out of range for a log of {len} lines")]
    InvalidLineNumber { line: usize, len: usize },

    #[error("cannot {operation} {requested} lines; at most {max} allowed")]
    LineLimit {
        operation: &'static str,
        requested: usize,
        max: usize,
    },

    #[error("no session log found for '{session}' under {root}")]
    SessionNotFound { session: String, root: PathBuf },

    #[error("failed to back up {path} before rewriting: {source}")]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse session index {path}: {source}")]
    IndexParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to format timestamp as RFC3339: {0}")]
    ClockFormat(#[source] time::error::Format),
}

impl SessionStoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn json_serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::JsonSerialize {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn line_limit(operation: &'static str, requested: usize, max: usize) -> Self {
        Self::LineLimit {
            operation,
            requested,
            max,
        }
    }
}

/// Why a single log line could not be decoded into a [`crate::Record`].
///
/// Decoding failures are per line: scans record them and keep going.
#[derive(Debug, Error)]
pub enum RecordParseError {
    #[error("line is not valid JSON: {0}")]
    NotJson(#[source] serde_json::Error),

    #[error("line is JSON but not an object")]
    NotAnObject,

    #[error("record has no string 'type' field")]
    MissingType,

    #[error("message record has an unsupported shape: {0}")]
    InvalidMessage(#[source] serde_json::Error),
}
