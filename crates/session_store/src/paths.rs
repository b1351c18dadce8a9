use std::path::{Path, PathBuf};

use time::OffsetDateTime;

pub const AGENT_HOME_DIR: &str = ".openclaw";
pub const SESSION_DIR: [&str; 3] = ["agents", "main", "sessions"];
pub const INDEX_FILE_NAME: &str = "sessions.json";
pub const BACKUP_DIR_NAME: &str = "backups";
pub const LOG_EXTENSION: &str = "jsonl";

#[must_use]
pub fn agent_home(home: &Path) -> PathBuf {
    home.join(AGENT_HOME_DIR)
}

#[must_use]
pub fn session_root(home: &Path) -> PathBuf {
    SESSION_DIR
        .iter()
        .fold(agent_home(home), |path, segment| path.join(segment))
}

#[must_use]
pub fn session_file_name(session_id: &str) -> String {
    format!("{session_id}.{LOG_EXTENSION}")
}

#[must_use]
pub fn session_path(root: &Path, session_id: &str) -> PathBuf {
    root.join(session_file_name(session_id))
}

#[must_use]
pub fn index_path(root: &Path) -> PathBuf {
    root.join(INDEX_FILE_NAME)
}

#[must_use]
pub fn backup_dir(root: &Path) -> PathBuf {
    root.join(BACKUP_DIR_NAME)
}

/// `YYYYmmdd_HHMMSS`, the stamp used in backup file names.
#[must_use]
pub fn compact_stamp(at: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

#[must_use]
pub fn backup_file_name(session_id: &str, at: OffsetDateTime) -> String {
    format!("{session_id}_{}.{LOG_EXTENSION}", compact_stamp(at))
}
