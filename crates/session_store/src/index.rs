use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::SessionStoreError;

/// Index keys that describe agent sessions start with this.
pub const AGENT_KEY_PREFIX: &str = "agent:";
pub const DEFAULT_CONTEXT_TOKENS: u64 = 262_144;
/// Rough per-line token cost used to bound the total after a compaction.
pub const TOKENS_PER_LINE_ESTIMATE: u64 = 150;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub key: String,
    pub session_id: String,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub context_tokens: u64,
    pub model: Option<String>,
    pub model_provider: Option<String>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenClamp {
    pub previous_total: u64,
    pub total: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct IndexEntry {
    session_id: Option<String>,
    total_tokens: Option<u64>,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    context_tokens: Option<u64>,
    model: Option<String>,
    model_provider: Option<String>,
    updated_at: Option<i64>,
}

/// Authoritative per-session token counts kept by the agent runtime.
pub trait SessionIndex {
    /// Where the index lives, for error reporting.
    fn location(&self) -> &Path;

    fn list(&self) -> Result<Vec<SessionSummary>, SessionStoreError>;

    /// Lowers the stored total to at most `estimate`. Never raises it.
    ///
    /// Returns `None` when the session is unknown or has no recorded total.
    fn clamp_total_tokens(
        &self,
        session_id: &str,
        estimate: u64,
    ) -> Result<Option<TokenClamp>, SessionStoreError>;

    fn get(&self, session_id: &str) -> Result<Option<SessionSummary>, SessionStoreError> {
        Ok(self
            .list()?
            .into_iter()
            .find(|summary| summary.session_id == session_id))
    }

    /// Finds a session by exact id, then id prefix, then substring.
    fn resolve(&self, query: &str) -> Result<SessionSummary, SessionStoreError> {
        let sessions = self.list()?;
        let found = sessions
            .iter()
            .find(|s| s.session_id == query)
            .or_else(|| sessions.iter().find(|s| s.session_id.starts_with(query)))
            .or_else(|| sessions.iter().find(|s| s.session_id.contains(query)))
            .cloned();

        found.ok_or_else(|| SessionStoreError::SessionNotFound {
            session: query.to_string(),
            root: self.location().to_path_buf(),
        })
    }
}

/// `sessions.json`: a JSON object keyed by agent session key.
///
/// Unknown fields are preserved on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonSessionIndex {
    path: PathBuf,
}

impl JsonSessionIndex {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Map<String, Value>, SessionStoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(error) => {
                return Err(SessionStoreError::io("reading session index", &self.path, error));
            }
        };

        serde_json::from_str::<Map<String, Value>>(&text).map_err(|source| {
            SessionStoreError::IndexParse {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn store(&self, map: &Map<String, Value>) -> Result<(), SessionStoreError> {
        let body = serde_json::to_string_pretty(map)
            .map_err(|source| SessionStoreError::json_serialize(&self.path, source))?;
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|source| SessionStoreError::io("creating temporary index", dir, source))?;
        tmp.write_all(body.as_bytes())
            .map_err(|source| SessionStoreError::io("writing temporary index", tmp.path(), source))?;
        tmp.persist(&self.path).map_err(|error| {
            SessionStoreError::io("replacing session index", &self.path, error.error)
        })?;
        Ok(())
    }
}

fn summarize_entry(key: &str, value: &Value) -> Option<SessionSummary> {
    let entry = match IndexEntry::deserialize(value) {
        Ok(entry) => entry,
        Err(error) => {
            debug!(key, %error, "ignoring unreadable session index entry");
            return None;
        }
    };

    Some(SessionSummary {
        key: key.to_string(),
        session_id: entry.session_id?,
        total_tokens: entry.total_tokens.unwrap_or(0),
        input_tokens: entry.input_tokens.unwrap_or(0),
        output_tokens: entry.output_tokens.unwrap_or(0),
        context_tokens: entry.context_tokens.unwrap_or(DEFAULT_CONTEXT_TOKENS),
        model: entry.model,
        model_provider: entry.model_provider,
        updated_at: entry.updated_at,
    })
}

impl SessionIndex for JsonSessionIndex {
    fn location(&self) -> &Path {
        &self.path
    }

    /// Sessions, most recently updated first.
    fn list(&self) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let map = self.load()?;
        let mut sessions: Vec<SessionSummary> = map
            .iter()
            .filter(|(key, _)| key.starts_with(AGENT_KEY_PREFIX))
            .filter_map(|(key, value)| summarize_entry(key, value))
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    fn clamp_total_tokens(
        &self,
        session_id: &str,
        estimate: u64,
    ) -> Result<Option<TokenClamp>, SessionStoreError> {
        let mut map = self.load()?;
        let Some(summary) = map
            .iter()
            .filter(|(key, _)| key.starts_with(AGENT_KEY_PREFIX))
            .filter_map(|(key, value)| summarize_entry(key, value))
            .find(|summary| summary.session_id == session_id)
        else {
            return Ok(None);
        };

        if summary.total_tokens == 0 {
            return Ok(None);
        }

        let total = estimate.min(summary.total_tokens);
        if let Some(Value::Object(fields)) = map.get_mut(&summary.key) {
            fields.insert("totalTokens".to_string(), Value::from(total));
            fields.insert("inputTokens".to_string(), Value::from(total * 7 / 10));
            fields.insert("outputTokens".to_string(), Value::from(total * 3 / 10));
        }
        self.store(&map)?;

        info!(
            session = session_id,
            previous = summary.total_tokens,
            total,
            "clamped session token total"
        );
        Ok(Some(TokenClamp {
            previous_total: summary.total_tokens,
            total,
        }))
    }
}
