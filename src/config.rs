//! Immutable configuration with file and environment sources.
//!
//! A [`TierlogConfig`] is loaded once and shared as `Arc<TierlogConfig>`.
//! Nothing mutates it in place; [`ConfigSource::reload_if_changed`] swaps in a
//! fresh value and is only called between scheduler ticks.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use session_store::{agent_home, session_root};
use thiserror::Error;
use tracing::info;

use crate::compaction::CompactionMode;

pub const CONFIG_FILE_NAME: &str = "tierlog.json";
pub const ENV_API_KEY: &str = "TIERLOG_API_KEY";
pub const ENV_SESSIONS_DIR: &str = "TIERLOG_SESSIONS_DIR";
pub const ENV_CONFIG: &str = "TIERLOG_CONFIG";

pub const DEFAULT_COMPRESSION_PROMPT: &str = "Compress the following conversation history into a summary of its key information. Requirements:
1. Low distortion: keep important decisions, code changes and key context
2. Plain text output, no Markdown
3. Few symbols, avoid special characters
4. No paragraphs; join items with commas or semicolons
5. Be as detailed as possible, within 8000 characters
6. Keep complete technical details and the reasons behind decisions

Content:";

pub const DEFAULT_ANNOTATION_PROMPT: &str = "Comment on the following conversation history, pointing out problems, contradictions or anything amusing. Use a light, humorous tone and output the commentary directly, without a title or prefix:

Content:";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("stored API key is not valid base64 text")]
    ApiKeyEncoding,

    #[error("cannot determine the home directory; set {ENV_SESSIONS_DIR}")]
    NoHomeDir,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierlogConfig {
    pub api: ApiConfig,
    pub compaction: CompactionConfig,
    pub ingest: IngestConfig,
    pub ids: TierIds,
    pub sessions_dir: Option<PathBuf>,
}

impl TierlogConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads the configured file and applies environment overrides.
    pub fn from_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_path()?,
        };
        let mut config = Self::load(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = env_string_opt(ENV_API_KEY) {
            self.api.api_key_override = Some(key);
        }
        if let Some(dir) = env_string_opt(ENV_SESSIONS_DIR) {
            self.sessions_dir = Some(PathBuf::from(dir));
        }
    }

    /// Directory holding the session logs and `sessions.json`.
    pub fn sessions_root(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.sessions_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| session_root(&home))
            .ok_or(ConfigError::NoHomeDir)
    }
}

/// `$TIERLOG_CONFIG`, else `~/.openclaw/tierlog.json`.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = env_string_opt(ENV_CONFIG) {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| agent_home(&home).join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoHomeDir)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Moonshot,
    KimiCode,
    Mock,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Moonshot => "moonshot",
            Self::KimiCode => "kimicode",
            Self::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub provider: ProviderKind,
    /// Overrides the provider's endpoint template.
    pub api_url: Option<String>,
    pub model: String,
    /// Base64 of the API key, as stored by the settings file.
    pub api_key_encoded: String,
    #[serde(skip)]
    pub api_key_override: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    /// Transport-level retries. Zero keeps retriggering a caller decision.
    pub max_retries: u32,
    pub extra_headers: BTreeMap<String, String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            api_url: None,
            model: "kimi-k2.5".to_string(),
            api_key_encoded: String::new(),
            api_key_override: None,
            timeout_secs: 60,
            max_tokens: 2000,
            max_retries: 0,
            extra_headers: BTreeMap::new(),
        }
    }
}

impl ApiConfig {
    /// The API key, from the environment override or the encoded setting.
    pub fn api_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(key) = &self.api_key_override {
            return Ok(Some(key.clone()));
        }
        if self.api_key_encoded.trim().is_empty() {
            return Ok(None);
        }

        let bytes = STANDARD
            .decode(self.api_key_encoded.trim())
            .map_err(|_| ConfigError::ApiKeyEncoding)?;
        let key = String::from_utf8(bytes).map_err(|_| ConfigError::ApiKeyEncoding)?;
        Ok(Some(key).filter(|key| !key.trim().is_empty()))
    }

    #[must_use]
    pub fn encode_api_key(key: &str) -> String {
        STANDARD.encode(key.as_bytes())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub mode: CompactionMode,
    pub short_term_keep: usize,
    pub min_message_count: usize,
    pub min_token_count: u64,
    pub auto_enabled: bool,
    pub auto_interval_secs: u64,
    pub long_history_window: usize,
    pub mid_history_window: usize,
    pub annotation_history_window: usize,
    pub min_snippet_chars: usize,
    pub max_snippet_chars: usize,
    pub compression_prompt: String,
    pub annotation_prompt: String,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            mode: CompactionMode::default(),
            short_term_keep: 5,
            min_message_count: 10,
            min_token_count: 20_000,
            auto_enabled: false,
            auto_interval_secs: 300,
            long_history_window: 20,
            mid_history_window: 10,
            annotation_history_window: 5,
            min_snippet_chars: 10,
            max_snippet_chars: 1000,
            compression_prompt: DEFAULT_COMPRESSION_PROMPT.to_string(),
            annotation_prompt: DEFAULT_ANNOTATION_PROMPT.to_string(),
        }
    }
}

impl CompactionConfig {
    #[must_use]
    pub fn auto_interval(&self) -> Duration {
        Duration::from_secs(self.auto_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub source: Option<PathBuf>,
    pub enabled: bool,
    pub poll_hz: f64,
    pub window_secs: u64,
    pub local_window: usize,
    pub max_batch: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: None,
            enabled: false,
            poll_hz: 1.0,
            window_secs: 5,
            local_window: 10,
            max_batch: 10,
        }
    }
}

impl IngestConfig {
    /// Period between polls of the external source. Non-positive rates fall
    /// back to once per second.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        if self.poll_hz.is_finite() && self.poll_hz > 0.0 {
            Duration::from_secs_f64(1.0 / self.poll_hz)
        } else {
            Duration::from_secs(1)
        }
    }
}

/// Reserved record ids and id prefixes that define the memory tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierIds {
    pub persona: String,
    /// Marker id used when a persona record already occupies the persona id.
    pub compact: String,
    pub long_term: String,
    pub mid_term: String,
    pub annotation: String,
    pub short_term_prefix: String,
    pub reserved_prefix: String,
    pub external_prefix: String,
}

impl Default for TierIds {
    fn default() -> Self {
        Self {
            persona: "baizhi00".to_string(),
            compact: "baizhi01".to_string(),
            long_term: "baizhi52".to_string(),
            mid_term: "baizhi20".to_string(),
            annotation: "baizhi21".to_string(),
            short_term_prefix: "白芷".to_string(),
            reserved_prefix: "baizhi".to_string(),
            external_prefix: "extern".to_string(),
        }
    }
}

impl TierIds {
    #[must_use]
    pub fn is_external(&self, id: &str) -> bool {
        id.starts_with(&self.external_prefix)
    }

    #[must_use]
    pub fn is_reserved(&self, id: &str) -> bool {
        id.starts_with(&self.reserved_prefix)
    }

    /// `extern0042` style id for ingested records.
    #[must_use]
    pub fn external_id(&self, sequence: usize) -> String {
        format!("{}{sequence:04}", self.external_prefix)
    }
}

/// Owner of the current configuration and its single reload point.
#[derive(Debug)]
pub struct ConfigSource {
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
    current: Arc<TierlogConfig>,
}

impl ConfigSource {
    /// Tracks `path` for changes. Without a path the configuration is fixed.
    pub fn open(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let (config, modified) = match &path {
            Some(path) => (TierlogConfig::from_env(Some(path))?, modified_at(path)),
            None => (TierlogConfig::from_env(None)?, None),
        };
        Ok(Self {
            path,
            modified,
            current: Arc::new(config),
        })
    }

    #[must_use]
    pub fn fixed(config: TierlogConfig) -> Self {
        Self {
            path: None,
            modified: None,
            current: Arc::new(config),
        }
    }

    #[must_use]
    pub fn current(&self) -> Arc<TierlogConfig> {
        Arc::clone(&self.current)
    }

    /// Re-reads the file when its modification time moved. Returns whether a
    /// new configuration was installed.
    pub fn reload_if_changed(&mut self) -> Result<bool, ConfigError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let modified = modified_at(path);
        if modified == self.modified {
            return Ok(false);
        }

        let config = TierlogConfig::from_env(Some(path))?;
        self.modified = modified;
        if *self.current == config {
            return Ok(false);
        }

        info!(path = %path.display(), "configuration reloaded");
        self.current = Arc::new(config);
        Ok(true)
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::sync::{Mutex, OnceLock};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    #[test]
    fn defaults_match_the_settings_file_defaults() {
        let config = TierlogConfig::default();

        assert_eq!(config.api.model, "kimi-k2.5");
        assert_eq!(config.api.max_retries, 0);
        assert_eq!(config.compaction.mode, CompactionMode::LongTerm);
        assert_eq!(config.compaction.short_term_keep, 5);
        assert_eq!(config.compaction.min_token_count, 20_000);
        assert_eq!(config.ingest.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.ids.external_id(7), "extern0007");
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            json!({
                "api": {"provider": "kimicode", "api_key_encoded": ApiConfig::encode_api_key("sk-1")},
                "compaction": {"mode": "annotation", "short_term_keep": 3},
                "ingest": {"poll_hz": 4.0}
            })
            .to_string(),
        )
        .expect("config should be written");

        let config = TierlogConfig::load(&path).expect("config should load");

        assert_eq!(config.api.provider, ProviderKind::KimiCode);
        assert_eq!(config.api.api_key().expect("key decodes").as_deref(), Some("sk-1"));
        assert_eq!(config.compaction.mode, CompactionMode::Annotation);
        assert_eq!(config.compaction.short_term_keep, 3);
        assert_eq!(config.compaction.min_message_count, 10);
        assert_eq!(config.ingest.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let config = TierlogConfig::load(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(config, TierlogConfig::default());
    }

    #[test]
    fn malformed_key_is_a_config_error() {
        let api = ApiConfig {
            api_key_encoded: "***".to_string(),
            ..ApiConfig::default()
        };
        assert!(matches!(api.api_key(), Err(ConfigError::ApiKeyEncoding)));
    }

    #[test]
    fn env_overrides_key_and_sessions_dir() {
        let _lock = env_lock();
        let _key = set_env_guard(ENV_API_KEY, Some("sk-env"));
        let _dir = set_env_guard(ENV_SESSIONS_DIR, Some("/tmp/sessions"));

        let mut config = TierlogConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.api.api_key().expect("key").as_deref(), Some("sk-env"));
        assert_eq!(
            config.sessions_root().expect("root"),
            PathBuf::from("/tmp/sessions")
        );
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let _lock = env_lock();
        let _key = set_env_guard(ENV_API_KEY, Some("   "));

        let mut config = TierlogConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.api.api_key_override, None);
    }

    #[test]
    fn default_path_sits_in_the_agent_home() {
        let _lock = env_lock();
        let _config = set_env_guard(ENV_CONFIG, None);
        let _home = set_env_guard("HOME", Some("/home/gardener"));

        assert_eq!(
            config_path().expect("home is set"),
            PathBuf::from("/home/gardener/.openclaw/tierlog.json")
        );
    }

    #[test]
    fn config_env_var_names_the_file() {
        let _lock = env_lock();
        let _config = set_env_guard(ENV_CONFIG, Some("/etc/tierlog/custom.json"));

        assert_eq!(
            config_path().expect("env path"),
            PathBuf::from("/etc/tierlog/custom.json")
        );
    }

    #[test]
    fn reload_picks_up_changed_file() {
        let _lock = env_lock();
        let _key = set_env_guard(ENV_API_KEY, None);
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, json!({"compaction": {"short_term_keep": 2}}).to_string())
            .expect("config should be written");

        let mut source = ConfigSource::open(Some(path.clone())).expect("source opens");
        assert_eq!(source.current().compaction.short_term_keep, 2);
        assert!(!source.reload_if_changed().expect("unchanged reload"));

        fs::write(&path, json!({"compaction": {"short_term_keep": 7}}).to_string())
            .expect("config should be rewritten");
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .and_then(|file| file.set_modified(later))
            .expect("mtime should be set");

        assert!(source.reload_if_changed().expect("changed reload"));
        assert_eq!(source.current().compaction.short_term_keep, 7);
    }
}
