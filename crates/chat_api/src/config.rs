use std::collections::BTreeMap;
use std::time::Duration;

use crate::retry::DEFAULT_MAX_RETRIES;
use crate::url::DEFAULT_CHAT_URL;

pub const DEFAULT_MODEL: &str = "kimi-k2.5";
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport configuration for chat completion requests.
#[derive(Debug, Clone)]
pub struct ChatApiConfig {
    /// Bearer token passed to `Authorization`.
    pub api_key: String,
    /// Endpoint or base URL; normalized before use.
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Explicit sampling temperature. `None` picks a per-model default.
    pub temperature: Option<f64>,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
}

impl Default for ChatApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_CHAT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            user_agent: None,
            extra_headers: BTreeMap::new(),
            timeout: Some(DEFAULT_TIMEOUT),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ChatApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.extra_headers.extend(headers);
        self
    }

    pub fn effective_temperature(&self) -> f64 {
        self.temperature
            .unwrap_or_else(|| default_temperature(&self.model))
    }
}

/// k2.5 models only accept temperature 1.0; everything else summarizes at 0.3.
pub fn default_temperature(model: &str) -> f64 {
    if model.to_ascii_lowercase().contains("k2.5") {
        1.0
    } else {
        0.3
    }
}
