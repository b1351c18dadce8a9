//! Chat-completions-backed implementation of the `summarizer` contract.
//!
//! Each call blocks on a private current-thread runtime, so callers can run
//! it from a plain worker thread.

use std::sync::Arc;
use std::time::Duration;

use chat_api::{ChatApiClient, ChatApiConfig, ChatApiError};
use summarizer::{is_cancelled, CancelSignal, SummarizeError, Summarizer, SummarizerProfile};
use tracing::debug;

/// Timeout reported when the transport fails without a configured one.
const FALLBACK_TIMEOUT_SECS: u64 = 60;

/// Runtime configuration for the chat API summarizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSummarizerConfig {
    /// Reported in the profile, e.g. `moonshot` or `kimicode`.
    pub provider_id: String,
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub timeout: Option<Duration>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub max_retries: u32,
    pub extra_headers: Vec<(String, String)>,
}

impl ChatSummarizerConfig {
    #[must_use]
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            api_key: api_key.into(),
            model: model.into(),
            endpoint: endpoint.into(),
            timeout: None,
            max_tokens: None,
            temperature: None,
            max_retries: 0,
            extra_headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((key.into(), value.into()));
        self
    }

    fn into_chat_api_config(self) -> ChatApiConfig {
        let mut config = ChatApiConfig::new(self.api_key)
            .with_base_url(self.endpoint)
            .with_model(self.model)
            .with_max_retries(self.max_retries)
            .with_headers(self.extra_headers);

        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        if let Some(max_tokens) = self.max_tokens {
            config = config.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            config = config.with_temperature(temperature);
        }

        config
    }
}

trait CompletionClient: Send + Sync {
    fn complete(&self, prompt: &str, cancel: &CancelSignal) -> Result<String, ChatApiError>;
}

#[derive(Debug)]
struct DefaultCompletionClient {
    client: ChatApiClient,
}

impl CompletionClient for DefaultCompletionClient {
    fn complete(&self, prompt: &str, cancel: &CancelSignal) -> Result<String, ChatApiError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                ChatApiError::Runtime(format!("failed to initialize tokio runtime: {error}"))
            })?;

        runtime.block_on(self.client.complete_prompt(prompt, Some(cancel)))
    }
}

/// `Summarizer` adapter backed by `chat_api` transport primitives.
pub struct ChatApiSummarizer {
    provider_id: String,
    model_id: String,
    timeout_secs: u64,
    client: Arc<dyn CompletionClient>,
}

impl ChatApiSummarizer {
    /// Creates a summarizer using real HTTP transport.
    pub fn new(config: ChatSummarizerConfig) -> Result<Self, SummarizeError> {
        let provider_id = config.provider_id.clone();
        let model_id = config.model.clone();
        let chat_config = config.into_chat_api_config();
        let timeout_secs = timeout_secs(chat_config.timeout);
        let client = ChatApiClient::new(chat_config).map_err(map_init_error)?;

        Ok(Self {
            provider_id,
            model_id,
            timeout_secs,
            client: Arc::new(DefaultCompletionClient { client }),
        })
    }

    #[cfg(test)]
    fn with_client_for_tests(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            provider_id: "test".to_string(),
            model_id: "test-model".to_string(),
            timeout_secs: 7,
            client,
        }
    }

    fn map_error(&self, error: ChatApiError) -> SummarizeError {
        if error.is_timeout() {
            return SummarizeError::Timeout {
                after_secs: self.timeout_secs,
            };
        }

        match error {
            ChatApiError::Cancelled => SummarizeError::Cancelled,
            ChatApiError::Status(status, message) => SummarizeError::Status {
                status: status.as_u16(),
                body: message,
            },
            ChatApiError::ApiError(message) => {
                SummarizeError::MalformedResponse(format!("API error: {message}"))
            }
            error @ (ChatApiError::EmptyChoices | ChatApiError::Serde(_)) => {
                SummarizeError::MalformedResponse(error.to_string())
            }
            error @ (ChatApiError::MissingApiKey
            | ChatApiError::InvalidBaseUrl(_)
            | ChatApiError::InvalidHeader(_)) => SummarizeError::Init(error.to_string()),
            error @ (ChatApiError::Request(_)
            | ChatApiError::RetryExhausted { .. }
            | ChatApiError::Runtime(_)) => SummarizeError::Network(error.to_string()),
        }
    }
}

impl Summarizer for ChatApiSummarizer {
    fn profile(&self) -> SummarizerProfile {
        SummarizerProfile {
            provider_id: self.provider_id.clone(),
            model_id: self.model_id.clone(),
        }
    }

    fn summarize(&self, prompt: &str, cancel: &CancelSignal) -> Result<String, SummarizeError> {
        if is_cancelled(cancel) {
            return Err(SummarizeError::Cancelled);
        }

        debug!(
            provider = %self.provider_id,
            model = %self.model_id,
            prompt_chars = prompt.chars().count(),
            "requesting summary"
        );
        self.client
            .complete(prompt, cancel)
            .map_err(|error| self.map_error(error))
    }
}

fn timeout_secs(timeout: Option<Duration>) -> u64 {
    timeout.map_or(FALLBACK_TIMEOUT_SECS, |timeout| timeout.as_secs())
}

fn map_init_error(error: ChatApiError) -> SummarizeError {
    SummarizeError::init(format!("failed to initialize chat API summarizer: {error}"))
}
