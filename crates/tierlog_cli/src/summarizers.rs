use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chat_api::url::DEFAULT_CHAT_URL;
use chat_api::{endpoint_for_provider, normalize_chat_url};
use summarizer::Summarizer;
use summarizer_chat_api::{ChatApiSummarizer, ChatSummarizerConfig};
use summarizer_mock::ScriptedSummarizer;
use tierlog::config::ENV_API_KEY;
use tierlog::{ApiConfig, ProviderKind};

pub const AVAILABLE_PROVIDERS: &str = "moonshot, kimicode, mock";

pub fn provider_kind_for_id(provider_id: &str) -> Result<ProviderKind> {
    match provider_id.trim().to_ascii_lowercase().as_str() {
        "moonshot" => Ok(ProviderKind::Moonshot),
        "kimicode" | "kimi-code" | "kimi_code" => Ok(ProviderKind::KimiCode),
        "mock" => Ok(ProviderKind::Mock),
        unknown => bail!(
            "Unsupported provider '{unknown}'. Available providers: {AVAILABLE_PROVIDERS}"
        ),
    }
}

/// Builds the summarizer selected by `api`, or by `provider_override` when given.
pub fn summarizer_for_config(
    api: &ApiConfig,
    provider_override: Option<&str>,
) -> Result<Arc<dyn Summarizer>> {
    let provider = match provider_override {
        Some(id) => provider_kind_for_id(id)?,
        None => api.provider,
    };

    match provider {
        ProviderKind::Mock => Ok(Arc::new(ScriptedSummarizer::default())),
        ProviderKind::Moonshot | ProviderKind::KimiCode => {
            let api_key = api
                .api_key()
                .context("Failed to read the configured API key")?
                .ok_or_else(|| {
                    anyhow!("No API key configured. Set {ENV_API_KEY} or api.api_key_encoded")
                })?;
            let endpoint = match api.api_url.as_deref().filter(|url| !url.trim().is_empty()) {
                Some(url) => normalize_chat_url(url),
                None => endpoint_for_provider(provider.as_str())
                    .unwrap_or(DEFAULT_CHAT_URL)
                    .to_string(),
            };

            let mut config =
                ChatSummarizerConfig::new(provider.as_str(), api_key, endpoint, api.model.clone())
                    .with_timeout(api.timeout())
                    .with_max_tokens(api.max_tokens)
                    .with_max_retries(api.max_retries);
            for (key, value) in &api.extra_headers {
                config = config.insert_header(key.clone(), value.clone());
            }

            let summarizer = ChatApiSummarizer::new(config)
                .with_context(|| format!("Failed to set up the {} summarizer", provider.as_str()))?;
            Ok(Arc::new(summarizer))
        }
    }
}
