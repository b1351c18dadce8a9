use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use url::Url;

use crate::config::ChatApiConfig;
use crate::error::{parse_error_message, ChatApiError};
use crate::headers::build_headers;
use crate::payload::{ChatRequest, ChatResponse};
use crate::retry::{is_retryable_http_error, retry_delay_ms};
use crate::url::normalize_chat_url;

/// Optional cancellation signal shared across the request loop.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct ChatApiClient {
    http: Client,
    config: ChatApiConfig,
    endpoint: Url,
}

impl ChatApiClient {
    pub fn new(config: ChatApiConfig) -> Result<Self, ChatApiError> {
        if config.api_key.trim().is_empty() {
            return Err(ChatApiError::MissingApiKey);
        }
        let endpoint_text = normalize_chat_url(&config.base_url);
        let endpoint = Url::parse(&endpoint_text)
            .map_err(|error| ChatApiError::InvalidBaseUrl(format!("{endpoint_text}: {error}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ChatApiError::InvalidBaseUrl(endpoint_text));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ChatApiError::from)?;
        Ok(Self {
            http,
            config,
            endpoint,
        })
    }

    pub fn config(&self) -> &ChatApiConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn build_headers(&self) -> Result<HeaderMap, ChatApiError> {
        let headers = build_headers(&self.config)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| ChatApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    ChatApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    /// Request carrying `prompt` as a single user message, with the
    /// configured model, token cap and temperature.
    pub fn prompt_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest::user_prompt(
            self.config.model.clone(),
            prompt,
            self.config.max_tokens,
            self.config.effective_temperature(),
        )
    }

    pub fn build_request(
        &self,
        request: &ChatRequest,
    ) -> Result<reqwest::RequestBuilder, ChatApiError> {
        if request.messages.is_empty() {
            return Err(ChatApiError::Runtime(
                "chat request needs at least one message".to_string(),
            ));
        }

        let headers = self.build_headers()?;
        let mut payload = request.clone();
        payload.stream = false;
        Ok(self
            .http
            .post(self.endpoint.clone())
            .headers(headers)
            .json(&payload))
    }

    pub async fn send_with_retry(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, ChatApiError> {
        let max_retries = self.config.max_retries;
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if is_cancelled(cancellation) {
                return Err(ChatApiError::Cancelled);
            }

            let response = self.build_request(request)?.send();
            let response = await_or_cancel(response, cancellation).await?;

            match response {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let status = response.status();
                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancellation)
                        .await?
                        .unwrap_or_else(|_| {
                            status
                                .canonical_reason()
                                .unwrap_or("request failed")
                                .to_string()
                        });
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < max_retries && is_retryable_http_error(status.as_u16(), &body) {
                        await_or_cancel(tokio::time::sleep(retry_delay_ms(attempt)), cancellation)
                            .await?;
                        continue;
                    }

                    return Err(ChatApiError::Status(status, message));
                }
                Err(error) if max_retries == 0 => return Err(ChatApiError::Request(error)),
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt < max_retries {
                        await_or_cancel(tokio::time::sleep(retry_delay_ms(attempt)), cancellation)
                            .await?;
                        continue;
                    }
                    return Err(ChatApiError::RetryExhausted {
                        status: last_status,
                        last_error,
                    });
                }
            }
        }

        Err(ChatApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    pub async fn complete(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<ChatResponse, ChatApiError> {
        let response = self.send_with_retry(request, cancellation).await?;
        let body = await_or_cancel(response.text(), cancellation)
            .await?
            .map_err(ChatApiError::from)?;
        serde_json::from_str::<ChatResponse>(&body).map_err(ChatApiError::from)
    }

    /// Sends `prompt` and returns the reply text.
    pub async fn complete_prompt(
        &self,
        prompt: &str,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<String, ChatApiError> {
        let request = self.prompt_request(prompt);
        self.complete(&request, cancellation).await?.reply_text()
    }
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, ChatApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(ChatApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(ChatApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}
