//! Transport-only client for OpenAI-compatible `chat/completions` endpoints.
//!
//! Covers request building, header assembly, error normalization and an
//! opt-in retry policy. Callers own prompt construction and decide what a
//! reply means.

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod url;

pub use client::{CancellationSignal, ChatApiClient};
pub use config::ChatApiConfig;
pub use error::ChatApiError;
pub use payload::{ChatMessage, ChatRequest, ChatResponse, NO_REPLY_TEXT};
pub use reqwest::StatusCode;
pub use url::{endpoint_for_provider, normalize_chat_url};
