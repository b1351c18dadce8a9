use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{error_value_message, ChatApiError};

/// Reply text used when a choice carries neither content nor reasoning.
pub const NO_REPLY_TEXT: &str = "(no reply)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request payload for `chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Default: false.
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    /// Single user-turn request.
    pub fn user_prompt(
        model: impl Into<String>,
        prompt: impl Into<String>,
        max_tokens: u32,
        temperature: f64,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::user(prompt)],
            max_tokens,
            temperature,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: ChatReplyMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatReplyMessage {
    #[serde(default)]
    pub content: Option<String>,
    /// Thinking models may answer only here.
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

impl ChatResponse {
    /// Text of the first choice: `content`, else `reasoning_content`, else
    /// [`NO_REPLY_TEXT`].
    pub fn reply_text(&self) -> Result<String, ChatApiError> {
        if let Some(error) = self.error.as_ref().filter(|value| !value.is_null()) {
            let message = error_value_message(error).unwrap_or_else(|| error.to_string());
            return Err(ChatApiError::ApiError(message));
        }

        let choice = self.choices.first().ok_or(ChatApiError::EmptyChoices)?;
        let text = [
            choice.message.content.as_deref(),
            choice.message.reasoning_content.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|text| !text.trim().is_empty())
        .unwrap_or(NO_REPLY_TEXT);

        Ok(text.to_string())
    }
}
