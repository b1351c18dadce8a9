use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::SessionStoreError;

/// Value of the `type` field for conversation records.
pub const MESSAGE_TYPE: &str = "message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
    System,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolResult => "toolResult",
            Self::System => "system",
        }
    }

    #[must_use]
    pub fn is_dialogue(self) -> bool {
        matches!(self, Self::User | Self::Assistant)
    }
}

/// One line of the session log.
///
/// `Other` keeps every non-message record as its raw JSON object so it can be
/// passed through untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Message(MessageRecord),
    Other(OtherRecord),
}

impl Record {
    #[must_use]
    pub fn as_message(&self) -> Option<&MessageRecord> {
        match self {
            Self::Message(message) => Some(message),
            Self::Other(_) => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Message(_) => MESSAGE_TYPE,
            Self::Other(other) => other.kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OtherRecord {
    pub(crate) fields: Map<String, Value>,
}

impl OtherRecord {
    #[must_use]
    pub fn kind(&self) -> &str {
        self.fields
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    pub message: MessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageRecord {
    /// Builds a message with a single text part.
    #[must_use]
    pub fn text(
        id: impl Into<String>,
        parent_id: Option<impl Into<String>>,
        timestamp: impl Into<String>,
        role: Role,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.map(Into::into),
            timestamp: timestamp.into(),
            message: MessageBody {
                role,
                content: vec![ContentPart::Text(TextPart::new(text))],
                extra: Map::new(),
            },
            summary: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.message.role
    }

    /// Text of the first `text` part, the way previews and prompts read a record.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.texts().next()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.message.content.iter().filter_map(|part| match part {
            ContentPart::Text(text) => Some(text.text.as_str()),
            ContentPart::Opaque(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A content part. Only `text` parts are interpreted; images, files and
/// anything else ride along as opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    Text(TextPart),
    Opaque(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextPartType {
    #[serde(rename = "text")]
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    #[serde(rename = "type")]
    pub part_type: TextPartType,
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TextPart {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            part_type: TextPartType::Text,
            text: text.into(),
            extra: Map::new(),
        }
    }
}

pub fn format_timestamp(at: OffsetDateTime) -> Result<String, SessionStoreError> {
    at.format(&Rfc3339).map_err(SessionStoreError::ClockFormat)
}

#[must_use]
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value.trim(), &Rfc3339).ok()
}
