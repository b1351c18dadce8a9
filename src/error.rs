use session_store::SessionStoreError;
use summarizer::SummarizeError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum TierlogError {
    #[error(transparent)]
    Store(#[from] SessionStoreError),

    #[error("compaction skipped: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("summarization failed: {0}")]
    Summarization(#[from] SummarizeError),

    #[error("a compaction is already pending for session {session}")]
    CompactionBusy { session: String },

    #[error("compaction worker for session {session} panicked")]
    WorkerPanicked { session: String },

    #[error("failed to spawn compaction worker for session {session}")]
    WorkerSpawn {
        session: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TierlogError {
    #[must_use]
    pub fn busy(session: impl Into<String>) -> Self {
        Self::CompactionBusy {
            session: session.into(),
        }
    }

    /// True for failures that leave the log untouched by construction.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }
}

/// A compaction was refused before anything was summarized or written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("no user message to anchor the first compaction")]
    NoUserMessage,

    #[error("no short-term content long enough to summarize")]
    NoShortTermContent,

    #[error("short-term mode keeps the log as is")]
    ShortTermOnlyMode,

    #[error(
        "thresholds unmet: {tokens}/{min_tokens} tokens, {messages}/{min_messages} messages"
    )]
    ThresholdsUnmet {
        tokens: u64,
        min_tokens: u64,
        messages: usize,
        min_messages: usize,
    },

    #[error("the assistant is still producing a response")]
    AssistantGenerating,

    #[error("summarizer returned no text")]
    NoSummaryText,
}
