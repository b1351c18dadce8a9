//! Provider-neutral contract for turning a prompt into summary text.
//!
//! Transport details live in adapter crates. Implementations must not retry
//! on their own initiative unless configured to; callers decide when to
//! trigger another attempt.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for one summarization call.
pub type CancelSignal = Arc<AtomicBool>;

#[must_use]
pub fn new_cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

#[must_use]
pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::SeqCst)
}

/// Immutable metadata describing a summarizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarizerProfile {
    pub provider_id: String,
    pub model_id: String,
}

/// Failure of one summarization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummarizeError {
    /// The summarizer could not be constructed or configured.
    Init(String),
    Network(String),
    Timeout { after_secs: u64 },
    Status { status: u16, body: String },
    MalformedResponse(String),
    Cancelled,
}

impl SummarizeError {
    #[must_use]
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init(message.into())
    }
}

impl fmt::Display for SummarizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(message) => write!(f, "summarizer unavailable: {message}"),
            Self::Network(message) => write!(f, "summarization request failed: {message}"),
            Self::Timeout { after_secs } => {
                write!(f, "summarization timed out after {after_secs}s")
            }
            Self::Status { status, body } => {
                write!(f, "summarization endpoint returned status {status}: {body}")
            }
            Self::MalformedResponse(message) => {
                write!(f, "summarization response was malformed: {message}")
            }
            Self::Cancelled => f.write_str("summarization was cancelled"),
        }
    }
}

impl std::error::Error for SummarizeError {}

/// Produces summary text for a prompt.
pub trait Summarizer: Send + Sync + 'static {
    fn profile(&self) -> SummarizerProfile;

    /// Runs one summarization. Blocks the calling thread; callers run it off
    /// their event loop. Should return [`SummarizeError::Cancelled`] promptly
    /// once `cancel` is set.
    fn summarize(&self, prompt: &str, cancel: &CancelSignal) -> Result<String, SummarizeError>;
}

impl<T: Summarizer + ?Sized> Summarizer for Arc<T> {
    fn profile(&self) -> SummarizerProfile {
        (**self).profile()
    }

    fn summarize(&self, prompt: &str, cancel: &CancelSignal) -> Result<String, SummarizeError> {
        (**self).summarize(prompt, cancel)
    }
}
