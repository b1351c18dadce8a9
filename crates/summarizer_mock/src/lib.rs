//! Deterministic summarizer for tests and offline runs.
//!
//! Replies are scripted up front and handed out in order; every prompt is
//! recorded so tests can assert on what was asked.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use summarizer::{is_cancelled, CancelSignal, SummarizeError, Summarizer, SummarizerProfile};

/// Stable provider identifier used for explicit selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Result<String, SummarizeError>>,
    prompts: Vec<String>,
}

#[derive(Debug)]
pub struct ScriptedSummarizer {
    script: Mutex<Script>,
    fallback: Option<String>,
    delay: Duration,
}

impl ScriptedSummarizer {
    /// Replies in order; once exhausted, calls fail with a malformed-response error.
    #[must_use]
    pub fn new(replies: Vec<Result<String, SummarizeError>>) -> Self {
        Self {
            script: Mutex::new(Script {
                replies: replies.into(),
                prompts: Vec::new(),
            }),
            fallback: None,
            delay: Duration::ZERO,
        }
    }

    /// Always replies with `text` once scripted replies run out.
    #[must_use]
    pub fn repeating(text: impl Into<String>) -> Self {
        Self::new(Vec::new()).with_fallback(text)
    }

    #[must_use]
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// Sleeps before answering, checking `cancel` on wake.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        lock_unpoisoned(&self.script).prompts.clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        lock_unpoisoned(&self.script).prompts.len()
    }
}

impl Default for ScriptedSummarizer {
    fn default() -> Self {
        Self::repeating("(mock summary)")
    }
}

impl Summarizer for ScriptedSummarizer {
    fn profile(&self) -> SummarizerProfile {
        SummarizerProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: "scripted".to_string(),
        }
    }

    fn summarize(&self, prompt: &str, cancel: &CancelSignal) -> Result<String, SummarizeError> {
        let reply = {
            let mut script = lock_unpoisoned(&self.script);
            script.prompts.push(prompt.to_string());
            script.replies.pop_front()
        };

        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if is_cancelled(cancel) {
            return Err(SummarizeError::Cancelled);
        }

        match (reply, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(text)) => Ok(text.clone()),
            (None, None) => Err(SummarizeError::MalformedResponse(
                "no scripted reply left".to_string(),
            )),
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use summarizer::new_cancel_signal;

    use super::*;

    #[test]
    fn replies_are_handed_out_in_order_and_prompts_recorded() {
        let summarizer = ScriptedSummarizer::new(vec![
            Ok("first".to_string()),
            Err(SummarizeError::Timeout { after_secs: 1 }),
        ]);
        let cancel = new_cancel_signal();

        assert_eq!(summarizer.summarize("p1", &cancel).as_deref(), Ok("first"));
        assert_eq!(
            summarizer.summarize("p2", &cancel),
            Err(SummarizeError::Timeout { after_secs: 1 })
        );
        assert!(matches!(
            summarizer.summarize("p3", &cancel),
            Err(SummarizeError::MalformedResponse(_))
        ));
        assert_eq!(summarizer.prompts(), vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn fallback_repeats_after_script() {
        let summarizer =
            ScriptedSummarizer::new(vec![Ok("once".to_string())]).with_fallback("again");
        let cancel = new_cancel_signal();

        assert_eq!(summarizer.summarize("a", &cancel).as_deref(), Ok("once"));
        assert_eq!(summarizer.summarize("b", &cancel).as_deref(), Ok("again"));
        assert_eq!(summarizer.summarize("c", &cancel).as_deref(), Ok("again"));
        assert_eq!(summarizer.call_count(), 3);
    }

    #[test]
    fn cancelled_signal_wins_over_script() {
        let summarizer = ScriptedSummarizer::repeating("text");
        let cancel = new_cancel_signal();
        cancel.store(true, Ordering::SeqCst);

        assert_eq!(
            summarizer.summarize("a", &cancel),
            Err(SummarizeError::Cancelled)
        );
        assert_eq!(summarizer.profile().provider_id, MOCK_PROVIDER_ID);
    }
}
