//! Advisory checks run before an automatic compaction.

use session_store::{parse_timestamp, LogView, Role};
use time::{Duration, OffsetDateTime};

use crate::config::{CompactionConfig, TierIds};
use crate::error::PreconditionError;

/// Trailing lines inspected for an in-flight assistant response.
pub const GENERATION_LOOKBACK_LINES: usize = 10;
pub const GENERATION_QUIET_PERIOD: Duration = Duration::seconds(10);

/// True when one of the last lines is a non-external assistant message
/// stamped less than [`GENERATION_QUIET_PERIOD`] before `now`.
#[must_use]
pub fn is_assistant_generating(view: &LogView, ids: &TierIds, now: OffsetDateTime) -> bool {
    let start = view.len().saturating_sub(GENERATION_LOOKBACK_LINES);
    view.messages()
        .rev()
        .take_while(|(index, _)| *index >= start)
        .filter(|(_, message)| message.role() == Role::Assistant && !ids.is_external(&message.id))
        .filter_map(|(_, message)| parse_timestamp(&message.timestamp))
        .any(|at| now - at < GENERATION_QUIET_PERIOD)
}

/// Both the token count and the dialogue message count must reach their
/// minimums.
pub fn check_thresholds(
    tokens: u64,
    dialogue_messages: usize,
    config: &CompactionConfig,
) -> Result<(), PreconditionError> {
    if tokens >= config.min_token_count && dialogue_messages >= config.min_message_count {
        return Ok(());
    }
    Err(PreconditionError::ThresholdsUnmet {
        tokens,
        min_tokens: config.min_token_count,
        messages: dialogue_messages,
        min_messages: config.min_message_count,
    })
}

/// Gate for scheduled compactions: no response in flight, thresholds met.
pub fn check_auto_compaction(
    view: &LogView,
    tokens: u64,
    dialogue_messages: usize,
    config: &CompactionConfig,
    ids: &TierIds,
    now: OffsetDateTime,
) -> Result<(), PreconditionError> {
    if is_assistant_generating(view, ids, now) {
        return Err(PreconditionError::AssistantGenerating);
    }
    check_thresholds(tokens, dialogue_messages, config)
}
