//! Collapsing a session log into the tiered memory shape.
//!
//! A compaction runs in three steps so the network call never happens while
//! the log is being rewritten:
//!
//! 1. [`plan_compaction`] reads a [`MemorySnapshot`] and produces the prompts.
//! 2. [`CompactionPlan::summarize`] calls the summarizer, off the foreground.
//! 3. [`rebuild_log`] turns the current lines plus the [`TierTexts`] into the
//!    new log: the retained prefix, then marker, long-term, mid-term, the most
//!    recent dialogue records and an optional annotation.
//!
//! The prefix ends at the existing marker when there is one, otherwise at the
//! first user message. Rebuilding a compacted log therefore replaces its tier
//! chain in place instead of growing a second one.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use session_store::{
    encode_message, format_timestamp, LogView, MessageRecord, Role, SessionStoreError,
};
use summarizer::{CancelSignal, Summarizer};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::config::{CompactionConfig, TierIds};
use crate::error::{PreconditionError, TierlogError};
use crate::scan::{truncate_chars, MemorySnapshot};

/// `summary` value that identifies the compact marker.
pub const MARKER_SUMMARY: &str = "AI总结占位";
pub const MARKER_TEXT: &str = "===COMPACT===\nsummary: AI总结占位";
/// Substrings that identify markers written before the `summary` field existed.
pub const LEGACY_MARKERS: [&str; 2] = ["summary: AI总结占位", "===COMPACT==="];

pub const NO_LONG_TERM: &str = "(no long-term memory)";
pub const NO_MID_TERM: &str = "(no mid-term memory)";

/// Characters of each existing tier quoted in an annotation prompt.
const ANNOTATION_EXCERPT_CHARS: usize = 1000;
const RECENT_HEADING: &str = "[Recent conversation]";

#[must_use]
pub fn is_compact_marker(message: &MessageRecord) -> bool {
    if message.summary.as_deref() == Some(MARKER_SUMMARY) {
        return true;
    }
    message
        .texts()
        .any(|text| LEGACY_MARKERS.iter().any(|marker| text.contains(marker)))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionMode {
    /// Summarize fresh long-term and mid-term texts.
    #[default]
    LongTerm,
    /// Keep the long-term text, summarize a fresh mid-term text.
    MidTerm,
    /// Leave the log alone.
    ShortTerm,
    /// Keep both tiers and append a commentary record.
    Annotation,
}

impl CompactionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LongTerm => "long_term",
            Self::MidTerm => "mid_term",
            Self::ShortTerm => "short_term",
            Self::Annotation => "annotation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryTarget {
    LongTerm,
    MidTerm,
    Annotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRequest {
    pub target: SummaryTarget,
    pub prompt: String,
}

/// Everything a worker needs to produce the tier texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionPlan {
    pub mode: CompactionMode,
    pub requests: Vec<SummaryRequest>,
    carried_long_term: Option<String>,
    carried_mid_term: Option<String>,
}

/// Text of the generated tier records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTexts {
    pub long_term: String,
    pub mid_term: String,
    pub annotation: Option<String>,
}

impl TierTexts {
    #[must_use]
    pub fn new(long_term: impl Into<String>, mid_term: impl Into<String>) -> Self {
        Self {
            long_term: long_term.into(),
            mid_term: mid_term.into(),
            annotation: None,
        }
    }

    #[must_use]
    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }
}

/// Builds the prompts for `config.mode` from `snapshot`.
pub fn plan_compaction(
    snapshot: &MemorySnapshot,
    config: &CompactionConfig,
) -> Result<CompactionPlan, PreconditionError> {
    if config.mode == CompactionMode::ShortTerm {
        return Err(PreconditionError::ShortTermOnlyMode);
    }

    let snippets = snapshot.snippets(config.min_snippet_chars, config.max_snippet_chars);
    if snippets.is_empty() {
        return Err(PreconditionError::NoShortTermContent);
    }

    let existing_long = snapshot
        .long_term
        .as_ref()
        .map(|record| record.text().to_string())
        .filter(|text| !text.is_empty());
    let existing_mid = snapshot
        .mid_term
        .as_ref()
        .map(|record| record.text().to_string())
        .filter(|text| !text.is_empty());

    let recent_prompt = |window: usize| {
        format!(
            "{}\n\n{RECENT_HEADING}\n\n{}",
            config.compression_prompt,
            last(&snippets, window).join("\n\n")
        )
    };

    let plan = match config.mode {
        CompactionMode::LongTerm => CompactionPlan {
            mode: config.mode,
            requests: vec![
                SummaryRequest {
                    target: SummaryTarget::LongTerm,
                    prompt: recent_prompt(config.long_history_window),
                },
                SummaryRequest {
                    target: SummaryTarget::MidTerm,
                    prompt: recent_prompt(config.mid_history_window),
                },
            ],
            carried_long_term: None,
            carried_mid_term: None,
        },
        CompactionMode::MidTerm => CompactionPlan {
            mode: config.mode,
            requests: vec![SummaryRequest {
                target: SummaryTarget::MidTerm,
                prompt: recent_prompt(config.mid_history_window),
            }],
            carried_long_term: Some(existing_long.unwrap_or_else(|| NO_LONG_TERM.to_string())),
            carried_mid_term: None,
        },
        CompactionMode::Annotation => {
            let mut sections = Vec::new();
            let excerpts = [
                ("[Persona]", snapshot.persona.as_ref().map(|r| r.text())),
                ("[Previous long-term memory]", existing_long.as_deref()),
                ("[Previous mid-term memory]", existing_mid.as_deref()),
            ];
            for (heading, text) in excerpts {
                if let Some(text) = text.filter(|text| !text.is_empty()) {
                    sections.push(format!(
                        "{heading} {}",
                        truncate_chars(text, ANNOTATION_EXCERPT_CHARS)
                    ));
                }
            }
            sections.push(RECENT_HEADING.to_string());
            sections.extend(last(&snippets, config.annotation_history_window).iter().cloned());

            CompactionPlan {
                mode: config.mode,
                requests: vec![SummaryRequest {
                    target: SummaryTarget::Annotation,
                    prompt: format!("{}\n\n{}", config.annotation_prompt, sections.join("\n\n")),
                }],
                carried_long_term: Some(existing_long.unwrap_or_else(|| NO_LONG_TERM.to_string())),
                carried_mid_term: Some(existing_mid.unwrap_or_else(|| NO_MID_TERM.to_string())),
            }
        }
        CompactionMode::ShortTerm => return Err(PreconditionError::ShortTermOnlyMode),
    };

    Ok(plan)
}

impl CompactionPlan {
    /// Runs every request in order. Stops at the first failure; no partial
    /// result is returned.
    pub fn summarize(
        &self,
        summarizer: &dyn Summarizer,
        cancel: &CancelSignal,
    ) -> Result<TierTexts, TierlogError> {
        let mut long_term = self.carried_long_term.clone();
        let mut mid_term = self.carried_mid_term.clone();
        let mut annotation = None;

        for request in &self.requests {
            debug!(target_tier = ?request.target, "summarizing tier");
            let text = summarizer.summarize(&request.prompt, cancel)?;
            let text = text.trim();
            if text.is_empty() {
                return Err(PreconditionError::NoSummaryText.into());
            }
            let slot = match request.target {
                SummaryTarget::LongTerm => &mut long_term,
                SummaryTarget::MidTerm => &mut mid_term,
                SummaryTarget::Annotation => &mut annotation,
            };
            *slot = Some(text.to_string());
        }

        match (long_term, mid_term) {
            (Some(long_term), Some(mid_term)) => Ok(TierTexts {
                long_term,
                mid_term,
                annotation,
            }),
            _ => Err(PreconditionError::NoSummaryText.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionKind {
    First,
    Subsequent,
}

/// New log content produced by [`rebuild_log`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuiltLog {
    pub kind: CompactionKind,
    pub lines: Vec<String>,
    /// Index of the marker line in `lines`.
    pub marker_index: usize,
    pub marker_id: String,
    pub kept_short_terms: usize,
    /// Prefix lines left out because they held a reserved tier id.
    pub dropped_stale: usize,
}

/// Rebuilds the log around `texts`. Pure: the caller backs up and writes.
pub fn rebuild_log(
    view: &LogView,
    texts: &TierTexts,
    ids: &TierIds,
    short_term_keep: usize,
    now: OffsetDateTime,
) -> Result<RebuiltLog, TierlogError> {
    let marker = view
        .messages()
        .find(|(_, message)| is_compact_marker(message))
        .map(|(index, _)| index);
    let (kind, cut) = match marker {
        Some(index) => (CompactionKind::Subsequent, index),
        None => {
            let first_user = view
                .messages()
                .find(|(_, message)| message.role() == Role::User)
                .map(|(index, _)| index)
                .ok_or(PreconditionError::NoUserMessage)?;
            (CompactionKind::First, first_user)
        }
    };

    let stale_ids = [&ids.compact, &ids.long_term, &ids.mid_term, &ids.annotation];
    let mut lines = Vec::with_capacity(cut + short_term_keep + 4);
    let mut last_retained_id: Option<String> = None;
    let mut persona_seen = false;
    let mut dropped_stale = 0;

    // Dropped id -> the parent its children are re-linked to.
    let mut relinked: HashMap<String, Option<String>> = HashMap::new();

    for entry in &view.entries()[..cut] {
        let Some(message) = entry.record.as_ref().and_then(|record| record.as_message()) else {
            lines.push(entry.raw.clone());
            continue;
        };

        let parent_id = match message.parent_id.as_ref() {
            Some(parent) => match relinked.get(parent) {
                Some(replacement) => replacement.clone(),
                None => Some(parent.clone()),
            },
            None => None,
        };

        let duplicate_persona = message.id == ids.persona && persona_seen;
        if duplicate_persona || stale_ids.iter().any(|id| **id == message.id) {
            warn!(
                line = entry.index + 1,
                id = %message.id,
                "dropping stale tier record from retained prefix"
            );
            if !duplicate_persona {
                relinked.insert(message.id.clone(), parent_id);
            }
            dropped_stale += 1;
            continue;
        }

        persona_seen |= message.id == ids.persona;
        last_retained_id = Some(message.id.clone());
        if parent_id == message.parent_id {
            lines.push(entry.raw.clone());
        } else {
            let mut message = message.clone();
            message.parent_id = parent_id;
            let line = encode_message(&message)
                .map_err(|source| SessionStoreError::json_serialize("<compaction>", source))?;
            lines.push(line);
        }
    }

    let timestamp = format_timestamp(now)?;
    let marker_id = if persona_seen {
        ids.compact.clone()
    } else {
        ids.persona.clone()
    };

    let mut chain = Vec::new();
    let mut marker_record = MessageRecord::text(
        marker_id.clone(),
        last_retained_id,
        timestamp.clone(),
        Role::Assistant,
        MARKER_TEXT,
    );
    marker_record.summary = Some(MARKER_SUMMARY.to_string());
    chain.push(marker_record);
    chain.push(MessageRecord::text(
        ids.long_term.clone(),
        Some(marker_id.clone()),
        timestamp.clone(),
        Role::Assistant,
        texts.long_term.clone(),
    ));
    chain.push(MessageRecord::text(
        ids.mid_term.clone(),
        Some(ids.long_term.clone()),
        timestamp.clone(),
        Role::Assistant,
        texts.mid_term.clone(),
    ));

    let kept = recent_dialogue(view, cut, ids, short_term_keep);
    let kept_short_terms = kept.len();
    let mut previous_id = ids.mid_term.clone();
    for mut record in kept {
        record.parent_id = Some(previous_id);
        previous_id = record.id.clone();
        chain.push(record);
    }

    if let Some(annotation) = texts.annotation.as_ref().filter(|text| !text.trim().is_empty()) {
        chain.push(MessageRecord::text(
            ids.annotation.clone(),
            Some(previous_id),
            timestamp,
            Role::Assistant,
            annotation.clone(),
        ));
    }

    let marker_index = lines.len();
    for record in &chain {
        let line = encode_message(record)
            .map_err(|source| SessionStoreError::json_serialize("<compaction>", source))?;
        lines.push(line);
    }

    Ok(RebuiltLog {
        kind,
        lines,
        marker_index,
        marker_id,
        kept_short_terms,
        dropped_stale,
    })
}

/// The last `keep` user/assistant records after `cut` whose ids are neither
/// external nor tier-reserved.
fn recent_dialogue(view: &LogView, cut: usize, ids: &TierIds, keep: usize) -> Vec<MessageRecord> {
    let mut seen = HashSet::new();
    let mut kept: Vec<MessageRecord> = view
        .messages()
        .rev()
        .take_while(|(index, _)| *index >= cut)
        .filter(|(_, message)| message.role().is_dialogue())
        .filter(|(_, message)| !ids.is_external(&message.id) && !ids.is_reserved(&message.id))
        .filter(|(_, message)| seen.insert(message.id.clone()))
        .take(keep)
        .map(|(_, message)| message.clone())
        .collect();
    kept.reverse();
    kept
}

fn last<T>(items: &[T], count: usize) -> &[T] {
    &items[items.len().saturating_sub(count)..]
}
