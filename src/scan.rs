//! Tier classification of a session log.
//!
//! [`scan`] is a pure function of the log content. It is cheap enough to run
//! on every display refresh and is never cached.

use session_store::{LogView, MessageRecord, Role};

use crate::compaction::is_compact_marker;
use crate::config::TierIds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Persona,
    LongTerm,
    MidTerm,
    ShortTerm,
    CompactMarker,
    /// Message with an ordinary id. Grouped with the short-term records.
    Other,
}

/// Tier of one message record.
///
/// The compact marker is recognized by content before any id rule applies,
/// since it may carry the persona id.
#[must_use]
pub fn classify(message: &MessageRecord, ids: &TierIds) -> Tier {
    let id = message.id.as_str();
    if is_compact_marker(message) {
        Tier::CompactMarker
    } else if id == ids.persona {
        Tier::Persona
    } else if id == ids.long_term {
        Tier::LongTerm
    } else if id == ids.mid_term {
        Tier::MidTerm
    } else if id.starts_with(&ids.short_term_prefix) {
        Tier::ShortTerm
    } else {
        Tier::Other
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRecord {
    /// 0-based physical line index.
    pub index: usize,
    pub record: MessageRecord,
}

impl ScannedRecord {
    #[must_use]
    pub fn text(&self) -> &str {
        self.record.first_text().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySnapshot {
    pub persona: Option<ScannedRecord>,
    pub long_term: Option<ScannedRecord>,
    pub mid_term: Option<ScannedRecord>,
    /// Short-term and ordinary messages in physical order.
    pub short_terms: Vec<ScannedRecord>,
    /// First compact marker, if any.
    pub compact_marker: Option<usize>,
}

impl MemorySnapshot {
    #[must_use]
    pub fn is_compacted(&self) -> bool {
        self.compact_marker.is_some()
    }

    /// Prompt material from the short-term records: the first text part of
    /// each, when longer than `min_chars`, cut to `max_chars`.
    #[must_use]
    pub fn snippets(&self, min_chars: usize, max_chars: usize) -> Vec<String> {
        self.short_terms
            .iter()
            .map(ScannedRecord::text)
            .filter(|text| text.chars().count() > min_chars)
            .map(|text| truncate_chars(text, max_chars))
            .collect()
    }
}

/// Classifies every message of `view`. Undecodable and non-message lines are
/// ignored.
#[must_use]
pub fn scan(view: &LogView, ids: &TierIds) -> MemorySnapshot {
    let mut snapshot = MemorySnapshot::default();

    for (index, message) in view.messages() {
        let scanned = ScannedRecord {
            index,
            record: message.clone(),
        };
        match classify(message, ids) {
            Tier::CompactMarker => {
                snapshot.compact_marker.get_or_insert(index);
            }
            Tier::Persona => snapshot.persona = Some(scanned),
            Tier::LongTerm => snapshot.long_term = Some(scanned),
            Tier::MidTerm => snapshot.mid_term = Some(scanned),
            Tier::ShortTerm | Tier::Other => snapshot.short_terms.push(scanned),
        }
    }

    snapshot
}

/// Record counts shown next to the token numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    pub lines: usize,
    pub skipped: usize,
    pub messages: usize,
    pub user: usize,
    pub assistant: usize,
    pub tool_results: usize,
    pub external: usize,
}

impl LogStats {
    #[must_use]
    pub fn collect(view: &LogView, ids: &TierIds) -> Self {
        let mut stats = Self {
            lines: view.len(),
            skipped: view.skipped().len(),
            ..Self::default()
        };
        for (_, message) in view.messages() {
            stats.messages += 1;
            match message.role() {
                Role::User => stats.user += 1,
                Role::Assistant => stats.assistant += 1,
                Role::ToolResult => stats.tool_results += 1,
                Role::System => {}
            }
            if ids.is_external(&message.id) {
                stats.external += 1;
            }
        }
        stats
    }

    /// User plus assistant messages, the count compaction thresholds use.
    #[must_use]
    pub fn dialogue(&self) -> usize {
        self.user + self.assistant
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
