//! Text-length token estimate and the choice between it and the index total.

use session_store::{MessageRecord, Role};
use time::{Duration, OffsetDateTime};

/// Flat cost of one ingested external record, whatever its length.
pub const EXTERNAL_RECORD_TOKENS: u64 = 50;

/// How long after a compaction the estimate stays authoritative.
pub const COMPACTION_GRACE: Duration = Duration::seconds(30);

/// Character-count approximation of the tokens the log will cost.
///
/// Assistant records count the characters of every text part. External
/// `toolResult` records cost [`EXTERNAL_RECORD_TOKENS`] each. Everything else
/// is free.
pub fn estimate_tokens<'a, I>(messages: I, external_prefix: &str) -> u64
where
    I: IntoIterator<Item = &'a MessageRecord>,
{
    messages
        .into_iter()
        .map(|message| match message.role() {
            Role::ToolResult if message.id.starts_with(external_prefix) => EXTERNAL_RECORD_TOKENS,
            Role::Assistant => message
                .texts()
                .map(|text| text.chars().count() as u64)
                .sum(),
            _ => 0,
        })
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Estimate,
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveTokens {
    pub tokens: u64,
    pub source: TokenSource,
}

/// Tracks which token count to trust for one session.
///
/// Right after a compaction the index still reports the pre-compaction total,
/// so the estimate is used for [`COMPACTION_GRACE`]. Afterwards the first
/// changed non-zero index total is adopted and kept until the next compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenTracker {
    last_compaction: Option<OffsetDateTime>,
    index_total: u64,
    use_index: bool,
}

impl TokenTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_compacted(&mut self, at: OffsetDateTime) {
        self.last_compaction = Some(at);
        self.use_index = false;
    }

    #[must_use]
    pub fn last_compaction(&self) -> Option<OffsetDateTime> {
        self.last_compaction
    }

    pub fn effective(
        &mut self,
        estimate: u64,
        index_total: Option<u64>,
        now: OffsetDateTime,
    ) -> EffectiveTokens {
        let in_grace = self
            .last_compaction
            .is_some_and(|at| now - at < COMPACTION_GRACE);
        if in_grace {
            self.use_index = false;
            return EffectiveTokens {
                tokens: estimate,
                source: TokenSource::Estimate,
            };
        }

        if let Some(total) = index_total.filter(|total| *total > 0) {
            if total != self.index_total {
                self.index_total = total;
                self.use_index = true;
            }
        }

        if self.use_index && self.index_total > 0 {
            EffectiveTokens {
                tokens: self.index_total,
                source: TokenSource::Index,
            }
        } else {
            EffectiveTokens {
                tokens: estimate,
                source: TokenSource::Estimate,
            }
        }
    }
}
