//! One session log with its cached lines.
//!
//! [`SessionHandle`] is the single source of truth for displays: it owns the
//! line cache and an epoch that moves whenever the cache is replaced. Every
//! mutation re-reads the file first, backs it up when the change is
//! destructive, and writes the whole file atomically.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use session_store::{
    append_records, delete_first, delete_last, delete_lines, format_timestamp, truncate,
    BackupManager, LogView, MessageRecord, Role, SessionIndex, SessionLog, SessionStoreError,
    TokenClamp, TOKENS_PER_LINE_ESTIMATE,
};
use summarizer::{CancelSignal, Summarizer};
use time::OffsetDateTime;
use tracing::info;

use crate::compaction::{plan_compaction, rebuild_log, CompactionKind, CompactionPlan, TierTexts};
use crate::config::{CompactionConfig, TierIds};
use crate::error::TierlogError;
use crate::estimate::{estimate_tokens, EffectiveTokens, TokenTracker};
use crate::gate::check_auto_compaction;
use crate::ingest::{BatchRules, IngestTracker};
use crate::scan::{scan, LogStats, MemorySnapshot};

/// Outcome of a destructive line edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditReport {
    pub backup: PathBuf,
    pub lines_before: usize,
    pub lines_after: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub new_lines: usize,
    pub record_ids: Vec<String>,
    pub lines_after: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    pub kind: CompactionKind,
    pub backup: PathBuf,
    pub lines_before: usize,
    pub lines_after: usize,
    pub kept_short_terms: usize,
    pub clamp: Option<TokenClamp>,
}

/// One entry of the history listing.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// 1-based line number.
    pub line: usize,
    pub record: MessageRecord,
}

pub struct SessionHandle {
    log: SessionLog,
    backups: BackupManager,
    index: Option<Arc<dyn SessionIndex + Send + Sync>>,
    lines: Vec<String>,
    epoch: u64,
    tokens: TokenTracker,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("path", &self.log.path())
            .field("lines", &self.lines.len())
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn open(log: SessionLog, backups: BackupManager) -> Result<Self, SessionStoreError> {
        let lines = log.read_lines()?;
        Ok(Self {
            log,
            backups,
            index: None,
            lines,
            epoch: 0,
            tokens: TokenTracker::new(),
        })
    }

    #[must_use]
    pub fn with_index(mut self, index: Arc<dyn SessionIndex + Send + Sync>) -> Self {
        self.index = Some(index);
        self
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        self.log.session_id()
    }

    #[must_use]
    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Moves every time the cached lines are replaced.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn view(&self) -> LogView {
        LogView::parse(self.lines.iter().cloned())
    }

    /// Re-reads the file. Returns whether the content changed.
    pub fn refresh(&mut self) -> Result<bool, SessionStoreError> {
        let lines = self.log.read_lines()?;
        if lines == self.lines {
            return Ok(false);
        }
        self.replace_cache(lines);
        Ok(true)
    }

    fn replace_cache(&mut self, lines: Vec<String>) {
        self.lines = lines;
        self.epoch += 1;
    }

    #[must_use]
    pub fn snapshot(&self, ids: &TierIds) -> MemorySnapshot {
        scan(&self.view(), ids)
    }

    #[must_use]
    pub fn stats(&self, ids: &TierIds) -> LogStats {
        LogStats::collect(&self.view(), ids)
    }

    #[must_use]
    pub fn estimated_tokens(&self, ids: &TierIds) -> u64 {
        let view = self.view();
        estimate_tokens(view.messages().map(|(_, message)| message), &ids.external_prefix)
    }

    /// Estimate or index total, whichever is currently trustworthy.
    pub fn effective_tokens(
        &mut self,
        ids: &TierIds,
        now: OffsetDateTime,
    ) -> Result<EffectiveTokens, SessionStoreError> {
        let estimate = self.estimated_tokens(ids);
        let index_total = match &self.index {
            Some(index) => index
                .get(self.log.session_id())?
                .map(|summary| summary.total_tokens),
            None => None,
        };
        Ok(self.tokens.effective(estimate, index_total, now))
    }

    /// The last `limit` messages, newest last, optionally of one role.
    #[must_use]
    pub fn history(&self, limit: usize, role: Option<Role>) -> Vec<HistoryEntry> {
        let view = self.view();
        let mut entries: Vec<HistoryEntry> = view
            .messages()
            .rev()
            .filter(|(_, message)| role.map_or(true, |role| message.role() == role))
            .take(limit)
            .map(|(index, message)| HistoryEntry {
                line: index + 1,
                record: message.clone(),
            })
            .collect();
        entries.reverse();
        entries
    }

    pub fn backup(&self, now: OffsetDateTime) -> Result<PathBuf, SessionStoreError> {
        self.backups.backup(self.log.path(), self.log.session_id(), now)
    }

    /// Backs up, writes `lines`, and reloads the cache from disk.
    fn commit(
        &mut self,
        lines: &[String],
        now: OffsetDateTime,
        operation: &'static str,
    ) -> Result<EditReport, SessionStoreError> {
        let lines_before = self.lines.len();
        let backup = self.backup(now)?;
        let report = self.log.rewrite(lines)?;
        let written = self.log.read_lines()?;
        self.replace_cache(written);

        info!(
            session = self.log.session_id(),
            operation,
            lines_before,
            lines_after = report.written,
            "session log edited"
        );
        Ok(EditReport {
            backup,
            lines_before,
            lines_after: self.lines.len(),
        })
    }

    pub fn delete_lines(
        &mut self,
        line_numbers: &[usize],
        now: OffsetDateTime,
    ) -> Result<EditReport, SessionStoreError> {
        self.refresh()?;
        let lines = delete_lines(&self.lines, line_numbers)?;
        self.commit(&lines, now, "delete lines")
    }

    pub fn delete_first(
        &mut self,
        count: usize,
        short_term_keep: usize,
        now: OffsetDateTime,
    ) -> Result<EditReport, SessionStoreError> {
        self.refresh()?;
        let lines = delete_first(&self.view(), count, short_term_keep)?;
        self.commit(&lines, now, "delete first")
    }

    pub fn delete_last(
        &mut self,
        count: usize,
        now: OffsetDateTime,
    ) -> Result<EditReport, SessionStoreError> {
        self.refresh()?;
        let lines = delete_last(&self.lines, count)?;
        self.commit(&lines, now, "delete last")
    }

    /// Keeps the first `keep` lines. `None` when the log is already short
    /// enough; nothing is backed up or written then.
    pub fn truncate(
        &mut self,
        keep: usize,
        now: OffsetDateTime,
    ) -> Result<Option<EditReport>, SessionStoreError> {
        self.refresh()?;
        match truncate(&self.lines, keep)? {
            Some(lines) => self.commit(&lines, now, "truncate").map(Some),
            None => Ok(None),
        }
    }

    /// Appends `records`, linking the first to the last message in the log.
    pub fn append(&mut self, records: Vec<MessageRecord>) -> Result<usize, SessionStoreError> {
        self.refresh()?;
        let count = records.len();
        let lines = append_records(&self.view(), records)
            .map_err(|source| SessionStoreError::json_serialize(self.log.path(), source))?;
        self.log.rewrite(&lines)?;
        let written = self.log.read_lines()?;
        self.replace_cache(written);
        Ok(count)
    }

    /// Imports new lines of an external source's `content`.
    ///
    /// Allowed while a compaction is pending: the compaction is applied to
    /// the file as it is then, imported records included. `tracker` only
    /// marks the lines as seen once they are on disk.
    pub fn ingest(
        &mut self,
        tracker: &mut IngestTracker,
        content: &str,
        rules: &BatchRules,
        ids: &TierIds,
        now: OffsetDateTime,
    ) -> Result<Option<IngestReport>, SessionStoreError> {
        self.refresh()?;
        let taken: HashSet<String> = self
            .view()
            .messages()
            .map(|(_, message)| message.id.clone())
            .collect();
        let timestamp = format_timestamp(now)?;

        let Some(outcome) = tracker.pending(content, rules, ids, &taken, &timestamp) else {
            return Ok(None);
        };
        if outcome.records.is_empty() {
            tracker.commit(&outcome);
            return Ok(None);
        }

        let record_ids = outcome.records.iter().map(|record| record.id.clone()).collect();
        self.append(outcome.records.clone())?;
        tracker.commit(&outcome);
        info!(
            session = self.log.session_id(),
            new_lines = outcome.new_lines,
            "imported external lines"
        );
        Ok(Some(IngestReport {
            new_lines: outcome.new_lines,
            record_ids,
            lines_after: self.lines.len(),
        }))
    }

    /// Prompts for a compaction of the current content.
    pub fn prepare_compaction(
        &mut self,
        config: &CompactionConfig,
        ids: &TierIds,
    ) -> Result<CompactionPlan, TierlogError> {
        self.refresh()?;
        Ok(plan_compaction(&self.snapshot(ids), config)?)
    }

    /// Gate for scheduled compactions, using the effective token count.
    pub fn check_auto_compaction(
        &mut self,
        config: &CompactionConfig,
        ids: &TierIds,
        now: OffsetDateTime,
    ) -> Result<(), TierlogError> {
        self.refresh()?;
        let tokens = self.effective_tokens(ids, now)?.tokens;
        let dialogue = self.stats(ids).dialogue();
        Ok(check_auto_compaction(
            &self.view(),
            tokens,
            dialogue,
            config,
            ids,
            now,
        )?)
    }

    /// Rewrites the log around `texts`.
    ///
    /// The rebuild uses the file as it is now, so lines appended while the
    /// summary was produced are part of it. Backup comes first; a failed backup
    /// aborts before anything is written.
    pub fn apply_compaction(
        &mut self,
        texts: &TierTexts,
        short_term_keep: usize,
        ids: &TierIds,
        now: OffsetDateTime,
    ) -> Result<CompactionReport, TierlogError> {
        self.refresh()?;
        let rebuilt = rebuild_log(&self.view(), texts, ids, short_term_keep, now)?;
        let edit = self.commit(&rebuilt.lines, now, "compaction")?;
        self.tokens.mark_compacted(now);

        let clamp = match &self.index {
            Some(index) => {
                let estimate = edit.lines_after as u64 * TOKENS_PER_LINE_ESTIMATE;
                index.clamp_total_tokens(self.log.session_id(), estimate)?
            }
            None => None,
        };

        info!(
            session = self.log.session_id(),
            kind = ?rebuilt.kind,
            lines_before = edit.lines_before,
            lines_after = edit.lines_after,
            "compaction applied"
        );
        Ok(CompactionReport {
            kind: rebuilt.kind,
            backup: edit.backup,
            lines_before: edit.lines_before,
            lines_after: edit.lines_after,
            kept_short_terms: rebuilt.kept_short_terms,
            clamp,
        })
    }

    /// Plans, summarizes and applies on the calling thread.
    pub fn compact_now(
        &mut self,
        summarizer: &dyn Summarizer,
        cancel: &CancelSignal,
        config: &CompactionConfig,
        ids: &TierIds,
        now: OffsetDateTime,
    ) -> Result<CompactionReport, TierlogError> {
        let plan = self.prepare_compaction(config, ids)?;
        let texts = plan.summarize(summarizer, cancel)?;
        self.apply_compaction(&texts, config.short_term_keep, ids, now)
    }
}
