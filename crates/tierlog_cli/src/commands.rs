//! One function per subcommand. Each returns the text to print so the
//! binary stays a thin dispatcher.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use session_store::{
    backup_dir, check_chain, index_path, session_path, BackupManager, JsonSessionIndex, Role,
    SessionIndex, SessionLog,
};
use summarizer::{new_cancel_signal, Summarizer};
use tierlog::{
    BatchRules, CompactionConfig, CompactionMode, EditReport, IngestTracker, ScannedRecord,
    SessionHandle, TierlogConfig, TokenSource,
};
use time::OffsetDateTime;

const PREVIEW_CHARS: usize = 80;

/// Where sessions live plus the configuration they are handled with.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub config: Arc<TierlogConfig>,
    root: PathBuf,
    index: Arc<JsonSessionIndex>,
}

impl Workspace {
    pub fn new(config: Arc<TierlogConfig>) -> Result<Self> {
        let root = config
            .sessions_root()
            .context("Failed to locate the sessions directory")?;
        Ok(Self::at(config, root))
    }

    #[must_use]
    pub fn at(config: Arc<TierlogConfig>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let index = Arc::new(JsonSessionIndex::new(index_path(&root)));
        Self {
            config,
            root,
            index,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Session id for `query`: exact log file name first, then the index
    /// lookup by id, prefix or substring.
    pub fn resolve(&self, query: &str) -> Result<String> {
        if session_path(&self.root, query).is_file() {
            return Ok(query.to_string());
        }
        let summary = self
            .index
            .resolve(query)
            .with_context(|| format!("No session matches '{query}'"))?;
        Ok(summary.session_id)
    }

    pub fn open(&self, query: &str) -> Result<SessionHandle> {
        let session_id = self.resolve(query)?;
        let log = SessionLog::locate(&self.root, &session_id)?;
        let handle = SessionHandle::open(log, BackupManager::new(backup_dir(&self.root)))
            .with_context(|| format!("Failed to read session {session_id}"))?;
        let index: Arc<dyn SessionIndex + Send + Sync> = self.index.clone();
        Ok(handle.with_index(index))
    }
}

pub fn cmd_list(workspace: &Workspace) -> Result<String> {
    let sessions = workspace
        .index
        .list()
        .context("Failed to read the session index")?;
    if sessions.is_empty() {
        return Ok(format!("No sessions in {}\n", workspace.root.display()));
    }

    let mut out = String::new();
    for session in sessions {
        let percent = if session.context_tokens == 0 {
            0.0
        } else {
            session.total_tokens as f64 * 100.0 / session.context_tokens as f64
        };
        writeln!(
            out,
            "{}  {:>8} / {:<8} ({percent:.1}%)  {}",
            session.session_id,
            session.total_tokens,
            session.context_tokens,
            session.model.as_deref().unwrap_or("-"),
        )?;
    }
    Ok(out)
}

pub fn cmd_show(workspace: &Workspace, query: &str, now: OffsetDateTime) -> Result<String> {
    let mut handle = workspace.open(query)?;
    let ids = &workspace.config.ids;
    let snapshot = handle.snapshot(ids);
    let stats = handle.stats(ids);
    let tokens = handle.effective_tokens(ids, now)?;

    let mut out = String::new();
    writeln!(out, "session    {}", handle.session_id())?;
    writeln!(
        out,
        "tokens     {} ({})",
        tokens.tokens,
        match tokens.source {
            TokenSource::Estimate => "estimate",
            TokenSource::Index => "index",
        }
    )?;
    writeln!(out, "persona    {}", tier_preview(snapshot.persona.as_ref()))?;
    writeln!(out, "long-term  {}", tier_preview(snapshot.long_term.as_ref()))?;
    writeln!(out, "mid-term   {}", tier_preview(snapshot.mid_term.as_ref()))?;
    writeln!(out, "short-term {} records", snapshot.short_terms.len())?;
    writeln!(
        out,
        "marker     {}",
        snapshot
            .compact_marker
            .map_or_else(|| "none".to_string(), |index| format!("line {}", index + 1))
    )?;
    writeln!(
        out,
        "lines      {} ({} skipped, {} external)",
        stats.lines, stats.skipped, stats.external
    )?;
    Ok(out)
}

pub fn cmd_history(
    workspace: &Workspace,
    query: &str,
    limit: usize,
    role: Option<Role>,
) -> Result<String> {
    let handle = workspace.open(query)?;
    let mut out = String::new();
    for entry in handle.history(limit, role) {
        let text = entry.record.first_text().unwrap_or_default();
        writeln!(
            out,
            "#{:<5} {:<10} {:<12} {}",
            entry.line,
            entry.record.role().as_str(),
            entry.record.id,
            preview(text)
        )?;
    }
    Ok(out)
}

pub fn cmd_stats(workspace: &Workspace, query: &str) -> Result<String> {
    let handle = workspace.open(query)?;
    let ids = &workspace.config.ids;
    let stats = handle.stats(ids);
    let view = handle.view();
    let chain = check_chain(&view);

    let mut out = String::new();
    writeln!(out, "lines        {}", stats.lines)?;
    writeln!(out, "messages     {}", stats.messages)?;
    writeln!(out, "user         {}", stats.user)?;
    writeln!(out, "assistant    {}", stats.assistant)?;
    writeln!(out, "tool results {}", stats.tool_results)?;
    writeln!(out, "external     {}", stats.external)?;
    writeln!(out, "estimate     {}", handle.estimated_tokens(ids))?;
    writeln!(out, "skipped      {}", stats.skipped)?;
    for skipped in view.skipped() {
        writeln!(out, "  line {}: {}", skipped.index + 1, skipped.reason)?;
    }
    if chain.is_consistent() {
        writeln!(out, "chain        ok")?;
    } else {
        writeln!(
            out,
            "chain        {} dangling, {} duplicate",
            chain.dangling.len(),
            chain.duplicates.len()
        )?;
    }
    Ok(out)
}

pub fn cmd_backup(workspace: &Workspace, query: &str, now: OffsetDateTime) -> Result<String> {
    let handle = workspace.open(query)?;
    let path = handle.backup(now)?;
    Ok(format!("Backed up {} to {}\n", handle.session_id(), path.display()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompactOptions {
    pub mode: Option<CompactionMode>,
    pub check: bool,
}

pub fn cmd_compact(
    workspace: &Workspace,
    query: &str,
    summarizer: &dyn Summarizer,
    options: CompactOptions,
    now: OffsetDateTime,
) -> Result<String> {
    let mut handle = workspace.open(query)?;
    let ids = &workspace.config.ids;
    let config = CompactionConfig {
        mode: options.mode.unwrap_or(workspace.config.compaction.mode),
        ..workspace.config.compaction.clone()
    };

    if options.check {
        handle.check_auto_compaction(&config, ids, now)?;
    }
    let report = handle.compact_now(summarizer, &new_cancel_signal(), &config, ids, now)?;

    let mut out = format!(
        "Compacted {} ({:?}, {}): {} -> {} lines, {} short-term kept\nBackup: {}\n",
        handle.session_id(),
        report.kind,
        config.mode.as_str(),
        report.lines_before,
        report.lines_after,
        report.kept_short_terms,
        report.backup.display(),
    );
    if let Some(clamp) = report.clamp {
        writeln!(
            out,
            "Index total: {} -> {}",
            clamp.previous_total, clamp.total
        )?;
    }
    Ok(out)
}

pub fn cmd_ingest(
    workspace: &Workspace,
    query: &str,
    source: Option<&Path>,
    now: OffsetDateTime,
) -> Result<String> {
    let source = match source.or(workspace.config.ingest.source.as_deref()) {
        Some(source) => source,
        None => bail!("No ingest source given and none configured"),
    };
    let content = fs::read_to_string(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;

    let mut handle = workspace.open(query)?;
    let mut tracker = IngestTracker::new();
    let rules = BatchRules::from(&workspace.config.ingest);
    let report = handle.ingest(&mut tracker, &content, &rules, &workspace.config.ids, now)?;

    Ok(match report {
        Some(report) => format!(
            "Imported {} lines as {} records ({})\n",
            report.new_lines,
            report.record_ids.len(),
            report.record_ids.join(", ")
        ),
        None => "Nothing to import\n".to_string(),
    })
}

pub fn cmd_delete_lines(
    workspace: &Workspace,
    query: &str,
    lines: &[usize],
    now: OffsetDateTime,
) -> Result<String> {
    let mut handle = workspace.open(query)?;
    let report = handle.delete_lines(lines, now)?;
    Ok(edit_summary("Deleted lines", &report))
}

pub fn cmd_delete_first(
    workspace: &Workspace,
    query: &str,
    count: usize,
    now: OffsetDateTime,
) -> Result<String> {
    let mut handle = workspace.open(query)?;
    let keep = workspace.config.compaction.short_term_keep;
    let report = handle.delete_first(count, keep, now)?;
    Ok(edit_summary("Deleted from the start", &report))
}

pub fn cmd_delete_last(
    workspace: &Workspace,
    query: &str,
    count: usize,
    now: OffsetDateTime,
) -> Result<String> {
    let mut handle = workspace.open(query)?;
    let report = handle.delete_last(count, now)?;
    Ok(edit_summary("Deleted from the end", &report))
}

pub fn cmd_truncate(
    workspace: &Workspace,
    query: &str,
    keep: usize,
    now: OffsetDateTime,
) -> Result<String> {
    let mut handle = workspace.open(query)?;
    Ok(match handle.truncate(keep, now)? {
        Some(report) => edit_summary("Truncated", &report),
        None => format!(
            "{} already has {keep} lines or fewer\n",
            handle.session_id()
        ),
    })
}

fn edit_summary(action: &str, report: &EditReport) -> String {
    format!(
        "{action}: {} -> {} lines\nBackup: {}\n",
        report.lines_before,
        report.lines_after,
        report.backup.display()
    )
}

fn tier_preview(record: Option<&ScannedRecord>) -> String {
    match record {
        Some(record) => format!("line {}: {}", record.index + 1, preview(record.text())),
        None => "none".to_string(),
    }
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => format!("{}...", &flat[..end]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_cuts_by_chars() {
        assert_eq!(preview("a\nb"), "a b");
        let long = "白".repeat(PREVIEW_CHARS + 5);
        assert_eq!(preview(&long), format!("{}...", "白".repeat(PREVIEW_CHARS)));
    }

    #[test]
    fn resolve_prefers_a_log_file_over_the_index() {
        let root = tempfile::tempdir().expect("tempdir should be created");
        fs::write(session_path(root.path(), "abc"), "{}\n").expect("log should be written");
        let workspace = Workspace::at(Arc::new(TierlogConfig::default()), root.path());

        assert_eq!(workspace.resolve("abc").expect("file exists"), "abc");
        assert!(workspace.resolve("zzz").is_err());
    }
}
