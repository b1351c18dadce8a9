//! Tiered memory compaction for agent conversation logs.
//!
//! A session log is a JSONL file owned by an agent runtime. This crate reads
//! it as a tiered memory structure (persona, long-term, mid-term, short-term),
//! compacts old dialogue into summarized tier records, and imports lines from
//! an external plain-text source as tool results.
//!
//! # Public API Overview
//! - Read-side: [`scan`] classifies records into a [`MemorySnapshot`];
//!   [`estimate_tokens`] and [`TokenTracker`] decide which token count to show.
//! - Compaction: [`plan_compaction`] builds prompts, [`CompactionPlan::summarize`]
//!   runs them, [`rebuild_log`] produces the new log.
//! - Ingestion: [`IngestTracker`] turns unseen external lines into merged
//!   records via [`merge_new_lines`].
//! - [`SessionHandle`] owns one log's cached lines and performs every
//!   mutation (backup, atomic rewrite, index clamp).
//! - [`CompactionController`] runs one summarization at a time off-thread;
//!   [`Scheduler`] drives the cooperative polling timers.

pub mod compaction;
pub mod config;
pub mod controller;
pub mod error;
pub mod estimate;
pub mod gate;
pub mod ingest;
pub mod logging;
pub mod scan;
pub mod schedule;
pub mod session;

pub use crate::compaction::{
    is_compact_marker, plan_compaction, rebuild_log, CompactionKind, CompactionMode,
    CompactionPlan, RebuiltLog, SummaryRequest, SummaryTarget, TierTexts, MARKER_SUMMARY,
    MARKER_TEXT,
};
pub use crate::config::{
    ApiConfig, CompactionConfig, ConfigError, ConfigSource, IngestConfig, ProviderKind, TierIds,
    TierlogConfig,
};
pub use crate::controller::{CompactionController, CompactionEvent, JobId};
pub use crate::error::{PreconditionError, TierlogError};
pub use crate::estimate::{
    estimate_tokens, EffectiveTokens, TokenSource, TokenTracker, COMPACTION_GRACE,
    EXTERNAL_RECORD_TOKENS,
};
pub use crate::gate::{check_auto_compaction, check_thresholds, is_assistant_generating};
pub use crate::ingest::{
    content_key, extract_timestamp, merge_new_lines, BatchRules, IngestBatch, IngestOutcome,
    IngestTracker,
};
pub use crate::scan::{classify, scan, LogStats, MemorySnapshot, ScannedRecord, Tier};
pub use crate::schedule::{CancelToken, Scheduler};
pub use crate::session::{CompactionReport, EditReport, HistoryEntry, IngestReport, SessionHandle};
