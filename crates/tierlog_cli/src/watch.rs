//! Follows one session on cooperative timers.
//!
//! Three repeating tasks share a [`WatchState`]: a refresh tick that reloads
//! the configuration, re-reads the log and applies finished compactions; an
//! ingest tick that polls the external source; and an auto-compaction tick
//! that starts a background summarization when the gate allows it.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tierlog::{
    BatchRules, CancelToken, CompactionController, CompactionEvent, ConfigSource, IngestTracker,
    Scheduler, SessionHandle, TierlogError,
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub auto: bool,
    pub ingest: Option<PathBuf>,
    pub duration: Option<Duration>,
}

pub struct WatchState<W> {
    config: ConfigSource,
    handle: SessionHandle,
    controller: Arc<CompactionController>,
    tracker: IngestTracker,
    ingest_source: Option<PathBuf>,
    auto: bool,
    last_epoch: u64,
    out: W,
}

impl<W: Write> WatchState<W> {
    /// The ingest baseline is the source's current content; only lines added
    /// afterwards are imported.
    pub fn new(
        config: ConfigSource,
        handle: SessionHandle,
        controller: Arc<CompactionController>,
        options: &WatchOptions,
        out: W,
    ) -> Self {
        let current = config.current();
        let ingest_source = options.ingest.clone().or_else(|| {
            current
                .ingest
                .enabled
                .then(|| current.ingest.source.clone())
                .flatten()
        });
        let tracker = match ingest_source.as_ref().map(fs::read_to_string) {
            Some(Ok(content)) => IngestTracker::with_baseline(&content),
            _ => IngestTracker::new(),
        };
        let last_epoch = handle.epoch();

        Self {
            auto: options.auto || current.compaction.auto_enabled,
            config,
            handle,
            controller,
            tracker,
            ingest_source,
            last_epoch,
            out,
        }
    }

    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<CompactionController> {
        &self.controller
    }

    #[must_use]
    pub fn into_output(self) -> W {
        self.out
    }

    fn emit(&mut self, line: &str) {
        if let Err(error) = writeln!(self.out, "{line}") {
            debug!(%error, "watch output is gone");
        }
    }

    /// Reloads the configuration, applies finished compactions and reports
    /// changes to the log.
    pub fn refresh_tick(&mut self, now: OffsetDateTime) {
        match self.config.reload_if_changed() {
            Ok(true) => self.emit("configuration reloaded"),
            Ok(false) => {}
            Err(error) => warn!(%error, "keeping the previous configuration"),
        }

        for event in self.controller.drain() {
            self.apply_event(event, now);
        }

        if let Err(error) = self.handle.refresh() {
            warn!(
                %error,
                session = self.handle.session_id(),
                "failed to re-read the session log"
            );
            return;
        }
        if self.handle.epoch() != self.last_epoch {
            self.last_epoch = self.handle.epoch();
            let ids = self.config.current().ids.clone();
            match self.handle.effective_tokens(&ids, now) {
                Ok(tokens) => {
                    let line = format!(
                        "{} lines, {} tokens",
                        self.handle.lines().len(),
                        tokens.tokens
                    );
                    self.emit(&line);
                }
                Err(error) => warn!(%error, "failed to read the token count"),
            }
        }
    }

    fn apply_event(&mut self, event: CompactionEvent, now: OffsetDateTime) {
        let config = self.config.current();
        match event {
            CompactionEvent::Finished { texts, .. } => {
                match self.handle.apply_compaction(
                    &texts,
                    config.compaction.short_term_keep,
                    &config.ids,
                    now,
                ) {
                    Ok(report) => {
                        let line = format!(
                            "compacted: {} -> {} lines",
                            report.lines_before, report.lines_after
                        );
                        self.emit(&line);
                    }
                    Err(error) => {
                        warn!(%error, "compaction result could not be applied");
                        self.emit(&format!("compaction failed: {error}"));
                    }
                }
            }
            CompactionEvent::Failed { error, .. } => {
                warn!(%error, "background compaction failed");
                self.emit(&format!("compaction failed: {error}"));
            }
            CompactionEvent::Cancelled { .. } => self.emit("compaction cancelled"),
        }
    }

    /// Imports lines added to the external source since the last poll.
    pub fn ingest_tick(&mut self, now: OffsetDateTime) {
        let Some(source) = self.ingest_source.clone() else {
            return;
        };
        let content = match fs::read_to_string(&source) {
            Ok(content) => content,
            Err(error) => {
                debug!(%error, source = %source.display(), "ingest source unavailable");
                return;
            }
        };

        let config = self.config.current();
        let rules = BatchRules::from(&config.ingest);
        match self
            .handle
            .ingest(&mut self.tracker, &content, &rules, &config.ids, now)
        {
            Ok(Some(report)) => {
                let line = format!(
                    "imported {} lines as {}",
                    report.new_lines,
                    report.record_ids.join(", ")
                );
                self.emit(&line);
            }
            Ok(None) => {}
            Err(error) => warn!(%error, "ingest failed"),
        }
    }

    /// Starts a background compaction when none is pending and the gate
    /// allows one. Returns whether a job was started.
    pub fn auto_compact_tick(&mut self, now: OffsetDateTime) -> bool {
        if !self.auto || self.controller.is_busy() {
            return false;
        }

        let config = self.config.current();
        let plan = self
            .handle
            .check_auto_compaction(&config.compaction, &config.ids, now)
            .and_then(|()| self.handle.prepare_compaction(&config.compaction, &config.ids));
        let plan = match plan {
            Ok(plan) => plan,
            Err(error) if error.is_precondition() => {
                debug!(%error, "automatic compaction not due");
                return false;
            }
            Err(error) => {
                warn!(%error, "automatic compaction check failed");
                return false;
            }
        };

        match self.controller.start(self.handle.session_id(), plan) {
            Ok(job_id) => {
                info!(job_id, "automatic compaction started");
                self.emit("compaction started");
                true
            }
            Err(TierlogError::CompactionBusy { .. }) => false,
            Err(error) => {
                warn!(%error, "automatic compaction could not start");
                false
            }
        }
    }
}

/// Runs the watch loop on the calling thread until `stop` is cancelled or
/// `options.duration` elapses.
pub fn run_watch<W: Write + 'static>(
    mut state: WatchState<W>,
    options: &WatchOptions,
    stop: &CancelToken,
) -> W {
    let start = Instant::now();
    let current = state.config.current();
    let mut scheduler: Scheduler<WatchState<W>> = Scheduler::new();

    scheduler.every("refresh", REFRESH_INTERVAL, start, |state| {
        state.refresh_tick(OffsetDateTime::now_utc())
    });
    if state.ingest_source.is_some() {
        scheduler.every("ingest", current.ingest.poll_interval(), start, |state| {
            state.ingest_tick(OffsetDateTime::now_utc())
        });
    }
    if state.auto {
        scheduler.every("auto-compact", current.compaction.auto_interval(), start, |state| {
            state.auto_compact_tick(OffsetDateTime::now_utc());
        });
    }
    if let Some(duration) = options.duration {
        let stop = stop.clone();
        scheduler.every("deadline", duration, start, move |_| stop.cancel());
    }

    info!(
        session = state.handle.session_id(),
        tasks = scheduler.active(),
        "watching session"
    );
    scheduler.run_until(&mut state, stop);

    if let Some(job_id) = state.controller.cancel() {
        debug!(job_id, "cancelled pending compaction on exit");
    }
    state.controller.wait();
    state.refresh_tick(OffsetDateTime::now_utc());
    state.into_output()
}
