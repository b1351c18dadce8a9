//! Importing lines of an external plain-text file as `toolResult` records.
//!
//! New lines are found by content, not offset: anything not imported before
//! is new, so upstream rewrites and reorderings are tolerated. New lines are
//! de-duplicated by their text without a leading timestamp and then grouped
//! into batches that become one record each.

use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use session_store::{MessageRecord, Role};
use time::{Date, Duration, Month, PrimitiveDateTime, Time};

use crate::config::{IngestConfig, TierIds};

const TIMESTAMP: &str =
    r"(\d{4})-(\d{2})-(\d{2})[T ](\d{2}):(\d{2}):(\d{2})(?:\.(\d+))?";

fn timestamp_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(TIMESTAMP).expect("timestamp regex must compile"))
}

/// A leading timestamp, bare or bracketed, optionally after a short tag such
/// as `m:[2024-01-01 12:00:00 GMT+8]`.
fn leading_timestamp_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        let stamp = r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?";
        Regex::new(&format!(
            r"^(?:(?:[A-Za-z]{{1,8}}:)?\[{stamp}[^\]]*\]|{stamp})\s*"
        ))
        .expect("leading timestamp regex must compile")
    })
}

/// First timestamp found anywhere in `line`.
#[must_use]
pub fn extract_timestamp(line: &str) -> Option<PrimitiveDateTime> {
    timestamp_regex()
        .captures(line)
        .and_then(|captures| timestamp_from(&captures))
}

fn timestamp_from(captures: &Captures<'_>) -> Option<PrimitiveDateTime> {
    let number = |group: usize| captures.get(group)?.as_str().parse::<u32>().ok();
    let month = Month::try_from(u8::try_from(number(2)?).ok()?).ok()?;
    let date = Date::from_calendar_date(i32::try_from(number(1)?).ok()?, month, u8::try_from(number(3)?).ok()?)
        .ok()?;

    let nanos = match captures.get(7) {
        Some(fraction) => {
            let digits: String = fraction.as_str().chars().take(9).collect();
            format!("{digits:0<9}").parse::<u32>().ok()?
        }
        None => 0,
    };
    let time = Time::from_hms_nano(
        u8::try_from(number(4)?).ok()?,
        u8::try_from(number(5)?).ok()?,
        u8::try_from(number(6)?).ok()?,
        nanos,
    )
    .ok()?;

    Some(PrimitiveDateTime::new(date, time))
}

/// `line` without its leading timestamp, trimmed. Used as the de-duplication
/// key; stored text keeps the timestamp.
#[must_use]
pub fn content_key(line: &str) -> &str {
    let trimmed = line.trim();
    match leading_timestamp_regex().find(trimmed) {
        Some(found) => trimmed[found.end()..].trim(),
        None => trimmed,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRules {
    /// Largest timestamp gap from the batch's first line.
    pub window: Duration,
    /// Largest position gap from the batch's first line.
    pub local_window: usize,
    pub max_batch: usize,
}

impl Default for BatchRules {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for BatchRules {
    fn from(config: &IngestConfig) -> Self {
        Self {
            window: Duration::seconds(i64::try_from(config.window_secs).unwrap_or(i64::MAX)),
            local_window: config.local_window,
            max_batch: config.max_batch.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestBatch {
    /// Position of the batch's first line within the new lines.
    pub first_index: usize,
    pub lines: Vec<String>,
}

impl IngestBatch {
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

struct Candidate<'a> {
    index: usize,
    line: &'a str,
    at: Option<PrimitiveDateTime>,
}

/// Groups new lines into batches.
///
/// Lines whose content key is empty or already seen in `lines` are dropped.
/// A line joins the open batch when it is within `local_window` positions or
/// `window` of timestamp after the batch's first line, and the batch is not
/// full.
#[must_use]
pub fn merge_new_lines(lines: &[String], rules: &BatchRules) -> Vec<IngestBatch> {
    let mut seen_keys = HashSet::new();
    let candidates = lines.iter().enumerate().filter_map(|(index, line)| {
        let key = content_key(line);
        (!key.is_empty() && seen_keys.insert(key)).then(|| Candidate {
            index,
            line: line.as_str(),
            at: extract_timestamp(line),
        })
    });

    let mut batches: Vec<IngestBatch> = Vec::new();
    let mut anchor: Option<Candidate<'_>> = None;
    for candidate in candidates {
        let joined = match (&anchor, batches.last()) {
            (Some(first), Some(batch)) => joins(first, &candidate, batch, rules),
            _ => false,
        };
        if joined {
            if let Some(batch) = batches.last_mut() {
                batch.lines.push(candidate.line.to_string());
            }
        } else {
            batches.push(IngestBatch {
                first_index: candidate.index,
                lines: vec![candidate.line.to_string()],
            });
            anchor = Some(candidate);
        }
    }

    batches
}

fn joins(first: &Candidate<'_>, next: &Candidate<'_>, batch: &IngestBatch, rules: &BatchRules) -> bool {
    if batch.lines.len() >= rules.max_batch {
        return false;
    }
    let near_position = next.index - first.index <= rules.local_window;
    let near_time = match (first.at, next.at) {
        (Some(first_at), Some(next_at)) => next_at - first_at <= rules.window,
        _ => false,
    };
    near_position || near_time
}

/// Result of one poll of the external source.
///
/// Produced by [`IngestTracker::pending`]; the lines only count as seen once
/// the outcome is handed to [`IngestTracker::commit`].
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub new_lines: usize,
    pub records: Vec<MessageRecord>,
    seen: BTreeSet<String>,
}

/// Lines already imported from one external source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestTracker {
    seen: BTreeSet<String>,
}

impl IngestTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from `content` as already imported, so only later lines count.
    #[must_use]
    pub fn with_baseline(content: &str) -> Self {
        Self {
            seen: current_lines(content).map(str::to_string).collect(),
        }
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    #[must_use]
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// [`pending`](Self::pending) followed by [`commit`](Self::commit).
    pub fn poll(
        &mut self,
        content: &str,
        rules: &BatchRules,
        ids: &TierIds,
        taken: &HashSet<String>,
        timestamp: &str,
    ) -> Option<IngestOutcome> {
        let outcome = self.pending(content, rules, ids, taken, timestamp)?;
        self.commit(&outcome);
        Some(outcome)
    }

    /// Turns the lines of `content` not seen before into records without
    /// marking anything as seen.
    ///
    /// Record ids continue from the number of lines seen so far and skip any
    /// id in `taken`.
    #[must_use]
    pub fn pending(
        &self,
        content: &str,
        rules: &BatchRules,
        ids: &TierIds,
        taken: &HashSet<String>,
        timestamp: &str,
    ) -> Option<IngestOutcome> {
        let current: Vec<&str> = current_lines(content).collect();
        let new_lines: Vec<String> = current
            .iter()
            .filter(|line| !self.seen.contains(**line))
            .map(|line| line.to_string())
            .collect();
        if new_lines.is_empty() {
            return None;
        }

        let start = self.seen.len();

        let mut used = HashSet::new();
        let records = merge_new_lines(&new_lines, rules)
            .into_iter()
            .map(|batch| {
                let mut sequence = start + batch.first_index;
                let mut id = ids.external_id(sequence);
                while taken.contains(&id) || used.contains(&id) {
                    sequence += 1;
                    id = ids.external_id(sequence);
                }
                used.insert(id.clone());
                MessageRecord::text(id, None::<String>, timestamp, Role::ToolResult, batch.text())
            })
            .collect();

        Some(IngestOutcome {
            new_lines: new_lines.len(),
            records,
            seen: current.into_iter().map(str::to_string).collect(),
        })
    }

    /// Marks every line of the polled content as seen, including lines
    /// dropped as duplicates.
    pub fn commit(&mut self, outcome: &IngestOutcome) {
        self.seen.clone_from(&outcome.seen);
    }
}

fn current_lines(content: &str) -> impl Iterator<Item = &str> {
    content.lines().map(str::trim).filter(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn batch_texts(batches: &[IngestBatch]) -> Vec<Vec<String>> {
        batches.iter().map(|batch| batch.lines.clone()).collect()
    }

    #[test]
    fn timestamps_are_parsed_in_every_supported_shape() {
        assert_eq!(
            extract_timestamp("2024-01-01T12:00:02 B"),
            Some(datetime!(2024-01-01 12:00:02))
        );
        assert_eq!(
            extract_timestamp("[2024-01-01 12:00:02.5] B"),
            Some(datetime!(2024-01-01 12:00:02.5))
        );
        assert_eq!(
            extract_timestamp("m:[2024-01-01 12:00:02 GMT+8] B"),
            Some(datetime!(2024-01-01 12:00:02))
        );
        assert_eq!(extract_timestamp("2024-13-01 12:00:02 bad month"), None);
        assert_eq!(extract_timestamp("no time here"), None);
    }

    #[test]
    fn content_key_strips_only_a_leading_timestamp() {
        assert_eq!(content_key("  2024-01-01 12:00:00.123 system start "), "system start");
        assert_eq!(content_key("[2024-01-01T12:00:00] connected"), "connected");
        assert_eq!(content_key("m:[2024-01-01 12:00:00 GMT+8] tagged"), "tagged");
        assert_eq!(
            content_key("reading at 2024-01-01 12:00:00"),
            "reading at 2024-01-01 12:00:00"
        );
    }

    #[test]
    fn position_window_merges_nearby_lines() {
        let input = lines(&[
            "2024-01-01T12:00:00 A",
            "2024-01-01T12:00:02 B",
            "2024-01-01T12:00:09 C",
        ]);

        let batches = merge_new_lines(&input, &BatchRules::default());

        assert_eq!(batch_texts(&batches), vec![input.clone()]);
    }

    #[test]
    fn timestamp_window_applies_without_position_window() {
        let input = lines(&[
            "2024-01-01T12:00:00 A",
            "2024-01-01T12:00:02 B",
            "2024-01-01T12:00:09 C",
        ]);
        let rules = BatchRules {
            local_window: 0,
            ..BatchRules::default()
        };

        let batches = merge_new_lines(&input, &rules);

        assert_eq!(
            batch_texts(&batches),
            vec![input[..2].to_vec(), input[2..].to_vec()]
        );
        assert_eq!(batches[1].first_index, 2);
    }

    #[test]
    fn untimed_lines_are_capped_at_ten_per_batch() {
        let input: Vec<String> = (0..12).map(|n| format!("line {n}")).collect();

        let batches = merge_new_lines(&input, &BatchRules::default());

        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|batch| batch.lines.len() <= 10));
        assert_eq!(batches[0].lines.len(), 10);
        assert_eq!(batches[1].first_index, 10);
    }

    #[test]
    fn duplicate_content_is_dropped_first_occurrence_wins() {
        let input = lines(&[
            "2024-01-01 12:00:00 pump on",
            "2024-01-01 12:00:01 pump on",
            "2024-01-01 12:00:02",
            "2024-01-01 12:00:03 pump off",
        ]);

        let batches = merge_new_lines(&input, &BatchRules::default());

        assert_eq!(
            batch_texts(&batches),
            vec![lines(&["2024-01-01 12:00:00 pump on", "2024-01-01 12:00:03 pump off"])]
        );
    }

    #[test]
    fn tracker_imports_only_unseen_lines_and_numbers_from_seen_count() {
        let mut tracker = IngestTracker::with_baseline("a\nb\n\n");
        let rules = BatchRules::default();
        let ids = TierIds::default();

        assert_eq!(tracker.poll("a\nb\n", &rules, &ids, &HashSet::new(), "t"), None);

        let outcome = tracker
            .poll("a\nb\nc\nd\n", &rules, &ids, &HashSet::new(), "t")
            .expect("new lines");
        assert_eq!(outcome.new_lines, 2);
        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(record.id, "extern0002");
        assert_eq!(record.role(), Role::ToolResult);
        assert_eq!(record.first_text(), Some("c\nd"));
        assert_eq!(tracker.seen_count(), 4);
    }

    #[test]
    fn removed_line_is_reimported_when_it_reappears() {
        let mut tracker = IngestTracker::new();
        let rules = BatchRules::default();
        let ids = TierIds::default();

        tracker.poll("x\ny\n", &rules, &ids, &HashSet::new(), "t");
        // A poll without new lines leaves the seen set alone.
        assert_eq!(tracker.poll("y\n", &rules, &ids, &HashSet::new(), "t"), None);
        assert_eq!(tracker.seen_count(), 2);

        tracker
            .poll("y\nz\n", &rules, &ids, &HashSet::new(), "t")
            .expect("z is new");
        let outcome = tracker
            .poll("x\ny\nz\n", &rules, &ids, &HashSet::new(), "t")
            .expect("x is new again");
        assert_eq!(outcome.records[0].first_text(), Some("x"));
    }

    #[test]
    fn pending_leaves_the_tracker_untouched_until_commit() {
        let mut tracker = IngestTracker::new();
        let rules = BatchRules::default();
        let ids = TierIds::default();

        let outcome = tracker
            .pending("a\nb\n", &rules, &ids, &HashSet::new(), "t")
            .expect("new lines");
        assert_eq!(tracker.seen_count(), 0);
        assert_eq!(
            tracker.pending("a\nb\n", &rules, &ids, &HashSet::new(), "t"),
            Some(outcome.clone())
        );

        tracker.commit(&outcome);
        assert_eq!(tracker.seen_count(), 2);
        assert_eq!(tracker.pending("a\nb\n", &rules, &ids, &HashSet::new(), "t"), None);
    }

    #[test]
    fn colliding_ids_are_bumped() {
        let mut tracker = IngestTracker::new();
        let taken: HashSet<String> = ["extern0000".to_string(), "extern0001".to_string()].into();

        let outcome = tracker
            .poll("fresh\n", &BatchRules::default(), &TierIds::default(), &taken, "t")
            .expect("new line");

        assert_eq!(outcome.records[0].id, "extern0002");
    }
}
