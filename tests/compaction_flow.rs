
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use session_store::{check_chain, index_path, JsonSessionIndex, LogView, TokenClamp};
use summarizer::new_cancel_signal;
use summarizer_mock::ScriptedSummarizer;
use tierlog::{
    is_compact_marker, scan, CompactionConfig, CompactionController, CompactionEvent,
    CompactionKind, PreconditionError, TierIds, TierlogError,
};
use time::macros::datetime;
use time::OffsetDateTime;

use fixture::{install_session, open_handle};

const NOW: OffsetDateTime = datetime!(2024-03-02 07:45:00 UTC);

fn marker_count(view: &LogView) -> usize {
    view.messages()
        .filter(|(_, message)| is_compact_marker(message))
        .count()
}

#[test]
fn first_compaction_rebuilds_the_log_around_tier_records() {
    let (root, path) = install_session("dialogue_session.jsonl", "s-fixture");
    let original = fs::read(&path).expect("log bytes");
    let mut handle = open_handle(root.path(), "s-fixture");
    let ids = TierIds::default();

    let report = handle
        .compact_now(
            &ScriptedSummarizer::repeating("bakery saturday, plumber tuesday"),
            &new_cancel_signal(),
            &CompactionConfig::default(),
            &ids,
            NOW,
        )
        .expect("compaction should succeed");

    assert_eq!(report.kind, CompactionKind::First);
    assert_eq!(report.lines_before, 15);
    assert_eq!(report.lines_after, 10);
    assert_eq!(report.kept_short_terms, 5);
    assert_eq!(fs::read(&report.backup).expect("backup bytes"), original);

    let view = handle.view();
    assert_eq!(marker_count(&view), 1);
    assert!(check_chain(&view).is_consistent());
    assert!(view.skipped().is_empty());

    let snapshot = scan(&view, &ids);
    assert_eq!(snapshot.persona.as_ref().map(|p| p.index), Some(1));
    assert_eq!(snapshot.compact_marker, Some(2));
    assert_eq!(
        snapshot.long_term.as_ref().map(|r| r.text()),
        Some("bakery saturday, plumber tuesday")
    );
    assert_eq!(
        snapshot
            .short_terms
            .iter()
            .map(|r| r.record.id.as_str())
            .collect::<Vec<_>>(),
        vec!["a04", "u05", "a05", "u06", "a06"]
    );
}

#[test]
fn compacting_twice_with_the_same_summary_does_not_grow_the_log() {
    let (root, path) = install_session("dialogue_session.jsonl", "s-fixture");
    let mut handle = open_handle(root.path(), "s-fixture");
    let summarizer = ScriptedSummarizer::repeating("same summary every time");
    let config = CompactionConfig::default();
    let ids = TierIds::default();

    handle
        .compact_now(&summarizer, &new_cancel_signal(), &config, &ids, NOW)
        .expect("first compaction");
    let after_first = fs::read_to_string(&path).expect("log text");

    let report = handle
        .compact_now(&summarizer, &new_cancel_signal(), &config, &ids, NOW)
        .expect("second compaction");
    let after_second = fs::read_to_string(&path).expect("log text");

    assert_eq!(report.kind, CompactionKind::Subsequent);
    assert_eq!(after_second, after_first);
    assert_eq!(marker_count(&handle.view()), 1);
}

#[test]
fn log_without_user_message_is_left_byte_identical() {
    let (root, path) = install_session("no_user_session.jsonl", "quiet");
    let before = fs::read(&path).expect("log bytes");
    let mut handle = open_handle(root.path(), "quiet");

    let error = handle
        .compact_now(
            &ScriptedSummarizer::repeating("unused"),
            &new_cancel_signal(),
            &CompactionConfig::default(),
            &TierIds::default(),
            NOW,
        )
        .expect_err("first compaction needs a user message");

    assert!(matches!(
        error,
        TierlogError::Precondition(PreconditionError::NoUserMessage)
    ));
    assert_eq!(fs::read(&path).expect("log bytes"), before);
    assert!(!session_store::backup_dir(root.path()).exists());
}

#[test]
fn summarizer_failure_leaves_the_log_untouched() {
    let (root, path) = install_session("dialogue_session.jsonl", "s-fixture");
    let before = fs::read(&path).expect("log bytes");
    let mut handle = open_handle(root.path(), "s-fixture");
    let summarizer = ScriptedSummarizer::new(vec![
        Ok("long".to_string()),
        Err(summarizer::SummarizeError::Network("connection reset".to_string())),
    ]);

    let error = handle
        .compact_now(
            &summarizer,
            &new_cancel_signal(),
            &CompactionConfig::default(),
            &TierIds::default(),
            NOW,
        )
        .expect_err("network failure must surface");

    assert!(matches!(error, TierlogError::Summarization(_)));
    assert_eq!(fs::read(&path).expect("log bytes"), before);
}

#[test]
fn compaction_clamps_the_session_index_total() {
    let (root, _path) = install_session("dialogue_session.jsonl", "s-fixture");
    let index_file = index_path(root.path());
    fs::write(
        &index_file,
        json!({
            "agent:main:main": {
                "sessionId": "s-fixture",
                "totalTokens": 48_000,
                "inputTokens": 40_000,
                "outputTokens": 8_000,
                "model": "kimi-k2.5",
                "chatType": "direct"
            }
        })
        .to_string(),
    )
    .expect("index should be written");
    let mut handle = open_handle(root.path(), "s-fixture")
        .with_index(Arc::new(JsonSessionIndex::new(&index_file)));

    let report = handle
        .compact_now(
            &ScriptedSummarizer::repeating("summary"),
            &new_cancel_signal(),
            &CompactionConfig::default(),
            &TierIds::default(),
            NOW,
        )
        .expect("compaction should succeed");

    assert_eq!(
        report.clamp,
        Some(TokenClamp {
            previous_total: 48_000,
            total: 1_500,
        })
    );
    let stored: Value =
        serde_json::from_str(&fs::read_to_string(&index_file).expect("index text")).expect("json");
    let entry = &stored["agent:main:main"];
    assert_eq!(entry["totalTokens"], json!(1_500));
    assert_eq!(entry["inputTokens"], json!(1_050));
    assert_eq!(entry["outputTokens"], json!(450));
    assert_eq!(entry["chatType"], json!("direct"));
}

#[test]
fn background_compaction_rejects_a_second_request_and_applies_on_drain() {
    let (root, _path) = install_session("dialogue_session.jsonl", "s-fixture");
    let mut handle = open_handle(root.path(), "s-fixture");
    let config = CompactionConfig::default();
    let ids = TierIds::default();
    let summarizer =
        ScriptedSummarizer::repeating("from the worker").with_delay(Duration::from_millis(100));
    let controller = CompactionController::new(Arc::new(summarizer));

    let plan = handle.prepare_compaction(&config, &ids).expect("plan");
    controller
        .start(handle.session_id(), plan.clone())
        .expect("first request starts");
    let rejected = controller
        .start(handle.session_id(), plan)
        .expect_err("second request is rejected");
    assert!(matches!(rejected, TierlogError::CompactionBusy { .. }));
    assert_eq!(handle.lines().len(), 15);

    controller.wait();
    let events = controller.drain();
    let [CompactionEvent::Finished { texts, .. }] = events.as_slice() else {
        panic!("expected one finished event, got {events:?}");
    };
    let report = handle
        .apply_compaction(texts, config.short_term_keep, &ids, NOW)
        .expect("apply");

    assert_eq!(report.lines_after, 10);
    assert!(!controller.is_busy());
}
