use std::fs;
use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use session_store::{backup_dir, check_chain, index_path, session_path, Role, SessionLog};
use summarizer_mock::ScriptedSummarizer;
use tempfile::TempDir;
use tierlog::TierlogConfig;
use tierlog_cli::commands::{
    cmd_backup, cmd_compact, cmd_delete_lines, cmd_history, cmd_ingest, cmd_list, cmd_show,
    cmd_stats, cmd_truncate, CompactOptions, Workspace,
};
use time::macros::datetime;
use time::OffsetDateTime;

const NOW: OffsetDateTime = datetime!(2024-06-01 09:30:00 UTC);
const SESSION: &str = "garden-session";

fn dialogue_lines() -> Vec<String> {
    let mut lines = vec![json!({"type": "session", "id": SESSION}).to_string()];
    let mut parent: Option<String> = None;
    for n in 0..8 {
        let (id, role) = if n % 2 == 0 {
            (format!("u{n}"), "user")
        } else {
            (format!("a{n}"), "assistant")
        };
        let text = format!("message number {n} about the vegetable garden");
        lines.push(
            json!({
                "type": "message",
                "id": id,
                "parentId": parent,
                "timestamp": format!("2024-03-01T08:{:02}:00Z", n + 10),
                "message": {"role": role, "content": [{"type": "text", "text": text}]}
            })
            .to_string(),
        );
        parent = Some(id);
    }
    lines
}

fn setup() -> (TempDir, Workspace) {
    let root = tempfile::tempdir().expect("tempdir should be created");
    fs::write(
        session_path(root.path(), SESSION),
        dialogue_lines().join("\n") + "\n",
    )
    .expect("session should be written");
    let index = json!({
        "agent:main:garden": {
            "sessionId": SESSION,
            "totalTokens": 4000,
            "contextTokens": 8000,
            "model": "kimi-k2.5",
            "updatedAt": 1
        }
    });
    fs::write(index_path(root.path()), index.to_string()).expect("index should be written");

    let workspace = Workspace::at(Arc::new(TierlogConfig::default()), root.path());
    (root, workspace)
}

fn line_count(root: &Path) -> usize {
    fs::read_to_string(session_path(root, SESSION))
        .expect("session should be readable")
        .lines()
        .count()
}

#[test]
fn list_reports_index_usage() {
    let (_root, workspace) = setup();

    let output = cmd_list(&workspace).expect("list should succeed");

    assert!(output.starts_with(SESSION), "{output}");
    assert!(output.contains("4000 / 8000"), "{output}");
    assert!(output.contains("(50.0%)"), "{output}");
    assert!(output.trim_end().ends_with("kimi-k2.5"), "{output}");
}

#[test]
fn list_without_index_says_so() {
    let root = tempfile::tempdir().expect("tempdir should be created");
    let workspace = Workspace::at(Arc::new(TierlogConfig::default()), root.path());

    let output = cmd_list(&workspace).expect("list should succeed");

    assert!(output.starts_with("No sessions in "), "{output}");
}

#[test]
fn show_resolves_a_prefix_and_prefers_the_index_total() {
    let (_root, workspace) = setup();

    let output = cmd_show(&workspace, "garden", NOW).expect("show should succeed");

    assert!(output.contains(&format!("session    {SESSION}")), "{output}");
    assert!(output.contains("tokens     4000 (index)"), "{output}");
    assert!(output.contains("marker     none"), "{output}");
    assert!(output.contains("lines      9 (0 skipped, 0 external)"), "{output}");
}

#[test]
fn unknown_session_is_an_error() {
    let (_root, workspace) = setup();

    let error = cmd_show(&workspace, "orchard", NOW).expect_err("nothing matches");

    assert!(error.to_string().contains("No session matches 'orchard'"));
}

#[test]
fn history_filters_by_role_and_limits() {
    let (_root, workspace) = setup();

    let output =
        cmd_history(&workspace, SESSION, 2, Some(Role::User)).expect("history should succeed");
    let lines: Vec<&str> = output.lines().collect();

    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("#6 "), "{output}");
    assert!(lines[0].contains("u4"), "{output}");
    assert!(lines[1].starts_with("#8 "), "{output}");
    assert!(lines[1].contains("u6"), "{output}");
}

#[test]
fn compact_with_mock_summarizer_rewrites_and_clamps_the_index() {
    let (root, workspace) = setup();
    let original = fs::read_to_string(session_path(root.path(), SESSION)).expect("readable");
    let summarizer = ScriptedSummarizer::repeating("vegetables planted, watering schedule agreed");

    let output = cmd_compact(
        &workspace,
        SESSION,
        &summarizer,
        CompactOptions::default(),
        NOW,
    )
    .expect("compaction should succeed");

    assert!(output.starts_with(&format!("Compacted {SESSION} (First, ")), "{output}");
    assert!(output.contains("Index total: 4000 -> "), "{output}");
    assert_eq!(summarizer.call_count(), 2);

    let log = SessionLog::locate(root.path(), SESSION).expect("session exists");
    let view = log.read_view().expect("log readable");
    assert_eq!(view.len(), 9);
    let chain: Vec<(&str, Option<&str>)> = view
        .messages()
        .map(|(_, message)| (message.id.as_str(), message.parent_id.as_deref()))
        .collect();
    assert_eq!(
        chain,
        vec![
            ("baizhi00", None),
            ("baizhi52", Some("baizhi00")),
            ("baizhi20", Some("baizhi52")),
            ("a3", Some("baizhi20")),
            ("u4", Some("a3")),
            ("a5", Some("u4")),
            ("u6", Some("a5")),
            ("a7", Some("u6")),
        ]
    );
    assert!(check_chain(&view).is_consistent());

    let backups: Vec<_> = fs::read_dir(backup_dir(root.path()))
        .expect("backup dir should exist")
        .collect();
    assert_eq!(backups.len(), 1);
    let backup = backups[0].as_ref().expect("entry").path();
    assert_eq!(fs::read_to_string(backup).expect("backup readable"), original);
}

#[test]
fn compact_check_refuses_below_thresholds() {
    let (root, workspace) = setup();
    let summarizer = ScriptedSummarizer::repeating("never used");
    let options = CompactOptions {
        mode: None,
        check: true,
    };

    let result = cmd_compact(&workspace, SESSION, &summarizer, options, NOW);

    assert!(result.is_err());
    assert_eq!(summarizer.call_count(), 0);
    assert_eq!(line_count(root.path()), 9);
    assert!(!backup_dir(root.path()).exists());
}

#[test]
fn ingest_appends_external_records() {
    let (root, workspace) = setup();
    let feed = root.path().join("feed.txt");
    fs::write(&feed, "front door opened\n").expect("feed should be written");

    let output = cmd_ingest(&workspace, SESSION, Some(&feed), NOW).expect("ingest succeeds");

    assert_eq!(output, "Imported 1 lines as 1 records (extern0000)\n");
    assert_eq!(line_count(root.path()), 10);
}

#[test]
fn ingest_without_source_is_an_error() {
    let (_root, workspace) = setup();

    let error = cmd_ingest(&workspace, SESSION, None, NOW).expect_err("no source");

    assert!(error.to_string().contains("No ingest source"));
}

#[test]
fn delete_lines_backs_up_and_stats_report_the_broken_link() {
    let (root, workspace) = setup();

    let output = cmd_delete_lines(&workspace, SESSION, &[4], NOW).expect("delete succeeds");
    assert!(output.starts_with("Deleted lines: 9 -> 8 lines"), "{output}");
    assert_eq!(line_count(root.path()), 8);

    let stats = cmd_stats(&workspace, SESSION).expect("stats succeed");
    assert!(stats.contains("messages     7"), "{stats}");
    assert!(stats.contains("chain        1 dangling, 0 duplicate"), "{stats}");
}

#[test]
fn truncate_and_backup_report_their_work() {
    let (root, workspace) = setup();

    let backup = cmd_backup(&workspace, SESSION, NOW).expect("backup succeeds");
    assert!(backup.starts_with(&format!("Backed up {SESSION} to ")), "{backup}");

    let unchanged = cmd_truncate(&workspace, SESSION, 20, NOW).expect("truncate succeeds");
    assert_eq!(unchanged, format!("{SESSION} already has 20 lines or fewer\n"));

    let output = cmd_truncate(&workspace, SESSION, 3, NOW).expect("truncate succeeds");
    assert!(output.starts_with("Truncated: 9 -> 3 lines"), "{output}");
    assert_eq!(line_count(root.path()), 3);
}
