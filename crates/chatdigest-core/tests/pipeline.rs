mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chatdigest_core::{ConversationEvent, EventKind, NOTHING_TO_SUMMARIZE, PreferenceUpdate};
use chatdigest_storage::Storage;
use chrono::NaiveDate;
use common::{Harness, ScriptedLlm, at, fact_lines, text};
use tokio::time::sleep;

#[tokio::test]
async fn test_three_texts_and_failed_image_make_one_pass() {
    let harness = Harness::new(ScriptedLlm::new(None), 10, Duration::from_millis(200));
    let image_path = harness.temp_dir.path().join("whiteboard.png");
    std::fs::write(&image_path, b"png").unwrap();

    let session = harness.registry.get("team").await;
    session.add_event(text("ada", "shall we ship friday?", 1)).await;
    session.add_event(text("bo", "fine by me", 2)).await;
    session
        .add_event(ConversationEvent::new(
            "bo",
            EventKind::Image,
            image_path.to_string_lossy(),
            at(3),
        ))
        .await;
    session.add_event(text("cy", "friday it is", 4)).await;

    sleep(Duration::from_millis(600)).await;

    let compositions = harness.llm.compositions();
    assert_eq!(compositions.len(), 1);
    // Two attempts per the retry policy, both failed.
    assert_eq!(harness.llm.vision_calls(), 2);

    let lines = fact_lines(&compositions[0]);
    assert_eq!(
        lines,
        vec![
            "[2026-10-16 09:00:01] ada: shall we ship friday?",
            "[2026-10-16 09:00:02] bo: fine by me",
            "[2026-10-16 09:00:03] bo sent an image: ",
            "[2026-10-16 09:00:04] cy: friday it is",
        ]
    );
    assert_eq!(session.running_digest().await, "digest #1");
    assert_eq!(session.buffered_len().await, 0);
}

#[tokio::test]
async fn test_no_pass_before_idle_window_of_last_event() {
    let harness = Harness::new(ScriptedLlm::new(None), 10, Duration::from_millis(200));
    let session = harness.registry.get("team").await;

    for offset in 0..4 {
        session.add_event(text("ada", "still typing", offset)).await;
        sleep(Duration::from_millis(120)).await;
    }
    assert!(harness.llm.compositions().is_empty());

    sleep(Duration::from_millis(300)).await;
    let compositions = harness.llm.compositions();
    assert_eq!(compositions.len(), 1);
    assert_eq!(fact_lines(&compositions[0]).len(), 4);
}

#[tokio::test]
async fn test_concurrent_adds_split_into_threshold_sized_passes() {
    let harness = Harness::new(ScriptedLlm::new(None), 5, Duration::from_secs(60));
    let session = harness.registry.get("team").await;

    let mut handles = Vec::new();
    for i in 0..23 {
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            session.add_event(text("ada", &format!("message {}", i), i)).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let threshold_passes = harness.llm.compositions();
    assert_eq!(threshold_passes.len(), 4);
    assert!(threshold_passes.iter().all(|r| fact_lines(r).len() == 5));
    assert_eq!(session.buffered_len().await, 3);

    session.get_digest().await;
    let compositions = harness.llm.compositions();
    assert_eq!(compositions.len(), 5);

    let seen: Vec<String> = compositions.iter().flat_map(fact_lines).collect();
    let unique: HashSet<&String> = seen.iter().collect();
    assert_eq!(seen.len(), 23);
    assert_eq!(unique.len(), 23);
}

#[tokio::test]
async fn test_count_threshold_cancels_idle_timer() {
    let harness = Harness::new(ScriptedLlm::new(None), 3, Duration::from_millis(150));
    let session = harness.registry.get("team").await;

    session.add_event(text("ada", "one", 1)).await;
    session.add_event(text("ada", "two", 2)).await;
    session.add_event(text("ada", "three", 3)).await;
    assert_eq!(harness.llm.compositions().len(), 1);

    sleep(Duration::from_millis(400)).await;
    assert_eq!(harness.llm.compositions().len(), 1);
}

#[tokio::test]
async fn test_pull_on_fresh_conversation_returns_sentinel() {
    let harness = Harness::new(ScriptedLlm::new(None), 10, Duration::from_secs(60));
    let session = harness.registry.get("empty").await;

    assert_eq!(session.get_digest().await, NOTHING_TO_SUMMARIZE);
    assert!(harness.llm.compositions().is_empty());
}

#[tokio::test]
async fn test_failed_composition_preserves_digest() {
    let harness = Harness::new(ScriptedLlm::new(Some("a chart")), 10, Duration::from_secs(60));
    let session = harness.registry.get("team").await;

    session.add_event(text("ada", "kickoff", 1)).await;
    let before = session.get_digest().await;
    assert_eq!(before, "digest #1");

    harness.llm.fail_compositions(true);
    session.add_event(text("bo", "update", 2)).await;
    assert_eq!(session.get_digest().await, before);
    assert_eq!(session.running_digest().await, before);
}

#[tokio::test]
async fn test_daily_flush_keeps_existing_digest_without_new_pass() {
    let harness = Harness::new(ScriptedLlm::new(None), 10, Duration::from_secs(60));
    let session = harness.registry.get("team").await;
    let day = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();

    session.add_event(text("ada", "morning", 1)).await;
    session.add_event(text("bo", "afternoon", 2)).await;
    let digest = session.get_digest().await;
    assert_eq!(harness.llm.compositions().len(), 1);

    let report = session.daily_flush_on(day).await.unwrap();

    assert!(!report.forced_pass);
    assert_eq!(harness.llm.compositions().len(), 1);
    assert_eq!(report.events_persisted, 2);

    let events = harness.store.list_events("team").unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].payload, "morning");

    let records = harness.store.list_daily_digests("team").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].date, day);
    assert_eq!(records[0].text, digest);
    assert_eq!(session.daily_len().await, 0);
}

#[tokio::test]
async fn test_preferences_survive_flush_and_restart() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("chatdigest.db");

    {
        let storage = Arc::new(Storage::new(&db_path).unwrap());
        let harness = Harness::with_storage(
            ScriptedLlm::new(None),
            10,
            Duration::from_secs(60),
            storage,
            tempfile::tempdir().unwrap(),
        );
        let session = harness.registry.get("team").await;

        assert!(session.update_preference("Lingua", "en").await.is_applied());
        let rejected = session.update_preference("UnknownKey", "x").await;
        assert!(matches!(rejected, PreferenceUpdate::Rejected { .. }));
        assert_eq!(session.get_preference("Language").await.as_deref(), Some("en"));
        assert_eq!(session.preferences().await.entries().len(), 4);

        session.daily_flush().await.unwrap();
    }

    let storage = Arc::new(Storage::new(&db_path).unwrap());
    let harness = Harness::with_storage(
        ScriptedLlm::new(None),
        10,
        Duration::from_secs(60),
        storage,
        tempfile::tempdir().unwrap(),
    );
    let session = harness.registry.get("team").await;
    assert_eq!(session.preferences().await.language, "en");
}
