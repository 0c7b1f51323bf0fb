mod common;

use common::{plain_write, test_settings, FlakyStore};
use notes_sync_lib::autosave::SyncState;
use notes_sync_lib::{NoteSession, NoteStore, SaveOutcome, SaveStatus, SessionEvent};
use std::sync::Arc;
use std::time::Duration;

async fn open(store: &Arc<FlakyStore>) -> NoteSession<FlakyStore> {
    let note = store.create_note("owner").await.expect("create");
    NoteSession::open(store.clone(), &note.id, test_settings())
        .await
        .expect("open")
}

#[tokio::test(start_paused = true)]
async fn burst_of_edits_is_written_once() {
    let store = Arc::new(FlakyStore::new());
    let mut session = open(&store).await;
    for prefix in ["G", "Gr", "Groc", "Groceries"] {
        session.set_title(prefix).expect("title");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    session.set_content("#food and #home").expect("content");

    assert_eq!(session.next_event().await, SessionEvent::SaveStarted);
    assert!(matches!(session.next_event().await, SessionEvent::Saved(_)));
    assert_eq!(store.write_count(), 1);

    let stored = store.get_note(session.note_id()).await.expect("get").expect("exists");
    assert_eq!(stored.title, "Groceries");
    assert_eq!(stored.tags.iter().map(String::as_str).collect::<Vec<_>>(), vec!["food", "home"]);
}

#[tokio::test(start_paused = true)]
async fn manual_saves_are_idempotent() {
    let store = Arc::new(FlakyStore::new());
    let mut session = open(&store).await;
    session.set_content("once").expect("content");

    assert!(matches!(session.save_now().await.expect("save"), SaveOutcome::Saved(_)));
    assert_eq!(session.save_now().await.expect("save"), SaveOutcome::Unchanged);
    assert_eq!(session.save_now().await.expect("save"), SaveOutcome::Unchanged);
    assert_eq!(store.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_write_keeps_local_state_and_retries() {
    let store = Arc::new(FlakyStore::new());
    let mut session = open(&store).await;
    store.fail_next_writes(1);
    session.set_content("do not lose me").expect("content");

    assert_eq!(session.next_event().await, SessionEvent::SaveStarted);
    assert!(matches!(session.next_event().await, SessionEvent::SaveFailed(_)));
    assert_eq!(session.save_status(), SaveStatus::Idle);
    assert!(matches!(session.sync_state(), SyncState::Dirty { .. }));
    assert_eq!(session.content(), Some("do not lose me"));

    assert_eq!(session.next_event().await, SessionEvent::SaveStarted);
    assert!(matches!(session.next_event().await, SessionEvent::Saved(_)));
    let stored = store.get_note(session.note_id()).await.expect("get").expect("exists");
    assert_eq!(stored.content, "do not lose me");
}

#[tokio::test(start_paused = true)]
async fn edits_during_a_write_are_saved_next() {
    let store = Arc::new(FlakyStore::new());
    store.delay_writes(Duration::from_millis(300));
    let mut session = open(&store).await;

    session.set_content("one").expect("content");
    assert_eq!(session.next_event().await, SessionEvent::SaveStarted);
    session.set_content("two").expect("content");

    assert!(matches!(session.next_event().await, SessionEvent::Saved(_)));
    // echo of "one" arrives while "two" is still pending
    assert_eq!(session.next_event().await, SessionEvent::RemoteIgnored);
    assert_eq!(session.content(), Some("two"));

    assert_eq!(session.next_event().await, SessionEvent::SaveStarted);
    assert!(matches!(session.next_event().await, SessionEvent::Saved(_)));
    assert_eq!(store.write_count(), 2);
    let stored = store.get_note(session.note_id()).await.expect("get").expect("exists");
    assert_eq!(stored.content, "two");
}

#[tokio::test(start_paused = true)]
async fn remote_change_during_a_slow_write_is_not_adopted() {
    let store = Arc::new(FlakyStore::new());
    store.delay_writes(Duration::from_millis(500));
    let mut session = open(&store).await;

    session.set_content("local").expect("content");
    assert_eq!(session.next_event().await, SessionEvent::SaveStarted);
    store
        .inner()
        .write_note(session.note_id(), &plain_write("", "remote"))
        .await
        .expect("remote write");

    assert_eq!(session.next_event().await, SessionEvent::RemoteIgnored);
    assert_eq!(session.content(), Some("local"));
    assert!(matches!(session.next_event().await, SessionEvent::Saved(_)));
    assert_eq!(session.next_event().await, SessionEvent::RemoteMetadata);
    assert_eq!(session.content(), Some("local"));
}

#[tokio::test(start_paused = true)]
async fn saved_badge_returns_to_idle_with_label() {
    let store = Arc::new(FlakyStore::new());
    let mut session = open(&store).await;
    session.set_content("x").expect("content");
    session.save_now().await.expect("save");
    assert_eq!(session.save_status(), SaveStatus::Saved);
    assert_eq!(session.last_saved_label(chrono::Utc::now()), None);

    loop {
        if session.next_event().await == SessionEvent::StatusIdle {
            break;
        }
    }
    assert_eq!(session.save_status(), SaveStatus::Idle);
    assert_eq!(
        session.last_saved_label(chrono::Utc::now()).as_deref(),
        Some("just now")
    );
}

#[tokio::test(start_paused = true)]
async fn pin_made_during_a_slow_reply_survives_the_save() {
    let store = Arc::new(FlakyStore::new());
    store.delay_responses(Duration::from_millis(300));
    let mut session = open(&store).await;

    session.set_content("draft").expect("content");
    assert_eq!(session.next_event().await, SessionEvent::SaveStarted);
    tokio::time::sleep(Duration::from_millis(100)).await;
    store.inner().set_pinned(session.note_id(), true).await.expect("pin elsewhere");

    loop {
        if matches!(session.next_event().await, SessionEvent::Saved(_)) {
            break;
        }
    }
    assert!(session.note().pinned);
    assert_eq!(session.note().content, "draft");
    let stored = store.get_note(session.note_id()).await.expect("get").expect("exists");
    assert!(stored.pinned);
    assert_eq!(stored.content, "draft");
}
