#![allow(dead_code)]

use async_trait::async_trait;
use notes_sync_lib::crypto::KdfParams;
use notes_sync_lib::models::{NoteWrite, StoreEvent};
use notes_sync_lib::{AppError, AppResult, AppSettings, Database, Note, NoteStore};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// Settings with a cheap KDF so private-note tests stay fast.
pub fn test_settings() -> AppSettings {
    AppSettings {
        kdf: KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        },
        ..AppSettings::default()
    }
}

/// Wraps the SQLite store to slow down or fail content writes.
pub struct FlakyStore {
    inner: Database,
    failing_writes: AtomicUsize,
    write_delay_ms: AtomicU64,
    response_delay_ms: AtomicU64,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: Database::open_in_memory().expect("in-memory db"),
            failing_writes: AtomicUsize::new(0),
            write_delay_ms: AtomicU64::new(0),
            response_delay_ms: AtomicU64::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Direct access, as another device writing to the same store.
    pub fn inner(&self) -> &Database {
        &self.inner
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn delay_writes(&self, delay: Duration) {
        self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Holds the reply to a content write after it has already committed.
    pub fn delay_responses(&self, delay: Duration) {
        self.response_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Content writes that reached the store successfully.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NoteStore for FlakyStore {
    async fn create_note(&self, owner_id: &str) -> AppResult<Note> {
        self.inner.create_note(owner_id).await
    }

    async fn get_note(&self, note_id: &str) -> AppResult<Option<Note>> {
        self.inner.get_note(note_id).await
    }

    async fn list_notes(&self, owner_id: &str) -> AppResult<Vec<Note>> {
        self.inner.list_notes(owner_id).await
    }

    async fn write_note(&self, note_id: &str, write: &NoteWrite) -> AppResult<Note> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if failing.is_ok() {
            return Err(AppError::Store("injected write failure".to_string()));
        }
        let note = self.inner.write_note(note_id, write).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let reply_delay = self.response_delay_ms.load(Ordering::SeqCst);
        if reply_delay > 0 {
            tokio::time::sleep(Duration::from_millis(reply_delay)).await;
        }
        Ok(note)
    }

    async fn set_pinned(&self, note_id: &str, pinned: bool) -> AppResult<Note> {
        self.inner.set_pinned(note_id, pinned).await
    }

    async fn set_public_slug(&self, note_id: &str, slug: Option<&str>) -> AppResult<Note> {
        self.inner.set_public_slug(note_id, slug).await
    }

    async fn delete_note(&self, note_id: &str) -> AppResult<()> {
        self.inner.delete_note(note_id).await
    }

    async fn find_by_slug(&self, slug: &str) -> AppResult<Option<Note>> {
        self.inner.find_by_slug(slug).await
    }

    async fn count_titled(&self, owner_id: &str, prefix: &str) -> AppResult<usize> {
        self.inner.count_titled(owner_id, prefix).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }
}

pub fn plain_write(title: &str, content: &str) -> NoteWrite {
    NoteWrite {
        title: title.to_string(),
        content: content.to_string(),
        encrypted_content: None,
        is_private: false,
        tags: notes_sync_lib::tags::extract_tags(content),
    }
}
