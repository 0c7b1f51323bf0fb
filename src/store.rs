use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::errors::AppResult;
use crate::models::{Note, NoteWrite, StoreEvent};

/// The remote, authoritative document store holding one document per note.
///
/// Every mutation is published to live subscribers as a [`StoreEvent`],
/// including mutations made by the subscriber itself.
#[async_trait]
pub trait NoteStore: Send + Sync + 'static {
    /// Creates an empty, non-private note owned by `owner_id`.
    async fn create_note(&self, owner_id: &str) -> AppResult<Note>;

    async fn get_note(&self, note_id: &str) -> AppResult<Option<Note>>;

    async fn list_notes(&self, owner_id: &str) -> AppResult<Vec<Note>>;

    /// Replaces the editable fields of a note and refreshes `updated_at`.
    async fn write_note(&self, note_id: &str, write: &NoteWrite) -> AppResult<Note>;

    async fn set_pinned(&self, note_id: &str, pinned: bool) -> AppResult<Note>;

    /// Sets or clears the public slug. Setting a slug on a private note fails.
    async fn set_public_slug(&self, note_id: &str, slug: Option<&str>) -> AppResult<Note>;

    async fn delete_note(&self, note_id: &str) -> AppResult<()>;

    async fn find_by_slug(&self, slug: &str) -> AppResult<Option<Note>>;

    /// Counts the owner's notes titled `"{prefix} {n}"` for some number `n`.
    async fn count_titled(&self, owner_id: &str, prefix: &str) -> AppResult<usize>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// One step of a note's live update stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveUpdate {
    Event(StoreEvent),
    /// The subscriber fell behind and `skipped` events were dropped; the
    /// note must be re-read to catch up.
    Lagged(u64),
}

/// Live updates for a single note. Dropping it releases the subscription.
#[derive(Debug)]
pub struct NoteSubscription {
    note_id: String,
    receiver: broadcast::Receiver<StoreEvent>,
}

impl NoteSubscription {
    pub fn new<S: NoteStore + ?Sized>(store: &S, note_id: &str) -> Self {
        Self {
            note_id: note_id.to_string(),
            receiver: store.subscribe(),
        }
    }

    /// Waits for the next update about this note. `None` once the store has
    /// shut its channel.
    pub async fn next(&mut self) -> Option<LiveUpdate> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.note_id() == self.note_id => return Some(LiveUpdate::Event(event)),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(note_id = %self.note_id, skipped, "live update subscriber lagged");
                    return Some(LiveUpdate::Lagged(skipped));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
