use std::collections::BTreeSet;
use std::sync::Arc;

use crate::errors::{AppError, AppResult};
use crate::models::{AppSettings, Note, NoteSummary};
use crate::policy::ensure_owner;
use crate::session::{NoteSession, SaveOutcome};
use crate::store::NoteStore;

/// One owner's notes plus the single note currently open in the editor.
pub struct Notebook<S: NoteStore> {
    store: Arc<S>,
    owner_id: String,
    settings: AppSettings,
    active: Option<NoteSession<S>>,
}

impl<S: NoteStore> Notebook<S> {
    pub fn new(store: Arc<S>, owner_id: &str, settings: AppSettings) -> AppResult<Self> {
        if owner_id.trim().is_empty() {
            return Err(AppError::Validation("owner id is required".to_string()));
        }
        Ok(Self {
            store,
            owner_id: owner_id.to_string(),
            settings,
            active: None,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn active(&self) -> Option<&NoteSession<S>> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut NoteSession<S>> {
        self.active.as_mut()
    }

    /// Notes ordered pinned first, then most recently updated. `tag` filters
    /// case-insensitively and may carry its leading `#`.
    pub async fn list_notes(&self, tag: Option<&str>) -> AppResult<Vec<NoteSummary>> {
        let wanted = tag
            .map(|tag| tag.trim().trim_start_matches('#').to_lowercase())
            .filter(|tag| !tag.is_empty());
        let mut notes = self.owned_notes().await?;
        if let Some(wanted) = wanted {
            notes.retain(|note| note.tags.contains(&wanted));
        }
        Ok(notes.iter().map(Note::summary).collect())
    }

    /// Every tag used across the owner's notes, sorted.
    pub async fn all_tags(&self) -> AppResult<Vec<String>> {
        let tags = self
            .owned_notes()
            .await?
            .into_iter()
            .flat_map(|note| note.tags)
            .collect::<BTreeSet<_>>();
        Ok(tags.into_iter().collect())
    }

    /// Selects the most recently updated note, creating one for an empty
    /// notebook.
    pub async fn bootstrap(&mut self) -> AppResult<&mut NoteSession<S>> {
        let latest = self
            .owned_notes()
            .await?
            .into_iter()
            .max_by_key(|note| note.updated_at);
        match latest {
            Some(note) => self.open_note(&note.id).await,
            None => self.create_note().await,
        }
    }

    pub async fn create_note(&mut self) -> AppResult<&mut NoteSession<S>> {
        let note = self.store.create_note(&self.owner_id).await?;
        tracing::info!(note_id = %note.id, owner_id = %self.owner_id, "note created");
        self.activate(&note.id).await
    }

    /// Switches the editor to `note_id`. The previous note flushes its
    /// pending edits in the background.
    pub async fn open_note(&mut self, note_id: &str) -> AppResult<&mut NoteSession<S>> {
        let note = self
            .store
            .get_note(note_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("note {} not found", note_id)))?;
        ensure_owner(&note, &self.owner_id)?;
        if self.active.as_ref().is_some_and(|active| active.note_id() == note_id) {
            return self.require_active();
        }
        self.activate(note_id).await
    }

    /// Saves the active note right away and then opens a fresh one.
    pub async fn save_and_create_note(&mut self) -> AppResult<SaveOutcome> {
        let outcome = match self.active.as_mut() {
            Some(active) => active.save_now().await?,
            None => SaveOutcome::Unchanged,
        };
        if let SaveOutcome::Failed(message) = &outcome {
            tracing::warn!(owner_id = %self.owner_id, error = %message, "not starting a new note after failed save");
            return Ok(outcome);
        }
        self.create_note().await?;
        Ok(outcome)
    }

    /// Deletes a note. Deleting the active note moves the editor to the first
    /// remaining note, or to a fresh one when none remain.
    pub async fn delete_note(&mut self, note_id: &str) -> AppResult<()> {
        let note = self
            .store
            .get_note(note_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("note {} not found", note_id)))?;
        ensure_owner(&note, &self.owner_id)?;

        let was_active = self.active.as_ref().is_some_and(|active| active.note_id() == note_id);
        if was_active {
            // pending edits of a note being deleted are discarded
            self.active = None;
        }
        self.store.delete_note(note_id).await?;
        tracing::info!(note_id = %note_id, owner_id = %self.owner_id, "note deleted");

        if was_active {
            let next = self.owned_notes().await?.into_iter().next();
            match next {
                Some(next) => {
                    self.activate(&next.id).await?;
                }
                None => {
                    self.create_note().await?;
                }
            }
        }
        Ok(())
    }

    /// Closes the active note, flushing its pending edits.
    pub async fn close(&mut self) {
        if let Some(active) = self.active.take() {
            active.close().await;
        }
    }

    async fn activate(&mut self, note_id: &str) -> AppResult<&mut NoteSession<S>> {
        if let Some(previous) = self.active.take() {
            previous.close().await;
        }
        let session = NoteSession::open(self.store.clone(), note_id, self.settings.clone()).await?;
        Ok(self.active.insert(session))
    }

    fn require_active(&mut self) -> AppResult<&mut NoteSession<S>> {
        self.active
            .as_mut()
            .ok_or_else(|| AppError::Internal("no active note".to_string()))
    }

    async fn owned_notes(&self) -> AppResult<Vec<Note>> {
        let mut notes = self.store.list_notes(&self.owner_id).await?;
        notes.sort_by(|a, b| b.pinned.cmp(&a.pinned).then(b.updated_at.cmp(&a.updated_at)));
        Ok(notes)
    }
}
