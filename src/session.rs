use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::future;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Duration, Instant};

use crate::autosave::{Autosave, SaveIndicator, SyncState};
use crate::crypto;
use crate::errors::{AppError, AppResult};
use crate::models::{AppSettings, LockState, Note, NoteSnapshot, NoteWrite, SaveStatus, StoreEvent};
use crate::policy::{ensure_shareable, validate_passphrase};
use crate::privacy::PrivacyGate;
use crate::slug::public_slug;
use crate::store::{LiveUpdate, NoteStore, NoteSubscription};
use crate::tags::{extract_tags, strip_html};

/// What a single [`NoteSession::next_event`] step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The quiet window elapsed and a write was issued.
    SaveStarted,
    /// The quiet window elapsed but nothing differed from the last write.
    Unchanged,
    Saved(DateTime<Utc>),
    /// The write failed; local edits are kept and retried next cycle.
    SaveFailed(String),
    /// The "saved" badge timed out.
    StatusIdle,
    /// A remote change replaced the local title and content.
    RemoteAdopted,
    /// A remote change arrived while a local write was pending; only its
    /// metadata was taken.
    RemoteIgnored,
    /// A remote change touched metadata only.
    RemoteMetadata,
    /// A remote change made the note unreadable with the current session.
    Locked,
    NoteDeleted,
    SubscriptionClosed,
    /// Nothing is armed; the session has no reason to wake.
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Unchanged,
    Saved(Note),
    Failed(String),
}

#[derive(Debug)]
enum SaveStart {
    Started,
    Unchanged,
    Failed(String),
}

#[derive(Debug)]
struct InFlight {
    snapshot: NoteSnapshot,
    handle: JoinHandle<AppResult<Note>>,
}

enum Wake {
    Written(Result<AppResult<Note>, JoinError>),
    Remote(Option<LiveUpdate>),
    Debounce,
    Badge,
}

/// Synchronization and encryption controller for the one note open in an
/// editor.
///
/// Local edits are debounced into writes with at most one write in flight.
/// Live updates from the store replace local title and content only while no
/// local write is pending. Private notes are encrypted before every write and
/// stay locked until the session supplies the passphrase.
pub struct NoteSession<S: NoteStore> {
    store: Arc<S>,
    settings: AppSettings,
    note: Note,
    title: String,
    content: String,
    last_saved: Option<NoteSnapshot>,
    gate: PrivacyGate,
    autosave: Autosave,
    indicator: SaveIndicator,
    in_flight: Option<InFlight>,
    subscription: Option<NoteSubscription>,
}

impl<S: NoteStore> NoteSession<S> {
    pub async fn open(store: Arc<S>, note_id: &str, settings: AppSettings) -> AppResult<Self> {
        let subscription = NoteSubscription::new(store.as_ref(), note_id);
        let note = match store.get_note(note_id).await {
            Ok(Some(note)) => note,
            Ok(None) => {
                tracing::warn!(note_id = %note_id, "note not found on load");
                return Err(AppError::NotFound(format!("note {} not found", note_id)));
            }
            Err(error) => {
                tracing::warn!(note_id = %note_id, error = %error, "failed to load note");
                return Err(error);
            }
        };

        let gate = PrivacyGate::for_note(note.is_private);
        let title = note.title.clone();
        let (content, last_saved) = if note.is_private {
            (String::new(), None)
        } else {
            let snapshot = NoteSnapshot {
                title: note.title.clone(),
                content: note.content.clone(),
                is_private: false,
            };
            (note.content.clone(), Some(snapshot))
        };

        tracing::debug!(note_id = %note_id, lock_state = gate.state().as_str(), "note session opened");
        Ok(Self {
            autosave: Autosave::new(Duration::from_millis(settings.autosave_debounce_ms)),
            indicator: SaveIndicator::new(
                Duration::from_millis(settings.saved_indicator_ms),
                Some(note.updated_at),
            ),
            store,
            settings,
            note,
            title,
            content,
            last_saved,
            gate,
            in_flight: None,
            subscription: Some(subscription),
        })
    }

    pub fn note_id(&self) -> &str {
        &self.note.id
    }

    /// Last known store document. Its content fields may lag local edits.
    pub fn note(&self) -> &Note {
        &self.note
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Working content, withheld while the note is locked.
    pub fn content(&self) -> Option<&str> {
        if self.gate.is_locked() {
            None
        } else {
            Some(&self.content)
        }
    }

    pub fn lock_state(&self) -> LockState {
        self.gate.state()
    }

    pub fn save_status(&self) -> SaveStatus {
        self.indicator.status()
    }

    pub fn sync_state(&self) -> SyncState {
        self.autosave.state()
    }

    pub fn has_pending_write(&self) -> bool {
        self.in_flight.is_some() || self.autosave.has_pending_write()
    }

    pub fn last_saved_label(&self, now: DateTime<Utc>) -> Option<String> {
        self.indicator.last_saved_label(now)
    }

    pub fn set_title(&mut self, title: &str) -> AppResult<()> {
        self.ensure_editable()?;
        if self.title != title {
            self.title = title.to_string();
            self.autosave.record_edit(Instant::now());
        }
        Ok(())
    }

    pub fn set_content(&mut self, content: &str) -> AppResult<()> {
        self.ensure_editable()?;
        if self.content != content {
            self.content = content.to_string();
            self.autosave.record_edit(Instant::now());
        }
        Ok(())
    }

    /// Marks the note private with a newly chosen passphrase. The next save
    /// writes ciphertext only and revokes any public link.
    pub fn enable_privacy(&mut self, passphrase: &str) -> AppResult<()> {
        let was_private = self.gate.is_private();
        self.gate.enable(passphrase)?;
        if !was_private {
            tracing::info!(note_id = %self.note.id, "privacy enabled");
            self.autosave.record_edit(Instant::now());
        }
        Ok(())
    }

    /// Unlocks a private note. A wrong passphrase leaves the note locked and
    /// is not retried.
    pub async fn unlock(&mut self, passphrase: &str) -> AppResult<()> {
        if !self.gate.is_locked() {
            return Err(AppError::Policy("note is not locked".to_string()));
        }
        validate_passphrase(passphrase)?;
        let opened = open_ciphertext_blocking(self.note.encrypted_content.clone(), passphrase.to_string()).await;
        match self.gate.unlock(passphrase, move |_| opened) {
            Ok(plaintext) => {
                self.content = plaintext;
                self.last_saved = Some(self.snapshot());
                self.autosave.mark_clean();
                tracing::info!(note_id = %self.note.id, "note unlocked");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(note_id = %self.note.id, error = %error, "unlock rejected");
                Err(error)
            }
        }
    }

    /// Removes protection from an unlocked note. The next save writes
    /// plaintext and drops the ciphertext.
    pub fn disable_privacy(&mut self) -> AppResult<()> {
        let was_private = self.gate.is_private();
        self.gate.disable()?;
        if was_private {
            tracing::info!(note_id = %self.note.id, "privacy disabled");
            self.autosave.record_edit(Instant::now());
        }
        Ok(())
    }

    pub async fn toggle_pin(&mut self) -> AppResult<bool> {
        let note = self.store.set_pinned(&self.note.id, !self.note.pinned).await?;
        self.absorb_metadata(&note);
        Ok(note.pinned)
    }

    /// Publishes a read-only link for this note and returns its slug.
    pub async fn enable_sharing(&mut self) -> AppResult<String> {
        ensure_shareable(&self.note, self.gate.is_private())?;
        if let Some(slug) = &self.note.public_slug {
            return Ok(slug.clone());
        }
        let slug = public_slug(
            &self.title,
            &self.settings.share_slug_fallback,
            self.settings.share_slug_suffix_len,
        );
        let note = self.store.set_public_slug(&self.note.id, Some(&slug)).await?;
        self.absorb_metadata(&note);
        tracing::info!(note_id = %self.note.id, slug = %slug, "public sharing enabled");
        Ok(slug)
    }

    /// Clears the public link in the store, whatever slug this session last
    /// saw.
    pub async fn disable_sharing(&mut self) -> AppResult<()> {
        let note = self.store.set_public_slug(&self.note.id, None).await?;
        self.absorb_metadata(&note);
        tracing::info!(note_id = %self.note.id, "public sharing disabled");
        Ok(())
    }

    /// Saves immediately, bypassing the quiet window. A write already in
    /// flight completes first. Unchanged state is not rewritten.
    pub async fn save_now(&mut self) -> AppResult<SaveOutcome> {
        if self.gate.is_locked() {
            return Err(AppError::Locked("unlock the note before saving".to_string()));
        }
        if let Some(flight) = self.in_flight.take() {
            let result = flight.handle.await;
            let _ = self.complete_save(flight.snapshot, result);
        }

        match self.start_save().await? {
            SaveStart::Unchanged => Ok(SaveOutcome::Unchanged),
            SaveStart::Failed(message) => Ok(SaveOutcome::Failed(message)),
            SaveStart::Started => {
                let Some(flight) = self.in_flight.take() else {
                    return Err(AppError::Internal("save started without a pending write".to_string()));
                };
                let result = flight.handle.await;
                match self.complete_save(flight.snapshot, result) {
                    Ok(note) => Ok(SaveOutcome::Saved(note)),
                    Err(error) => Ok(SaveOutcome::Failed(error.to_string())),
                }
            }
        }
    }

    /// Runs the session until something happens: a debounced save fires, a
    /// write completes, the saved badge expires, or a live update arrives.
    pub async fn next_event(&mut self) -> SessionEvent {
        loop {
            let debounce = if self.in_flight.is_none() && !self.gate.is_locked() {
                self.autosave.deadline()
            } else {
                None
            };
            let badge = self.indicator.deadline();
            if self.in_flight.is_none() && debounce.is_none() && badge.is_none() && self.subscription.is_none() {
                return SessionEvent::Idle;
            }

            let wake = tokio::select! {
                biased;
                result = wait_in_flight(&mut self.in_flight) => Wake::Written(result),
                change = next_change(&mut self.subscription) => Wake::Remote(change),
                _ = sleep_until(debounce) => Wake::Debounce,
                _ = sleep_until(badge) => Wake::Badge,
            };

            match wake {
                Wake::Written(result) => {
                    let Some(flight) = self.in_flight.take() else {
                        continue;
                    };
                    return match self.complete_save(flight.snapshot, result) {
                        Ok(note) => SessionEvent::Saved(note.updated_at),
                        Err(error) => SessionEvent::SaveFailed(error.to_string()),
                    };
                }
                Wake::Remote(Some(LiveUpdate::Event(StoreEvent::Changed(remote)))) => {
                    return self.apply_remote(remote).await;
                }
                Wake::Remote(Some(LiveUpdate::Event(StoreEvent::Deleted { .. }))) => {
                    tracing::info!(note_id = %self.note.id, "note deleted remotely");
                    self.subscription = None;
                    return SessionEvent::NoteDeleted;
                }
                Wake::Remote(Some(LiveUpdate::Lagged(_))) => match self.store.get_note(&self.note.id).await {
                    Ok(Some(remote)) => return self.apply_remote(remote).await,
                    Ok(None) => {
                        tracing::info!(note_id = %self.note.id, "note deleted while updates were missed");
                        self.subscription = None;
                        return SessionEvent::NoteDeleted;
                    }
                    Err(error) => {
                        tracing::warn!(note_id = %self.note.id, error = %error, "failed to resync note after lag");
                    }
                },
                Wake::Remote(None) => {
                    tracing::warn!(note_id = %self.note.id, "live update channel closed");
                    self.subscription = None;
                    return SessionEvent::SubscriptionClosed;
                }
                Wake::Debounce => {
                    return match self.start_save().await {
                        Ok(SaveStart::Started) => SessionEvent::SaveStarted,
                        Ok(SaveStart::Unchanged) => SessionEvent::Unchanged,
                        Ok(SaveStart::Failed(message)) => SessionEvent::SaveFailed(message),
                        Err(error) => SessionEvent::SaveFailed(error.to_string()),
                    };
                }
                Wake::Badge => {
                    if self.indicator.expire(Instant::now()) {
                        return SessionEvent::StatusIdle;
                    }
                }
            }
        }
    }

    /// Leaves the note: live updates are released, pending edits are flushed
    /// as a background write and a write already in flight is left to finish.
    pub async fn close(mut self) {
        self.subscription = None;
        let unsaved = matches!(
            self.autosave.state(),
            SyncState::Dirty { .. } | SyncState::Saving { dirty: Some(_) }
        );
        if unsaved && !self.gate.is_locked() {
            if let Some(flight) = self.in_flight.take() {
                let result = flight.handle.await;
                let _ = self.complete_save(flight.snapshot, result);
            }
            if let Err(error) = self.start_save().await {
                tracing::warn!(note_id = %self.note.id, error = %error, "failed to flush note on close");
            }
        }
        if self.in_flight.take().is_some() {
            tracing::debug!(note_id = %self.note.id, "write continues after close");
        }
    }

    fn ensure_editable(&self) -> AppResult<()> {
        if self.gate.is_locked() {
            return Err(AppError::Locked("unlock the note before editing".to_string()));
        }
        Ok(())
    }

    fn snapshot(&self) -> NoteSnapshot {
        NoteSnapshot {
            title: self.title.clone(),
            content: self.content.clone(),
            is_private: self.gate.is_private(),
        }
    }

    async fn start_save(&mut self) -> AppResult<SaveStart> {
        if self.gate.is_locked() {
            return Err(AppError::Locked("unlock the note before saving".to_string()));
        }
        if self.in_flight.is_some() {
            return Ok(SaveStart::Unchanged);
        }
        if self.last_saved.as_ref() == Some(&self.snapshot()) {
            self.autosave.mark_clean();
            return Ok(SaveStart::Unchanged);
        }

        self.autosave.begin_save();
        self.indicator.begin();

        if let Err(error) = self.assign_placeholder_title().await {
            return Ok(self.abort_save(error));
        }
        let snapshot = self.snapshot();
        let write = match self.build_write(&snapshot).await {
            Ok(write) => write,
            Err(error) => return Ok(self.abort_save(error)),
        };

        let store = self.store.clone();
        let note_id = self.note.id.clone();
        tracing::debug!(note_id = %note_id, is_private = write.is_private, "writing note");
        let handle = tokio::spawn(async move { store.write_note(&note_id, &write).await });
        self.in_flight = Some(InFlight { snapshot, handle });
        Ok(SaveStart::Started)
    }

    async fn assign_placeholder_title(&mut self) -> AppResult<()> {
        if !self.title.trim().is_empty() || strip_html(&self.content).trim().is_empty() {
            return Ok(());
        }
        let prefix = self.settings.untitled_title_prefix.clone();
        let existing = self.store.count_titled(&self.note.owner_id, &prefix).await?;
        self.title = format!("{} {}", prefix, existing + 1);
        Ok(())
    }

    async fn build_write(&self, snapshot: &NoteSnapshot) -> AppResult<NoteWrite> {
        if !snapshot.is_private {
            return Ok(NoteWrite {
                title: snapshot.title.clone(),
                content: snapshot.content.clone(),
                encrypted_content: None,
                is_private: false,
                tags: extract_tags(&snapshot.content),
            });
        }

        let Some(passphrase) = self.gate.passphrase() else {
            return Err(AppError::Locked("no passphrase held for this note".to_string()));
        };
        let encrypted_content = if snapshot.content.is_empty() {
            None
        } else {
            let plaintext = snapshot.content.clone();
            let passphrase = passphrase.expose().to_string();
            let params = self.settings.kdf;
            let sealed = tokio::task::spawn_blocking(move || crypto::encrypt(&plaintext, &passphrase, &params))
                .await
                .unwrap_or_else(|error| Err(AppError::Internal(error.to_string())))?;
            Some(sealed)
        };
        Ok(NoteWrite {
            title: snapshot.title.clone(),
            content: String::new(),
            encrypted_content,
            is_private: true,
            tags: BTreeSet::new(),
        })
    }

    fn abort_save(&mut self, error: AppError) -> SaveStart {
        tracing::warn!(note_id = %self.note.id, error = %error, "save could not start");
        self.indicator.failed();
        self.autosave.finish_save(false, Instant::now());
        SaveStart::Failed(error.to_string())
    }

    fn complete_save(
        &mut self,
        snapshot: NoteSnapshot,
        result: Result<AppResult<Note>, JoinError>,
    ) -> AppResult<Note> {
        let now = Instant::now();
        let result = result.unwrap_or_else(|error| Err(AppError::Internal(error.to_string())));
        match result {
            Ok(note) => {
                tracing::info!(note_id = %note.id, is_private = note.is_private, "note saved");
                self.last_saved = Some(snapshot);
                self.indicator.succeeded(now, note.updated_at);
                self.autosave.finish_save(true, now);
                self.note.title = note.title.clone();
                self.note.content = note.content.clone();
                self.note.encrypted_content = note.encrypted_content.clone();
                self.note.is_private = note.is_private;
                self.note.tags = note.tags.clone();
                // pin or share changes seen while the write was out are newer
                if note.updated_at > self.note.updated_at {
                    self.absorb_metadata(&note);
                }
                Ok(note)
            }
            Err(error) => {
                tracing::warn!(note_id = %self.note.id, error = %error, "note save failed; will retry");
                self.indicator.failed();
                self.autosave.finish_save(false, now);
                Err(error)
            }
        }
    }

    fn absorb_metadata(&mut self, remote: &Note) {
        if remote.updated_at < self.note.updated_at {
            return;
        }
        self.note.pinned = remote.pinned;
        self.note.public_slug = remote.public_slug.clone();
        self.note.updated_at = remote.updated_at;
    }

    async fn apply_remote(&mut self, remote: Note) -> SessionEvent {
        if remote.updated_at < self.note.updated_at {
            tracing::debug!(note_id = %self.note.id, "stale live update skipped");
            return SessionEvent::RemoteIgnored;
        }
        self.absorb_metadata(&remote);
        if self.has_pending_write() {
            tracing::debug!(note_id = %self.note.id, "remote content ignored while a local write is pending");
            return SessionEvent::RemoteIgnored;
        }

        let content_changed = remote.title != self.note.title
            || remote.content != self.note.content
            || remote.encrypted_content != self.note.encrypted_content
            || remote.is_private != self.note.is_private;
        self.note = remote;
        if !content_changed {
            return SessionEvent::RemoteMetadata;
        }
        self.adopt_remote_content().await
    }

    async fn adopt_remote_content(&mut self) -> SessionEvent {
        self.title = self.note.title.clone();
        if !self.note.is_private {
            if self.gate.is_private() {
                self.gate.reset(false);
            }
            self.content = self.note.content.clone();
            self.last_saved = Some(self.snapshot());
            tracing::debug!(note_id = %self.note.id, "adopted remote content");
            return SessionEvent::RemoteAdopted;
        }

        match self.gate.state() {
            LockState::Unlocked => {
                let passphrase = self.gate.passphrase().map(|p| p.expose().to_string()).unwrap_or_default();
                match open_ciphertext_blocking(self.note.encrypted_content.clone(), passphrase).await {
                    Ok(plaintext) => {
                        self.content = plaintext;
                        self.last_saved = Some(self.snapshot());
                        tracing::debug!(note_id = %self.note.id, "adopted remote encrypted content");
                        SessionEvent::RemoteAdopted
                    }
                    Err(error) => {
                        tracing::warn!(note_id = %self.note.id, error = %error, "remote content no longer opens");
                        self.lock();
                        SessionEvent::Locked
                    }
                }
            }
            LockState::Unprotected => {
                tracing::info!(note_id = %self.note.id, "note was made private remotely");
                self.lock();
                SessionEvent::Locked
            }
            LockState::Locked => SessionEvent::RemoteAdopted,
        }
    }

    fn lock(&mut self) {
        self.gate.reset(true);
        self.content.clear();
        self.last_saved = None;
        self.autosave.mark_clean();
    }
}

/// Opens stored ciphertext. A note without ciphertext has nothing to verify
/// against; a non-empty ciphertext that opens to nothing is a failure.
fn open_ciphertext(ciphertext: Option<&str>, passphrase: &str) -> AppResult<String> {
    let ciphertext = ciphertext.unwrap_or_default();
    if ciphertext.is_empty() {
        return Ok(String::new());
    }
    let plaintext = crypto::decrypt(ciphertext, passphrase)?;
    if plaintext.is_empty() {
        return Err(AppError::Decryption("decrypted content is empty".to_string()));
    }
    Ok(plaintext)
}

/// [`open_ciphertext`] on the blocking pool.
async fn open_ciphertext_blocking(ciphertext: Option<String>, passphrase: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || open_ciphertext(ciphertext.as_deref(), &passphrase))
        .await
        .unwrap_or_else(|error| Err(AppError::Internal(error.to_string())))
}

async fn wait_in_flight(slot: &mut Option<InFlight>) -> Result<AppResult<Note>, JoinError> {
    match slot {
        Some(flight) => (&mut flight.handle).await,
        None => future::pending().await,
    }
}

async fn next_change(subscription: &mut Option<NoteSubscription>) -> Option<LiveUpdate> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
