use chrono::{DateTime, Utc};
use tokio::time::{Duration, Instant};

use crate::models::SaveStatus;

/// Write-serialization state of one open note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Local state matches the last successful write.
    Clean,
    /// Local edits wait for the quiet window to elapse.
    Dirty { deadline: Instant },
    /// A write is in flight; `dirty` holds the deadline of edits made since.
    Saving { dirty: Option<Instant> },
}

/// Debounce machine collapsing rapid edits into single writes, with at most
/// one write in flight.
#[derive(Debug, Clone)]
pub struct Autosave {
    window: Duration,
    state: SyncState,
}

impl Autosave {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: SyncState::Clean,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Every edit restarts the quiet window.
    pub fn record_edit(&mut self, now: Instant) {
        let deadline = now + self.window;
        self.state = match self.state {
            SyncState::Clean | SyncState::Dirty { .. } => SyncState::Dirty { deadline },
            SyncState::Saving { .. } => SyncState::Saving { dirty: Some(deadline) },
        };
    }

    /// Deadline of the next debounced save, if one is armed and no write is
    /// in flight.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            SyncState::Dirty { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| deadline <= now)
    }

    /// True while local edits have not been committed remotely.
    pub fn has_pending_write(&self) -> bool {
        !matches!(self.state, SyncState::Clean)
    }

    pub fn is_saving(&self) -> bool {
        matches!(self.state, SyncState::Saving { .. })
    }

    /// Enters `Saving`. Refused while another write is in flight.
    pub fn begin_save(&mut self) -> bool {
        if self.is_saving() {
            return false;
        }
        self.state = SyncState::Saving { dirty: None };
        true
    }

    /// Leaves `Saving`. Edits made during the write keep their deadline; a
    /// failed write re-arms a full window so the retry uses the retained
    /// local state.
    pub fn finish_save(&mut self, succeeded: bool, now: Instant) {
        let SyncState::Saving { dirty } = self.state else {
            return;
        };
        self.state = match (dirty, succeeded) {
            (Some(deadline), _) => SyncState::Dirty { deadline },
            (None, true) => SyncState::Clean,
            (None, false) => SyncState::Dirty {
                deadline: now + self.window,
            },
        };
    }

    /// Drops an armed deadline when there turned out to be nothing to write.
    pub fn mark_clean(&mut self) {
        if !self.is_saving() {
            self.state = SyncState::Clean;
        }
    }
}

/// The `idle -> saving -> saved -> idle` status shown next to the editor.
#[derive(Debug, Clone)]
pub struct SaveIndicator {
    status: SaveStatus,
    saved_until: Option<Instant>,
    last_saved_at: Option<DateTime<Utc>>,
    display: Duration,
}

impl SaveIndicator {
    pub fn new(display: Duration, last_saved_at: Option<DateTime<Utc>>) -> Self {
        Self {
            status: SaveStatus::Idle,
            saved_until: None,
            last_saved_at,
            display,
        }
    }

    pub fn status(&self) -> SaveStatus {
        self.status
    }

    pub fn begin(&mut self) {
        self.status = SaveStatus::Saving;
        self.saved_until = None;
    }

    pub fn succeeded(&mut self, now: Instant, saved_at: DateTime<Utc>) {
        self.status = SaveStatus::Saved;
        self.saved_until = Some(now + self.display);
        self.last_saved_at = Some(saved_at);
    }

    pub fn failed(&mut self) {
        self.status = SaveStatus::Idle;
        self.saved_until = None;
    }

    /// When the `saved` badge should fall back to idle.
    pub fn deadline(&self) -> Option<Instant> {
        match self.status {
            SaveStatus::Saved => self.saved_until,
            _ => None,
        }
    }

    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(until) if until <= now => {
                self.status = SaveStatus::Idle;
                self.saved_until = None;
                true
            }
            _ => false,
        }
    }

    /// Relative "last saved" text shown once the badge is idle.
    pub fn last_saved_label(&self, now: DateTime<Utc>) -> Option<String> {
        if self.status != SaveStatus::Idle {
            return None;
        }
        self.last_saved_at.map(|at| relative_time(at, now))
    }
}

pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - at).num_seconds().max(0);
    match seconds {
        0..=44 => "just now".to_string(),
        45..=89 => "a minute ago".to_string(),
        90..=3_599 => format!("{} minutes ago", (seconds + 30) / 60),
        3_600..=5_399 => "an hour ago".to_string(),
        5_400..=86_399 => format!("{} hours ago", (seconds + 1_800) / 3_600),
        86_400..=129_599 => "a day ago".to_string(),
        _ => format!("{} days ago", (seconds + 43_200) / 86_400),
    }
}
