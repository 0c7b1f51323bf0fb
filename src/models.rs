use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::crypto::KdfParams;

/// A note as held by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub content: String,
    pub encrypted_content: Option<String>,
    pub is_private: bool,
    pub pinned: bool,
    pub tags: BTreeSet<String>,
    pub public_slug: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn summary(&self) -> NoteSummary {
        NoteSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            pinned: self.pinned,
            is_private: self.is_private,
            tags: self.tags.iter().cloned().collect(),
            updated_at: self.updated_at,
        }
    }
}

/// Body of a content save. The store stamps `updated_at` and clears the public
/// slug whenever `is_private` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteWrite {
    pub title: String,
    pub content: String,
    pub encrypted_content: Option<String>,
    pub is_private: bool,
    pub tags: BTreeSet<String>,
}

/// The `(title, content, is_private)` tuple compared to detect no-op saves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteSnapshot {
    pub title: String,
    pub content: String,
    pub is_private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteSummary {
    pub id: String,
    pub title: String,
    pub pinned: bool,
    pub is_private: bool,
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// The three fields exposed through a public sharing link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicNote {
    pub title: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Changed(Note),
    Deleted { note_id: String },
}

impl StoreEvent {
    pub fn note_id(&self) -> &str {
        match self {
            Self::Changed(note) => &note.id,
            Self::Deleted { note_id } => note_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockState {
    Unprotected,
    Locked,
    Unlocked,
}

impl LockState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unprotected => "unprotected",
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub autosave_debounce_ms: u64,
    pub saved_indicator_ms: u64,
    pub untitled_title_prefix: String,
    pub share_slug_fallback: String,
    pub share_slug_suffix_len: usize,
    pub kdf: KdfParams,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: 1000,
            saved_indicator_ms: 2000,
            untitled_title_prefix: "Untitled note".to_string(),
            share_slug_fallback: "note".to_string(),
            share_slug_suffix_len: 6,
            kdf: KdfParams::default(),
        }
    }
}
