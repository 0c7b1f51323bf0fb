use crate::errors::{AppError, AppResult};
use crate::models::{AppSettings, Note, NoteWrite, StoreEvent};
use crate::policy::normalize_settings;
use crate::store::NoteStore;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const EVENT_BUFFER: usize = 256;
const NOTE_COLUMNS: &str = "id, owner_id, title, content, encrypted_content, is_private, pinned, tags_json,
     public_slug, created_at, updated_at";

/// SQLite-backed note store. Mutations are broadcast to live subscribers once
/// committed.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    events: broadcast::Sender<StoreEvent>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::from)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let db = Self {
            conn: Mutex::new(conn),
            events,
        };
        db.ensure_default_settings()?;
        Ok(db)
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'app'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        let settings = match raw {
            Some(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_default(),
            None => AppSettings::default(),
        };
        Ok(normalize_settings(settings))
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings = normalize_settings(serde_json::from_value::<AppSettings>(merged)?);

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, timestamp(Utc::now())],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'app'", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
                params![
                    serde_json::to_string(&AppSettings::default())?,
                    timestamp(Utc::now())
                ],
            )?;
        }
        Ok(())
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    fn publish(&self, event: StoreEvent) {
        // Only fails when nobody is subscribed.
        let _ = self.events.send(event);
    }

    fn insert_note(&self, owner_id: &str) -> AppResult<Note> {
        if owner_id.trim().is_empty() {
            return Err(AppError::Validation("owner id is required".to_string()));
        }
        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            title: String::new(),
            content: String::new(),
            encrypted_content: None,
            is_private: false,
            pinned: false,
            tags: BTreeSet::new(),
            public_slug: None,
            created_at: now,
            updated_at: now,
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notes (id, owner_id, title, content, encrypted_content, is_private, pinned,
               tags_json, public_slug, created_at, updated_at)
             VALUES (?1, ?2, '', '', NULL, 0, 0, '[]', NULL, ?3, ?3)",
            params![note.id, note.owner_id, timestamp(now)],
        )?;
        Ok(note)
    }

    fn fetch_note(&self, note_id: &str) -> AppResult<Option<Note>> {
        let conn = self.lock()?;
        let note = conn
            .query_row(
                &format!("SELECT {} FROM notes WHERE id = ?1", NOTE_COLUMNS),
                [note_id],
                parse_note_row,
            )
            .optional()?;
        Ok(note)
    }

    fn require_note(&self, note_id: &str) -> AppResult<Note> {
        self.fetch_note(note_id)?
            .ok_or_else(|| AppError::NotFound(format!("note {} not found", note_id)))
    }

    fn fetch_notes(&self, owner_id: &str) -> AppResult<Vec<Note>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {} FROM notes WHERE owner_id = ?1 ORDER BY pinned DESC, updated_at DESC",
            NOTE_COLUMNS
        ))?;
        let rows = statement.query_map([owner_id], parse_note_row)?;
        let mut notes = Vec::new();
        for row in rows {
            notes.push(row?);
        }
        Ok(notes)
    }

    fn update_note_content(&self, note_id: &str, write: &NoteWrite) -> AppResult<Note> {
        if write.is_private && !write.content.is_empty() {
            return Err(AppError::Policy("plaintext content cannot be stored on a private note".to_string()));
        }
        if !write.is_private && write.encrypted_content.is_some() {
            return Err(AppError::Policy("encrypted content requires a private note".to_string()));
        }
        let tags_json = serde_json::to_string(&write.tags)?;
        let changed = {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE notes
                 SET title = ?2,
                     content = ?3,
                     encrypted_content = ?4,
                     is_private = ?5,
                     tags_json = ?6,
                     public_slug = CASE WHEN ?5 THEN NULL ELSE public_slug END,
                     updated_at = ?7
                 WHERE id = ?1",
                params![
                    note_id,
                    write.title,
                    write.content,
                    write.encrypted_content,
                    write.is_private,
                    tags_json,
                    timestamp(Utc::now()),
                ],
            )?
        };
        if changed == 0 {
            return Err(AppError::NotFound(format!("note {} not found", note_id)));
        }
        self.require_note(note_id)
    }

    fn update_pinned(&self, note_id: &str, pinned: bool) -> AppResult<Note> {
        let changed = {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE notes SET pinned = ?2, updated_at = ?3 WHERE id = ?1",
                params![note_id, pinned, timestamp(Utc::now())],
            )?
        };
        if changed == 0 {
            return Err(AppError::NotFound(format!("note {} not found", note_id)));
        }
        self.require_note(note_id)
    }

    fn update_public_slug(&self, note_id: &str, slug: Option<&str>) -> AppResult<Note> {
        {
            let conn = self.lock()?;
            let is_private: Option<bool> = conn
                .query_row("SELECT is_private FROM notes WHERE id = ?1", [note_id], |row| row.get(0))
                .optional()?;
            let Some(is_private) = is_private else {
                return Err(AppError::NotFound(format!("note {} not found", note_id)));
            };
            if is_private && slug.is_some() {
                return Err(AppError::Policy("private notes cannot be shared".to_string()));
            }
            conn.execute(
                "UPDATE notes SET public_slug = ?2, updated_at = ?3 WHERE id = ?1",
                params![note_id, slug, timestamp(Utc::now())],
            )?;
        }
        self.require_note(note_id)
    }

    fn remove_note(&self, note_id: &str) -> AppResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM notes WHERE id = ?1", [note_id])?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("note {} not found", note_id)));
        }
        Ok(())
    }

    fn fetch_by_slug(&self, slug: &str) -> AppResult<Option<Note>> {
        let conn = self.lock()?;
        let note = conn
            .query_row(
                &format!("SELECT {} FROM notes WHERE public_slug = ?1 LIMIT 1", NOTE_COLUMNS),
                [slug],
                parse_note_row,
            )
            .optional()?;
        Ok(note)
    }

    /// Counts titles of the form `"{prefix} {digits}"`.
    fn count_titles(&self, owner_id: &str, prefix: &str) -> AppResult<usize> {
        let marker = format!("{} ", prefix);
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT title FROM notes WHERE owner_id = ?1 AND substr(title, 1, length(?2)) = ?2",
        )?;
        let rows = statement.query_map(params![owner_id, marker], |row| row.get::<_, String>(0))?;
        let mut count = 0;
        for title in rows {
            let title = title?;
            let Some(number) = title.strip_prefix(&marker) else {
                continue;
            };
            if !number.is_empty() && number.chars().all(|ch| ch.is_ascii_digit()) {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl NoteStore for Database {
    async fn create_note(&self, owner_id: &str) -> AppResult<Note> {
        let note = self.insert_note(owner_id)?;
        tracing::debug!(note_id = %note.id, owner_id = %owner_id, "note created");
        self.publish(StoreEvent::Changed(note.clone()));
        Ok(note)
    }

    async fn get_note(&self, note_id: &str) -> AppResult<Option<Note>> {
        self.fetch_note(note_id)
    }

    async fn list_notes(&self, owner_id: &str) -> AppResult<Vec<Note>> {
        self.fetch_notes(owner_id)
    }

    async fn write_note(&self, note_id: &str, write: &NoteWrite) -> AppResult<Note> {
        let note = self.update_note_content(note_id, write)?;
        self.publish(StoreEvent::Changed(note.clone()));
        Ok(note)
    }

    async fn set_pinned(&self, note_id: &str, pinned: bool) -> AppResult<Note> {
        let note = self.update_pinned(note_id, pinned)?;
        self.publish(StoreEvent::Changed(note.clone()));
        Ok(note)
    }

    async fn set_public_slug(&self, note_id: &str, slug: Option<&str>) -> AppResult<Note> {
        let note = self.update_public_slug(note_id, slug)?;
        self.publish(StoreEvent::Changed(note.clone()));
        Ok(note)
    }

    async fn delete_note(&self, note_id: &str) -> AppResult<()> {
        self.remove_note(note_id)?;
        tracing::debug!(note_id = %note_id, "note deleted");
        self.publish(StoreEvent::Deleted {
            note_id: note_id.to_string(),
        });
        Ok(())
    }

    async fn find_by_slug(&self, slug: &str) -> AppResult<Option<Note>> {
        self.fetch_by_slug(slug)
    }

    async fn count_titled(&self, owner_id: &str, prefix: &str) -> AppResult<usize> {
        self.count_titles(owner_id, prefix)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

fn parse_note_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    let tags_raw: String = row.get(7)?;
    Ok(Note {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        encrypted_content: row.get(4)?,
        is_private: row.get(5)?,
        pinned: row.get(6)?,
        tags: serde_json::from_str::<BTreeSet<String>>(&tags_raw).unwrap_or_default(),
        public_slug: row.get(8)?,
        created_at: parse_time(&row.get::<_, String>(9)?)?,
        updated_at: parse_time(&row.get::<_, String>(10)?)?,
    })
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::errors::AppError;
    use crate::models::{NoteWrite, StoreEvent};
    use crate::store::NoteStore;
    use std::collections::BTreeSet;

    fn plain_write(title: &str, content: &str) -> NoteWrite {
        NoteWrite {
            title: title.to_string(),
            content: content.to_string(),
            encrypted_content: None,
            is_private: false,
            tags: crate::tags::extract_tags(content),
        }
    }

    #[tokio::test]
    async fn database_can_create_write_and_read_note() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("notes.db")).expect("db");

        let created = db.create_note("owner-1").await.expect("create");
        assert!(created.title.is_empty());
        assert!(!created.is_private);

        let written = db
            .write_note(&created.id, &plain_write("Groceries", "#food and #home"))
            .await
            .expect("write");
        assert_eq!(written.title, "Groceries");
        assert_eq!(
            written.tags,
            ["food", "home"].iter().map(|tag| tag.to_string()).collect::<BTreeSet<_>>()
        );
        assert!(written.updated_at >= created.updated_at);

        let loaded = db.get_note(&created.id).await.expect("get").expect("exists");
        assert_eq!(loaded, written);
    }

    #[tokio::test]
    async fn private_write_clears_public_slug() {
        let db = Database::open_in_memory().expect("db");
        let note = db.create_note("owner").await.expect("create");
        db.set_public_slug(&note.id, Some("shared-abc123")).await.expect("share");

        let written = db
            .write_note(
                &note.id,
                &NoteWrite {
                    title: "secret".to_string(),
                    content: String::new(),
                    encrypted_content: Some("{}".to_string()),
                    is_private: true,
                    tags: BTreeSet::new(),
                },
            )
            .await
            .expect("write");
        assert!(written.is_private);
        assert_eq!(written.public_slug, None);
        assert!(db.find_by_slug("shared-abc123").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn sharing_a_private_note_is_rejected() {
        let db = Database::open_in_memory().expect("db");
        let note = db.create_note("owner").await.expect("create");
        db.write_note(
            &note.id,
            &NoteWrite {
                title: String::new(),
                content: String::new(),
                encrypted_content: None,
                is_private: true,
                tags: BTreeSet::new(),
            },
        )
        .await
        .expect("write");

        let error = db
            .set_public_slug(&note.id, Some("nope-123456"))
            .await
            .expect_err("must reject");
        assert!(matches!(error, AppError::Policy(_)));
    }

    #[tokio::test]
    async fn plaintext_on_private_write_is_rejected() {
        let db = Database::open_in_memory().expect("db");
        let note = db.create_note("owner").await.expect("create");
        let error = db
            .write_note(
                &note.id,
                &NoteWrite {
                    title: String::new(),
                    content: "leak".to_string(),
                    encrypted_content: None,
                    is_private: true,
                    tags: BTreeSet::new(),
                },
            )
            .await
            .expect_err("must reject");
        assert!(matches!(error, AppError::Policy(_)));
    }

    #[tokio::test]
    async fn list_orders_pinned_then_recent() {
        let db = Database::open_in_memory().expect("db");
        let first = db.create_note("owner").await.expect("first");
        let second = db.create_note("owner").await.expect("second");
        let third = db.create_note("owner").await.expect("third");
        db.create_note("someone-else").await.expect("other");

        db.write_note(&second.id, &plain_write("second", "")).await.expect("touch");
        db.set_pinned(&first.id, true).await.expect("pin");

        let ids = db
            .list_notes("owner")
            .await
            .expect("list")
            .into_iter()
            .map(|note| note.id)
            .collect::<Vec<_>>();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], first.id);
        assert!(ids.contains(&third.id));
    }

    #[tokio::test]
    async fn mutations_are_broadcast() {
        let db = Database::open_in_memory().expect("db");
        let note = db.create_note("owner").await.expect("create");
        let mut events = db.subscribe();

        db.set_pinned(&note.id, true).await.expect("pin");
        match events.recv().await.expect("event") {
            StoreEvent::Changed(changed) => assert!(changed.pinned),
            other => panic!("unexpected event {:?}", other),
        }

        db.delete_note(&note.id).await.expect("delete");
        assert_eq!(
            events.recv().await.expect("event"),
            StoreEvent::Deleted { note_id: note.id.clone() }
        );
        assert!(matches!(db.delete_note(&note.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn counts_titles_by_prefix() {
        let db = Database::open_in_memory().expect("db");
        let a = db.create_note("owner").await.expect("a");
        let b = db.create_note("owner").await.expect("b");
        db.write_note(&a.id, &plain_write("Untitled note 1", "x")).await.expect("a");
        db.write_note(&b.id, &plain_write("Groceries", "x")).await.expect("b");
        for title in ["Untitled notebook ideas", "Untitled note draft", "Untitled note "] {
            let note = db.create_note("owner").await.expect("create");
            db.write_note(&note.id, &plain_write(title, "x")).await.expect("write");
        }
        assert_eq!(db.count_titled("owner", "Untitled note").await.expect("count"), 1);
        assert_eq!(db.count_titled("other", "Untitled note").await.expect("count"), 0);
    }

    #[test]
    fn settings_are_seeded_and_merged() {
        let db = Database::open_in_memory().expect("db");
        assert_eq!(db.get_settings().expect("settings").autosave_debounce_ms, 1000);

        let updated = db
            .update_settings(serde_json::json!({ "autosaveDebounceMs": 800, "kdf": { "iterations": 3 } }))
            .expect("update");
        assert_eq!(updated.autosave_debounce_ms, 800);
        assert_eq!(updated.kdf.iterations, 3);
        assert_eq!(db.get_settings().expect("settings"), updated);
    }
}
