use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

use crate::errors::{AppError, AppResult};
use crate::models::{Note, PublicNote};
use crate::store::NoteStore;

/// Resolves a public link to the three fields anonymous readers may see.
pub async fn load_public_note<S: NoteStore + ?Sized>(store: &S, slug: &str) -> AppResult<PublicNote> {
    let slug = slug.trim();
    if slug.is_empty() {
        return Err(AppError::Validation("slug is required".to_string()));
    }
    let note = store
        .find_by_slug(slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no public note for slug {}", slug)))?;
    public_view(note)
}

fn public_view(note: Note) -> AppResult<PublicNote> {
    if note.is_private {
        tracing::warn!(note_id = %note.id, "public link resolved to a private note");
        return Err(AppError::Policy("this note is private".to_string()));
    }
    Ok(PublicNote {
        title: note.title,
        content: note.content,
        updated_at: note.updated_at,
    })
}

pub fn router<S: NoteStore>(store: Arc<S>) -> Router {
    Router::new()
        .route("/api/notes/public/", get(missing_slug))
        .route("/api/notes/public/:slug", get(public_note::<S>))
        .with_state(store)
}

async fn public_note<S: NoteStore>(
    State(store): State<Arc<S>>,
    Path(slug): Path<String>,
) -> AppResult<Json<PublicNote>> {
    let note = load_public_note(store.as_ref(), &slug).await?;
    tracing::debug!(slug = %slug, "served public note");
    Ok(Json(note))
}

async fn missing_slug() -> AppResult<Json<PublicNote>> {
    Err(AppError::Validation("slug is required".to_string()))
}
