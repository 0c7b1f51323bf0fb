use crate::errors::{AppError, AppResult};
use crate::models::{AppSettings, Note};

const MIN_DEBOUNCE_MS: u64 = 500;
const MAX_DEBOUNCE_MS: u64 = 1500;
const MIN_SAVED_INDICATOR_MS: u64 = 250;
const MAX_SAVED_INDICATOR_MS: u64 = 10_000;
const MIN_SLUG_SUFFIX_LEN: usize = 4;
const MAX_SLUG_SUFFIX_LEN: usize = 16;
const MAX_PASSPHRASE_LEN: usize = 1024;

/// Clamps tunables into the ranges the controller is designed for.
pub fn normalize_settings(mut settings: AppSettings) -> AppSettings {
    settings.autosave_debounce_ms = settings.autosave_debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
    settings.saved_indicator_ms = settings
        .saved_indicator_ms
        .clamp(MIN_SAVED_INDICATOR_MS, MAX_SAVED_INDICATOR_MS);
    settings.share_slug_suffix_len = settings
        .share_slug_suffix_len
        .clamp(MIN_SLUG_SUFFIX_LEN, MAX_SLUG_SUFFIX_LEN);
    settings.kdf = settings.kdf.clamped();
    if settings.untitled_title_prefix.trim().is_empty() {
        settings.untitled_title_prefix = AppSettings::default().untitled_title_prefix;
    }
    if settings.share_slug_fallback.trim().is_empty() {
        settings.share_slug_fallback = AppSettings::default().share_slug_fallback;
    }
    settings
}

pub fn validate_passphrase(passphrase: &str) -> AppResult<()> {
    if passphrase.is_empty() {
        return Err(AppError::PassphraseRequired(
            "a passphrase is required to protect this note".to_string(),
        ));
    }
    if passphrase.len() > MAX_PASSPHRASE_LEN {
        return Err(AppError::Validation(format!(
            "passphrase exceeds {} bytes",
            MAX_PASSPHRASE_LEN
        )));
    }
    Ok(())
}

/// Sharing and privacy are mutually exclusive.
pub fn ensure_shareable(note: &Note, locally_private: bool) -> AppResult<()> {
    if note.is_private || locally_private {
        return Err(AppError::Policy("private notes cannot be shared".to_string()));
    }
    Ok(())
}

pub fn ensure_owner(note: &Note, owner_id: &str) -> AppResult<()> {
    if note.owner_id != owner_id {
        return Err(AppError::NotFound(format!("note {} not found", note.id)));
    }
    Ok(())
}
