use std::fmt;

use crate::errors::{AppError, AppResult};
use crate::models::LockState;
use crate::policy::validate_passphrase;

/// A passphrase held in memory while one private note is unlocked.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionPassphrase(String);

impl SessionPassphrase {
    pub fn new(passphrase: &str) -> AppResult<Self> {
        validate_passphrase(passphrase)?;
        Ok(Self(passphrase.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionPassphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionPassphrase(***)")
    }
}

/// Lock state of the active note together with the passphrase that unlocked
/// it. A passphrase is held exactly when the state is `Unlocked`.
#[derive(Debug, Clone)]
pub struct PrivacyGate {
    state: LockState,
    passphrase: Option<SessionPassphrase>,
}

impl PrivacyGate {
    /// Gate for a freshly loaded note; private notes always start locked.
    pub fn for_note(is_private: bool) -> Self {
        Self {
            state: if is_private { LockState::Locked } else { LockState::Unprotected },
            passphrase: None,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_private(&self) -> bool {
        self.state != LockState::Unprotected
    }

    pub fn is_locked(&self) -> bool {
        self.state == LockState::Locked
    }

    pub fn passphrase(&self) -> Option<&SessionPassphrase> {
        self.passphrase.as_ref()
    }

    /// Turns privacy on with a newly chosen passphrase. Nothing is encrypted
    /// yet, so the passphrase is accepted as-is.
    pub fn enable(&mut self, passphrase: &str) -> AppResult<()> {
        match self.state {
            LockState::Unprotected => {
                self.passphrase = Some(SessionPassphrase::new(passphrase)?);
                self.state = LockState::Unlocked;
                Ok(())
            }
            LockState::Unlocked => Ok(()),
            LockState::Locked => Err(AppError::Locked("unlock the note first".to_string())),
        }
    }

    /// Attempts to unlock with `passphrase`. `open` receives the candidate and
    /// returns the plaintext; on any failure the note stays locked and the
    /// candidate is dropped.
    pub fn unlock<F>(&mut self, passphrase: &str, open: F) -> AppResult<String>
    where
        F: FnOnce(&SessionPassphrase) -> AppResult<String>,
    {
        if self.state != LockState::Locked {
            return Err(AppError::Policy("note is not locked".to_string()));
        }
        let candidate = SessionPassphrase::new(passphrase)?;
        let plaintext = open(&candidate)?;
        self.passphrase = Some(candidate);
        self.state = LockState::Unlocked;
        Ok(plaintext)
    }

    /// Turns privacy off. Refused while locked because the ciphertext could
    /// not be migrated.
    pub fn disable(&mut self) -> AppResult<()> {
        match self.state {
            LockState::Locked => Err(AppError::Locked(
                "unlock the note before removing its protection".to_string(),
            )),
            LockState::Unlocked | LockState::Unprotected => {
                self.passphrase = None;
                self.state = LockState::Unprotected;
                Ok(())
            }
        }
    }

    /// Forgets the passphrase and re-derives the state from the note's flag.
    pub fn reset(&mut self, is_private: bool) {
        *self = Self::for_note(is_private);
    }
}
