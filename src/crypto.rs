use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

const CIPHER_ALG: &str = "aes-256-gcm";
const KDF_ALG: &str = "argon2id";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const MAX_MEMORY_KIB: u32 = 256 * 1024;
const MAX_ITERATIONS: u32 = 16;
const MAX_PARALLELISM: u32 = 8;

/// Argon2id cost parameters used to stretch a session passphrase into a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl KdfParams {
    /// True when deriving a key with these costs stays within the bounds this
    /// crate is willing to spend on one unlock or save.
    pub fn within_limits(&self) -> bool {
        (1..=MAX_PARALLELISM).contains(&self.parallelism)
            && (1..=MAX_ITERATIONS).contains(&self.iterations)
            && (8 * self.parallelism..=MAX_MEMORY_KIB).contains(&self.memory_kib)
    }

    pub fn clamped(self) -> Self {
        let parallelism = self.parallelism.clamp(1, MAX_PARALLELISM);
        Self {
            memory_kib: self.memory_kib.clamp(8 * parallelism, MAX_MEMORY_KIB),
            iterations: self.iterations.clamp(1, MAX_ITERATIONS),
            parallelism,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    alg: String,
    kdf: String,
    m: u32,
    t: u32,
    p: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// Encrypts `plaintext` under `passphrase`, returning a self-describing JSON
/// envelope. Every call draws a fresh salt and nonce.
pub fn encrypt(plaintext: &str, passphrase: &str, params: &KdfParams) -> AppResult<String> {
    let salt: [u8; SALT_LEN] = rand::random();
    let key = derive_key(passphrase, &salt, params)?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|error| AppError::Internal(error.to_string()))?;
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();
    let encrypted = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|error| AppError::Internal(error.to_string()))?;

    let engine = base64::engine::general_purpose::STANDARD;
    let envelope = Envelope {
        alg: CIPHER_ALG.to_string(),
        kdf: KDF_ALG.to_string(),
        m: params.memory_kib,
        t: params.iterations,
        p: params.parallelism,
        salt: engine.encode(salt),
        nonce: engine.encode(nonce_bytes),
        ciphertext: engine.encode(encrypted),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decrypts an envelope produced by [`encrypt`]. A wrong passphrase and a
/// tampered envelope are indistinguishable and both fail.
pub fn decrypt(envelope: &str, passphrase: &str) -> AppResult<String> {
    let envelope: Envelope = serde_json::from_str(envelope)
        .map_err(|_| AppError::Decryption("encrypted content is not a valid envelope".to_string()))?;
    if envelope.alg != CIPHER_ALG || envelope.kdf != KDF_ALG {
        return Err(AppError::Decryption(format!(
            "unsupported envelope {}/{}",
            envelope.alg, envelope.kdf
        )));
    }

    let engine = base64::engine::general_purpose::STANDARD;
    let salt = engine
        .decode(&envelope.salt)
        .map_err(|_| AppError::Decryption("malformed salt".to_string()))?;
    let nonce_bytes = engine
        .decode(&envelope.nonce)
        .map_err(|_| AppError::Decryption("malformed nonce".to_string()))?;
    let ciphertext = engine
        .decode(&envelope.ciphertext)
        .map_err(|_| AppError::Decryption("malformed ciphertext".to_string()))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(AppError::Decryption("malformed nonce".to_string()));
    }

    let params = KdfParams {
        memory_kib: envelope.m,
        iterations: envelope.t,
        parallelism: envelope.p,
    };
    if !params.within_limits() {
        return Err(AppError::Decryption(
            "key derivation cost is outside the accepted range".to_string(),
        ));
    }
    let key = derive_key(passphrase, &salt, &params)
        .map_err(|_| AppError::Decryption("invalid key derivation parameters".to_string()))?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|error| AppError::Internal(error.to_string()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|_| AppError::Decryption("wrong passphrase or corrupted content".to_string()))?;

    String::from_utf8(plaintext).map_err(|_| AppError::Decryption("decrypted content is not UTF-8".to_string()))
}

fn derive_key(passphrase: &str, salt: &[u8], params: &KdfParams) -> AppResult<[u8; KEY_LEN]> {
    let argon_params = Params::new(params.memory_kib, params.iterations, params.parallelism, Some(KEY_LEN))
        .map_err(|error| AppError::Validation(format!("invalid kdf parameters: {}", error)))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut key = [0u8; KEY_LEN];
    argon
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|error| AppError::Internal(error.to_string()))?;
    Ok(key)
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}
