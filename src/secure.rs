//! Field-level encryption for columns declared `secure`.

use crate::dto::Row;
use crate::entity::Entity;
use crate::error::AppError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Marks a stored value as ciphertext.
pub const CIPHER_PREFIX: &str = "enc:v1:";

const NONCE_LEN: usize = 12;

/// AES-256-GCM keyed by the SHA-256 digest of a process-wide secret. Output is
/// `CIPHER_PREFIX` + base64(nonce || ciphertext).
///
/// The nonce is derived from the key and the plaintext, so equal plaintexts encrypt to equal
/// ciphertexts and secure columns stay usable in equality filters.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
    key: [u8; 32],
}

impl FieldCipher {
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        FieldCipher {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
            key,
        }
    }

    fn nonce_for(&self, plain: &str) -> [u8; NONCE_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(plain.as_bytes());
        let digest = hasher.finalize();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        nonce
    }

    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(CIPHER_PREFIX)
    }

    /// No-op for ciphertext this key produced. Any other input is sealed, including text
    /// that only looks tagged.
    pub fn encrypt(&self, plain: &str) -> Result<String, AppError> {
        if Self::is_encrypted(plain) && self.decrypt(plain).is_ok() {
            return Ok(plain.to_string());
        }
        let nonce = self.nonce_for(plain);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
            .map_err(|e| AppError::Crypto(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(format!("{}{}", CIPHER_PREFIX, STANDARD.encode(out)))
    }

    /// No-op for values without the prefix. A tagged value that fails to open is an error.
    pub fn decrypt(&self, stored: &str) -> Result<String, AppError> {
        let Some(encoded) = stored.strip_prefix(CIPHER_PREFIX) else {
            return Ok(stored.to_string());
        };
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| AppError::Crypto(format!("invalid ciphertext encoding: {}", e)))?;
        if raw.len() < NONCE_LEN {
            return Err(AppError::Crypto("ciphertext too short".into()));
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| AppError::Crypto("ciphertext does not open with the configured key".into()))?;
        String::from_utf8(plain).map_err(|e| AppError::Crypto(e.to_string()))
    }

    /// Encrypt the entity's secure string fields present in `row`.
    pub fn seal_row(&self, entity: &Entity, row: &mut Row) -> Result<(), AppError> {
        for field in entity.secure_fields() {
            if let Some(Value::String(s)) = row.get_mut(field) {
                *s = self.encrypt(s)?;
            }
        }
        Ok(())
    }

    /// Decrypt the entity's secure string fields present in `row`.
    pub fn open_row(&self, entity: &Entity, row: &mut Row) -> Result<(), AppError> {
        self.open_fields(row, entity.secure_fields())
    }

    /// Decrypt the named string fields present in `row`.
    pub fn open_fields<'a>(&self, row: &mut Row, fields: impl IntoIterator<Item = &'a str>) -> Result<(), AppError> {
        for field in fields {
            if let Some(Value::String(s)) = row.get_mut(field) {
                *s = self.decrypt(s)?;
            }
        }
        Ok(())
    }
}
