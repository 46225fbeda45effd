//! AES-256-GCM artifact encryption.
//!
//! Encrypted files hold the 12-byte nonce followed by the ciphertext. Each
//! export gets a fresh random key.

use crate::error::{DeliveryError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::Rng;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Extension appended to encrypted artifacts.
pub const ENCRYPTED_EXTENSION: &str = "enc";

const NONCE_LEN: usize = 12;

/// A 256-bit artifact key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Fresh random key.
    pub fn generate() -> Self {
        Self(rand::thread_rng().gen())
    }

    /// Base64 form handed to the recipient.
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.0)
    }

    /// Parse the base64 form.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DeliveryError::InvalidKey(e.to_string()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DeliveryError::InvalidKey("key must be 32 bytes".to_string()))?;
        Ok(Self(key))
    }
}

// Never print key material.
impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Encrypts and decrypts artifacts.
#[derive(Debug, Default, Clone)]
pub struct ArtifactEncryptor;

impl ArtifactEncryptor {
    /// Create an encryptor.
    pub fn new() -> Self {
        Self
    }

    /// Encrypt bytes; output is nonce || ciphertext.
    pub fn encrypt(&self, plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(&key.0.into());
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| DeliveryError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt bytes produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(DeliveryError::Decryption("ciphertext too short".to_string()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&key.0.into());
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| DeliveryError::Decryption(e.to_string()))
    }

    /// Encrypt a file in place: writes `<path>.enc` and removes the
    /// plaintext. Returns the encrypted file's path.
    pub async fn encrypt_file(&self, path: &Path, key: &EncryptionKey) -> Result<PathBuf> {
        let plaintext = fs::read(path).await?;
        let encrypted = self.encrypt(&plaintext, key)?;

        let mut target = path.as_os_str().to_owned();
        target.push(".");
        target.push(ENCRYPTED_EXTENSION);
        let target = PathBuf::from(target);

        fs::write(&target, &encrypted).await?;
        fs::remove_file(path).await?;
        debug!("Encrypted artifact ({} bytes)", encrypted.len());
        Ok(target)
    }
}
