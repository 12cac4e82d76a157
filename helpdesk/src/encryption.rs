//! Encryption of mailbox credentials at rest
//!
//! Uses AES-256-GCM with a key derived from the configured application key
//! (`[app] key`) via Argon2id. Stored values are base64 of `nonce || ciphertext`.
//! Empty secrets stay empty so unset passwords remain distinguishable.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Argon2, ParamsBuilder};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::HelpdeskError;

/// Application-specific salt for key derivation
const APP_SALT: &[u8] = b"helpdesk.v1.mailbox-credentials";

/// Nonce size for AES-GCM (96 bits / 12 bytes)
const NONCE_SIZE: usize = 12;

pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Build a cipher from the application key.
    pub fn new(app_key: &str) -> Result<Self, HelpdeskError> {
        let key = Self::derive_key(app_key)?;
        let cipher = Aes256Gcm::new(&key.into());
        debug!("Initialized credential encryption");
        Ok(Self { cipher })
    }

    /// Cipher for the configured key. Without `[app] key` the salt alone is
    /// used, which only obfuscates the stored passwords.
    pub fn from_config(config: &AppConfig) -> Result<Self, HelpdeskError> {
        match config.app.key.as_deref() {
            Some(key) if !key.is_empty() => Self::new(key),
            _ => {
                warn!("No [app] key configured, mailbox passwords are only obfuscated");
                Self::new("")
            }
        }
    }

    fn derive_key(app_key: &str) -> Result<[u8; 32], HelpdeskError> {
        let mut key_material = Vec::with_capacity(app_key.len() + APP_SALT.len());
        key_material.extend_from_slice(app_key.as_bytes());
        key_material.extend_from_slice(APP_SALT);

        let mut output_key = [0u8; 32];

        let params = ParamsBuilder::new()
            .m_cost(19456) // 19 MiB
            .t_cost(2)
            .p_cost(1)
            .build()
            .map_err(|e| {
                HelpdeskError::Encryption(format!("Failed to build Argon2 params: {}", e))
            })?;

        Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
            .hash_password_into(&key_material, APP_SALT, &mut output_key)
            .map_err(|e| {
                HelpdeskError::Encryption(format!("Argon2 key derivation failed: {}", e))
            })?;

        Ok(output_key)
    }

    /// Encrypt a secret for storage.
    pub fn seal(&self, plaintext: &str) -> Result<String, HelpdeskError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        use aes_gcm::aead::rand_core::RngCore;
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| HelpdeskError::Encryption(format!("AES-GCM encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    /// Decrypt a stored secret.
    pub fn open(&self, sealed: &str) -> Result<String, HelpdeskError> {
        if sealed.is_empty() {
            return Ok(String::new());
        }

        let combined = BASE64.decode(sealed).map_err(|e| {
            HelpdeskError::Encryption(format!("Invalid base64 encoding: {}", e))
        })?;

        if combined.len() < NONCE_SIZE {
            return Err(HelpdeskError::Encryption(format!(
                "Encrypted data too short: {} bytes",
                combined.len()
            )));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self.cipher.decrypt(nonce, ciphertext).map_err(|e| {
            HelpdeskError::Encryption(format!(
                "AES-GCM decryption failed (wrong app key or corrupted data): {}",
                e
            ))
        })?;

        String::from_utf8(plaintext_bytes).map_err(|e| {
            HelpdeskError::Encryption(format!("Decrypted data is not valid UTF-8: {}", e))
        })
    }
}
