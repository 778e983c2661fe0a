//! Provider password encryption at rest using AES-256-GCM
//!
//! The key is generated on first use and kept in the `password_encryption_key`
//! setting. Encrypted values carry an `enc:` prefix; anything else is treated
//! as a plaintext password so hand-edited configuration keeps working.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::Engine;
use tracing::info;

use crate::models::setting::names;
use crate::models::Setting;
use crate::repository::SettingsRepository;
use crate::{Error, Result};

/// AES-256-GCM nonce size (96 bits / 12 bytes)
const NONCE_SIZE: usize = 12;

const ENCRYPTED_PREFIX: &str = "enc:";

const KEY_VERSION: u8 = 0x01;

#[derive(Clone)]
pub struct CredentialEncryption {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEncryption")
            .field("cipher", &"[REDACTED]")
            .finish()
    }
}

impl CredentialEncryption {
    /// Create from a 32-byte key
    pub fn new(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != 32 {
            return Err(Error::Internal(format!(
                "Password encryption key must be exactly 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn from_hex_key(hex_key: &str) -> Result<Self> {
        let key_bytes =
            hex::decode(hex_key).map_err(|e| Error::Internal(format!("Invalid hex key: {e}")))?;
        Self::new(&key_bytes)
    }

    /// Load the key from the settings store, generating and persisting one on first use.
    pub async fn load_or_generate(settings: &SettingsRepository) -> Result<Self> {
        if let Some(setting) = settings.get(names::PASSWORD_ENCRYPTION_KEY).await? {
            return Self::from_hex_key(&setting.value);
        }

        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        settings
            .upsert(&Setting::new(names::PASSWORD_ENCRYPTION_KEY, hex::encode(key)))
            .await?;
        info!("Generated password encryption key");

        Self::new(&key)
    }

    /// Encrypt a password into `enc:<base64(version + nonce + ciphertext)>`
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Internal(format!("Password encryption failed: {e}")))?;

        let mut combined = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
        combined.push(KEY_VERSION);
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        let encoded = base64::engine::general_purpose::STANDARD.encode(&combined);
        Ok(format!("{ENCRYPTED_PREFIX}{encoded}"))
    }

    /// Decrypt an `enc:` value; plaintext passes through unchanged.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let Some(encoded) = stored.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(stored.to_string());
        };

        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Internal(format!("Invalid base64 in encrypted password: {e}")))?;

        if combined.len() < 1 + NONCE_SIZE {
            return Err(Error::Internal("Encrypted password too short".to_string()));
        }

        let version = combined[0];
        if version != KEY_VERSION {
            return Err(Error::Internal(format!(
                "Unsupported password encryption version: {version} (expected {KEY_VERSION})"
            )));
        }

        let (nonce_bytes, ciphertext) = combined[1..].split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                Error::Internal("Password decryption failed (wrong key or corrupted data)".to_string())
            })?;

        String::from_utf8(plaintext)
            .map_err(|e| Error::Internal(format!("Decrypted password is not UTF-8: {e}")))
    }

    #[must_use]
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENCRYPTED_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::memory_database;

    fn test_key() -> Vec<u8> {
        (0u8..32).collect()
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let enc = CredentialEncryption::new(&test_key()).unwrap();

        let encrypted = enc.encrypt("hunter2").unwrap();
        assert!(CredentialEncryption::is_encrypted(&encrypted));
        assert_eq!(enc.decrypt(&encrypted).unwrap(), "hunter2");
    }

    #[test]
    fn test_plaintext_passes_through() {
        let enc = CredentialEncryption::new(&test_key()).unwrap();
        assert_eq!(enc.decrypt("plain").unwrap(), "plain");
    }

    #[test]
    fn test_wrong_key_fails() {
        let enc = CredentialEncryption::new(&test_key()).unwrap();
        let other = CredentialEncryption::new(&[7u8; 32]).unwrap();

        let encrypted = enc.encrypt("secret").unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(CredentialEncryption::new(&[0u8; 16]).is_err());
        assert!(CredentialEncryption::from_hex_key("zz").is_err());
    }

    #[tokio::test]
    async fn test_key_is_generated_once() {
        let settings = SettingsRepository::new(memory_database().await);

        let first = CredentialEncryption::load_or_generate(&settings).await.unwrap();
        let encrypted = first.encrypt("secret").unwrap();

        let second = CredentialEncryption::load_or_generate(&settings).await.unwrap();
        assert_eq!(second.decrypt(&encrypted).unwrap(), "secret");
    }
}
