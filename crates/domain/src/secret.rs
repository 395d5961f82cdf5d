//! Secret-at-rest encryption for per-tenant api keys.
//!
//! Values are sealed with AES-256-GCM and stored as
//! `base64(nonce || ciphertext)`. The core only decrypts at call time and
//! never logs plaintext.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use crate::error::{Error, Result};
use crate::settings::Settings;

const NONCE_LEN: usize = 12;

/// Reversible cipher over opaque strings.
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Build the cipher from settings.
    ///
    /// In production `ENCRYPTION_KEY` is mandatory; in development a random
    /// key is generated per process, which makes stored secrets unreadable
    /// after a restart (logged loudly so nobody is surprised).
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        match &settings.encryption_key {
            Some(encoded) => {
                let raw = BASE64
                    .decode(encoded)
                    .map_err(|e| Error::Secret(format!("invalid ENCRYPTION_KEY: {e}")))?;
                if raw.len() != 32 {
                    return Err(Error::Secret(
                        "ENCRYPTION_KEY must decode to exactly 32 bytes".into(),
                    ));
                }
                Ok(Self::from_key_bytes(&raw))
            }
            None if settings.is_production() => Err(Error::Secret(
                "ENCRYPTION_KEY must be set in production".into(),
            )),
            None => {
                tracing::warn!(
                    "ENCRYPTION_KEY not set; generating a temporary key for this process. \
                     Stored secrets will not survive a restart."
                );
                let mut raw = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut raw);
                Ok(Self::from_key_bytes(&raw))
            }
        }
    }

    fn from_key_bytes(raw: &[u8]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(raw);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt a value. Empty input stays empty.
    pub fn encrypt(&self, value: &str) -> Result<String> {
        if value.is_empty() {
            return Ok(String::new());
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, value.as_bytes())
            .map_err(|_| Error::Secret("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Decrypt a previously sealed value. Empty input stays empty.
    pub fn decrypt(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            return Ok(String::new());
        }

        let sealed = BASE64
            .decode(token)
            .map_err(|_| Error::Secret("decryption failed".into()))?;
        if sealed.len() < NONCE_LEN {
            return Err(Error::Secret("decryption failed".into()));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::Secret("decryption failed".into()))?;

        String::from_utf8(plaintext).map_err(|_| Error::Secret("decryption failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_cipher() -> SecretCipher {
        let settings = Settings::default();
        SecretCipher::from_settings(&settings).unwrap()
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = dev_cipher();
        for value in ["sk-or-v1-abcdef", "short", "with spaces and ünïcode"] {
            let sealed = cipher.encrypt(value).unwrap();
            assert_ne!(sealed, value);
            assert_eq!(cipher.decrypt(&sealed).unwrap(), value);
        }
    }

    #[test]
    fn empty_values_pass_through() {
        let cipher = dev_cipher();
        assert_eq!(cipher.encrypt("").unwrap(), "");
        assert_eq!(cipher.decrypt("").unwrap(), "");
    }

    #[test]
    fn tampered_token_fails() {
        let cipher = dev_cipher();
        let sealed = cipher.encrypt("secret").unwrap();
        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let tampered = BASE64.encode(bytes);
        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let a = dev_cipher();
        let b = dev_cipher();
        let sealed = a.encrypt("secret").unwrap();
        assert!(b.decrypt(&sealed).is_err());
    }

    #[test]
    fn production_requires_key() {
        let settings = Settings {
            environment: "production".into(),
            encryption_key: None,
            ..Settings::default()
        };
        assert!(SecretCipher::from_settings(&settings).is_err());
    }
}
