//! Reversible cipher for credentials at rest
//!
//! PPPoE passwords must be recoverable (the router API takes them in
//! plaintext on re-provisioning), so they are stored AES-256-GCM encrypted
//! rather than hashed. Ciphertext layout: 12-byte nonce || AEAD output,
//! base64 encoded.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("SECRET_CIPHER_KEY is not set")]
    KeyMissing,
    #[error("cipher key must decode to 32 bytes")]
    KeyInvalid,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// AES-256-GCM cipher keyed from the environment
#[derive(Clone)]
pub struct SecretCipher {
    key: Key<Aes256Gcm>,
}

impl SecretCipher {
    pub fn from_env() -> Result<Self, CipherError> {
        let key_b64 = std::env::var("SECRET_CIPHER_KEY").map_err(|_| CipherError::KeyMissing)?;
        Self::from_base64(&key_b64)
    }

    pub fn from_base64(key_b64: &str) -> Result<Self, CipherError> {
        let raw = B64
            .decode(key_b64.as_bytes())
            .map_err(|_| CipherError::KeyInvalid)?;
        if raw.len() != 32 {
            return Err(CipherError::KeyInvalid);
        }
        let key = *Key::<Aes256Gcm>::from_slice(&raw);
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut buffer = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        buffer.extend_from_slice(&nonce);
        buffer.extend_from_slice(&ciphertext);
        Ok(B64.encode(buffer))
    }

    pub fn decrypt(&self, data_b64: &str) -> Result<String, CipherError> {
        let data = B64
            .decode(data_b64.as_bytes())
            .map_err(|e| CipherError::Decrypt(e.to_string()))?;
        if data.len() <= NONCE_LEN {
            return Err(CipherError::Decrypt("ciphertext too short".to_string()));
        }
        let (nonce_bytes, cipher_bytes) = data.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.key);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), cipher_bytes)
            .map_err(|e| CipherError::Decrypt(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CipherError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> SecretCipher {
        // 32 zero bytes, base64 encoded
        SecretCipher::from_base64(&B64.encode([0u8; 32])).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let cipher = test_cipher();
        let encrypted = cipher.encrypt("s3cret-PPPoE-pass").unwrap();
        assert_ne!(encrypted, "s3cret-PPPoE-pass");
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "s3cret-PPPoE-pass");
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same input").unwrap();
        let b = cipher.encrypt("same input").unwrap();
        assert_ne!(a, b, "nonce reuse would leak identical plaintexts");
    }

    #[test]
    fn test_rejects_short_key() {
        assert!(SecretCipher::from_base64(&B64.encode([0u8; 16])).is_err());
        assert!(SecretCipher::from_base64("not base64!!").is_err());
    }

    #[test]
    fn test_rejects_tampered_ciphertext() {
        let cipher = test_cipher();
        let encrypted = cipher.encrypt("payload").unwrap();
        let mut raw = B64.decode(encrypted.as_bytes()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        assert!(cipher.decrypt(&B64.encode(raw)).is_err());
    }
}
