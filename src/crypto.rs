//! Encryption of user-supplied provider credentials.
//!
//! Secrets are sealed with AES-256-GCM. The stored blob is the 12-byte random
//! nonce followed by the ciphertext and tag. Decryption with the wrong key or
//! of a tampered blob fails; there is no fallback key.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::Engine;
use rand::RngCore;

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("no API key encryption key is configured")]
    MissingKey,

    #[error("encryption key is invalid: {0}")]
    InvalidKey(String),

    #[error("failed to encrypt API key")]
    Encrypt,

    #[error("failed to decrypt API key: {0}")]
    Decrypt(&'static str),
}

/// AES-256-GCM cipher for API keys at rest.
#[derive(Clone)]
pub struct ApiKeyCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for ApiKeyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyCipher").finish_non_exhaustive()
    }
}

impl ApiKeyCipher {
    pub const fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Builds a cipher from a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        Self::decode_key(encoded).map(Self::new)
    }

    /// Decodes and length-checks a base64 key.
    pub fn decode_key(encoded: &str) -> Result<[u8; 32], CryptoError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid base64: {e}")))?;

        <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
            CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len()))
        })
    }

    /// Generates a fresh random key, base64-encoded, for provisioning.
    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        base64::engine::general_purpose::STANDARD.encode(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<String, CryptoError> {
        if sealed.len() <= NONCE_LEN {
            return Err(CryptoError::Decrypt("ciphertext too short"));
        }

        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let plaintext = cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt("wrong key or corrupted ciphertext"))?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt("secret is not UTF-8"))
    }
}

/// The displayable prefix kept next to an encrypted key.
pub fn key_prefix(secret: &str) -> String {
    let take = if secret.chars().count() >= 8 { 8 } else { 4 };
    secret.chars().take(take).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_open() {
        let cipher = ApiKeyCipher::new([7u8; 32]);
        let sealed = cipher.encrypt("sk-proj-abcdef123456").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"sk-proj-abcdef123456");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "sk-proj-abcdef123456");
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let cipher = ApiKeyCipher::new([1u8; 32]);
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let sealed = ApiKeyCipher::new([1u8; 32]).encrypt("secret").unwrap();
        let err = ApiKeyCipher::new([2u8; 32]).decrypt(&sealed).unwrap_err();
        assert!(matches!(err, CryptoError::Decrypt(_)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = ApiKeyCipher::new([3u8; 32]);
        let mut sealed = cipher.encrypt("secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(cipher.decrypt(&sealed).is_err());
        assert!(cipher.decrypt(&sealed[..NONCE_LEN]).is_err());
    }

    #[test]
    fn generated_keys_decode() {
        let encoded = ApiKeyCipher::generate_key();
        assert!(ApiKeyCipher::from_base64(&encoded).is_ok());
        assert!(matches!(
            ApiKeyCipher::from_base64("not base64!"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn prefix_length_depends_on_secret_length() {
        assert_eq!(key_prefix("sk-proj-abcdef"), "sk-proj-");
        assert_eq!(key_prefix("abc123"), "abc1");
        assert_eq!(key_prefix("ab"), "ab");
    }
}
