//! Envelope obfuscation using HKDF-SHA256 + ChaCha20-Poly1305.
//!
//! The key is derived from observable device characteristics, so anyone
//! who can read the store can re-derive it. This layer prevents casual
//! plaintext exposure of persisted session state; it is not
//! confidentiality against a motivated local attacker. A deployment that
//! needs real secrecy must supply key material from an actual secret
//! source instead of the device fingerprint.

use crate::{StorageError, StorageResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

/// HKDF salt for envelope key derivation.
const HKDF_SALT: &[u8] = b"driftline-local-store";

/// HKDF info string for envelope key derivation.
const HKDF_INFO: &[u8] = b"driftline-envelope-key-v1";

/// Nonce size for ChaCha20-Poly1305 (12 bytes / 96 bits).
const NONCE_SIZE: usize = 12;

/// ChaCha20 symmetric key size (32 bytes).
const KEY_SIZE: usize = 32;

/// Generates a random 12-byte nonce for ChaCha20-Poly1305.
fn generate_random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Symmetric key for the local obfuscation envelope.
pub struct ObfuscationKey([u8; KEY_SIZE]);

impl ObfuscationKey {
    /// Derive the envelope key from device key material
    /// (the fingerprint's canonical component serialization).
    pub fn derive(device_material: &str) -> StorageResult<Self> {
        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), device_material.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        hkdf.expand(HKDF_INFO, &mut key)
            .map_err(|e| StorageError::Crypto(format!("HKDF expand failed: {e}")))?;
        Ok(Self(key))
    }

    /// Encrypt plaintext, returning base64(nonce || ciphertext || tag).
    pub fn seal(&self, plaintext: &[u8]) -> StorageResult<String> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let nonce = generate_random_nonce();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| StorageError::Crypto(format!("Encryption failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(combined))
    }

    /// Decrypt a base64(nonce || ciphertext || tag) blob.
    pub fn open(&self, encoded: &str) -> StorageResult<Vec<u8>> {
        let combined = BASE64
            .decode(encoded)
            .map_err(|e| StorageError::Encoding(format!("base64 decode failed: {e}")))?;

        // nonce(12) + tag(16) minimum
        if combined.len() < NONCE_SIZE + 16 {
            return Err(StorageError::Crypto(
                "Encrypted data too short (must be at least 28 bytes)".to_string(),
            ));
        }

        let nonce = &combined[..NONCE_SIZE];
        let ciphertext = &combined[NONCE_SIZE..];

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                StorageError::Crypto("Decryption failed: authentication tag mismatch".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = ObfuscationKey::derive("agent|en-US|linux|1920x1080").unwrap();
        let plaintext = b"{\"session\":\"data\"}";

        let sealed = key.seal(plaintext).unwrap();
        let opened = key.open(&sealed).unwrap();

        assert_eq!(opened.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn test_same_material_same_key() {
        let a = ObfuscationKey::derive("material").unwrap();
        let b = ObfuscationKey::derive("material").unwrap();

        let sealed = a.seal(b"payload").unwrap();
        assert_eq!(b.open(&sealed).unwrap(), b"payload");
    }

    #[test]
    fn test_different_material_fails_to_open() {
        let a = ObfuscationKey::derive("device-one").unwrap();
        let b = ObfuscationKey::derive("device-two").unwrap();

        let sealed = a.seal(b"payload").unwrap();
        assert!(b.open(&sealed).is_err());
    }

    #[test]
    fn test_nonce_is_random() {
        let key = ObfuscationKey::derive("material").unwrap();
        let one = key.seal(b"same plaintext").unwrap();
        let two = key.seal(b"same plaintext").unwrap();
        assert_ne!(one, two);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = ObfuscationKey::derive("material").unwrap();
        let sealed = key.seal(b"payload").unwrap();

        let mut raw = BASE64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = BASE64.encode(raw);

        let result = key.open(&tampered);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Decryption failed"));
    }

    #[test]
    fn test_short_data_fails() {
        let key = ObfuscationKey::derive("material").unwrap();
        let short = BASE64.encode([0u8; 20]);

        let result = key.open(&short);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("too short"));
    }

    #[test]
    fn test_invalid_base64_fails() {
        let key = ObfuscationKey::derive("material").unwrap();
        let result = key.open("not base64 at all!!!");
        assert!(matches!(result, Err(StorageError::Encoding(_))));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = ObfuscationKey::derive("material").unwrap();
        let sealed = key.seal(b"").unwrap();
        assert!(key.open(&sealed).unwrap().is_empty());
    }
}
