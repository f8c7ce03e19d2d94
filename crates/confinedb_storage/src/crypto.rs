//! Store encryption.
//!
//! ## Security Model
//!
//! - Callers supply a 64-byte key; it is never written to disk
//! - The AES-256 key is derived from it with HKDF-SHA256
//! - Store bodies are sealed with AES-256-GCM: `nonce (12) || ciphertext || tag (16)`
//! - A failed open means the key is wrong or the image was tampered with

use crate::error::{EngineError, EngineResult};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::hash::{Hash, Hasher};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a user-supplied encryption key in bytes.
pub const KEY_SIZE: usize = 64;
/// Size of the derived AES-256 key in bytes.
const CIPHER_KEY_SIZE: usize = 32;
/// Size of GCM nonce in bytes.
const NONCE_SIZE: usize = 12;
/// Size of GCM authentication tag in bytes.
const TAG_SIZE: usize = 16;
/// HKDF context string.
const KEY_INFO: &[u8] = b"confinedb-store-key-v1";

/// A 64-byte store encryption key.
///
/// Keys compare byte-wise and are zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly [`KEY_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(EngineError::Encryption(format!(
                "invalid key size: expected {KEY_SIZE}, got {}",
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Returns the key bytes.
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for EncryptionKey {}

impl Hash for EncryptionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// AES-256-GCM cipher bound to one store key.
pub(crate) struct StoreCipher {
    cipher: Aes256Gcm,
}

impl StoreCipher {
    /// Derives the cipher for `key`.
    pub(crate) fn new(key: &EncryptionKey) -> EngineResult<Self> {
        let hk = Hkdf::<Sha256>::new(None, key.as_bytes());
        let mut derived = [0u8; CIPHER_KEY_SIZE];
        hk.expand(KEY_INFO, &mut derived)
            .map_err(|_| EngineError::Encryption("HKDF expand failed".to_string()))?;

        let cipher = Aes256Gcm::new_from_slice(&derived)
            .map_err(|_| EngineError::Encryption("invalid derived key length".to_string()));
        derived.zeroize();

        Ok(Self { cipher: cipher? })
    }

    /// Encrypts `plaintext`, prepending a random nonce.
    pub(crate) fn seal(&self, plaintext: &[u8]) -> EngineResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| EngineError::Encryption("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    /// Decrypts data produced by [`seal`](Self::seal).
    ///
    /// Returns `None` when authentication fails.
    pub(crate) fn open(&self, sealed: &[u8]) -> Option<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return None;
        }
        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        self.cipher.decrypt(nonce, &sealed[NONCE_SIZE..]).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let cipher = StoreCipher::new(&EncryptionKey::from_bytes(&[0x42; KEY_SIZE]).unwrap())
            .unwrap();

        let sealed = cipher.seal(b"store body").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), b"store body");
    }

    #[test]
    fn different_keys_fail() {
        let c1 = StoreCipher::new(&EncryptionKey::from_bytes(&[0x42; KEY_SIZE]).unwrap()).unwrap();
        let c2 = StoreCipher::new(&EncryptionKey::from_bytes(&[0x43; KEY_SIZE]).unwrap()).unwrap();

        let sealed = c1.seal(b"secret").unwrap();
        assert!(c2.open(&sealed).is_none());
    }

    #[test]
    fn tampered_data_fails() {
        let cipher = StoreCipher::new(&EncryptionKey::generate()).unwrap();
        let mut sealed = cipher.seal(b"secret").unwrap();
        sealed[NONCE_SIZE + 1] ^= 0xFF;
        assert!(cipher.open(&sealed).is_none());
    }

    #[test]
    fn key_size_is_checked() {
        assert!(EncryptionKey::from_bytes(&[0u8; 32]).is_err());
        assert!(EncryptionKey::from_bytes(&[0u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn key_equality_is_bytewise() {
        let a = EncryptionKey::from_bytes(&[1u8; KEY_SIZE]).unwrap();
        let b = EncryptionKey::from_bytes(&[1u8; KEY_SIZE]).unwrap();
        let c = EncryptionKey::from_bytes(&[2u8; KEY_SIZE]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn debug_redacts_key() {
        let key = EncryptionKey::from_bytes(&[7u8; KEY_SIZE]).unwrap();
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
