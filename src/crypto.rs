//! External service config encryption using AES-256-GCM
//!
//! Configs are sealed through an injected [`EncryptionKey`]. The codec hands
//! back `(ciphertext, key_id)` pairs; an empty key id marks a config that was
//! stored without encryption.

use std::fmt;
use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, AeadCore, OsRng, Payload},
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Leading byte of every sealed payload.
const FORMAT_V1: u8 = 0x01;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

const CONFIG_AAD: &[u8] = b"external_services.config";
const KEY_ID_PREFIX: &str = "aes-256-gcm:";
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("payload is not a sealed config")]
    InvalidFormat,
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("config is encrypted with key {0:?} but no encryption key is configured")]
    MissingKey(String),
    #[error("config is encrypted with key {stored:?}, configured key is {configured:?}")]
    KeyMismatch { stored: String, configured: String },
}

/// 256-bit key material, wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        match bytes.len() {
            KEY_LEN => Ok(Self(bytes)),
            other => Err(CryptoError::InvalidKeyLength(other)),
        }
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|_| CryptoError::InvalidKeyLength(self.0.len()))
    }

    fn seal(&self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let body = self
            .cipher()?
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(HEADER_LEN + body.len());
        sealed.push(FORMAT_V1);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&body);
        Ok(sealed)
    }

    fn open(&self, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !is_encrypted_payload(sealed) {
            return Err(CryptoError::InvalidFormat);
        }
        let (nonce, body) = sealed[1..].split_at(NONCE_LEN);
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), Payload { msg: body, aad })
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

/// Whether `payload` has the framing of a sealed config. Plaintext JSON never
/// starts with the format byte.
pub fn is_encrypted_payload(payload: &[u8]) -> bool {
    payload.len() >= HEADER_LEN + TAG_LEN && payload[0] == FORMAT_V1
}

/// A key able to seal and open config blobs.
///
/// Implementations must return a stable [`EncryptionKey::id`]; it is persisted
/// next to every ciphertext and checked again on decrypt.
pub trait EncryptionKey: Send + Sync {
    fn id(&self) -> &str;
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Local AES-256-GCM key. Its id is a SHA-256 fingerprint of the key material.
pub struct AesGcmKey {
    key: KeyMaterial,
    id: String,
}

impl AesGcmKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        let key = KeyMaterial::new(bytes)?;
        let digest = Sha256::digest(&key.0);
        let id = format!("{KEY_ID_PREFIX}{}", hex::encode(&digest[..8]));
        Ok(Self { key, id })
    }
}

impl fmt::Debug for AesGcmKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AesGcmKey").field("id", &self.id).finish_non_exhaustive()
    }
}

impl EncryptionKey for AesGcmKey {
    fn id(&self) -> &str {
        &self.id
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.key.seal(CONFIG_AAD, plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.key.open(CONFIG_AAD, ciphertext)
    }
}

/// Seals and opens external service configs with an optional injected key.
///
/// Without a key, configs are stored as UTF-8 bytes under the empty key id.
#[derive(Clone, Default)]
pub struct EncryptedConfigCodec {
    key: Option<Arc<dyn EncryptionKey>>,
}

impl EncryptedConfigCodec {
    pub fn new(key: Option<Arc<dyn EncryptionKey>>) -> Self {
        Self { key }
    }

    pub fn plaintext() -> Self {
        Self { key: None }
    }

    /// Build a codec from raw key bytes, if any were configured.
    pub fn from_key_bytes(bytes: Option<&[u8]>) -> Result<Self, CryptoError> {
        let key = match bytes {
            Some(bytes) => Some(Arc::new(AesGcmKey::new(bytes.to_vec())?) as Arc<dyn EncryptionKey>),
            None => None,
        };
        Ok(Self::new(key))
    }

    /// Id written next to newly sealed configs.
    pub fn key_id(&self) -> &str {
        self.key.as_deref().map(|k| k.id()).unwrap_or("")
    }

    pub fn is_encrypting(&self) -> bool {
        self.key.is_some()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<(Vec<u8>, String), CryptoError> {
        match self.key.as_deref() {
            Some(key) => {
                let sealed = key.encrypt(plaintext.as_bytes())?;
                Ok((sealed, key.id().to_string()))
            }
            None => Ok((plaintext.as_bytes().to_vec(), String::new())),
        }
    }

    pub fn decrypt(&self, ciphertext: &[u8], key_id: &str) -> Result<String, CryptoError> {
        let bytes = if key_id.is_empty() {
            ciphertext.to_vec()
        } else {
            let key = self
                .key
                .as_deref()
                .ok_or_else(|| CryptoError::MissingKey(key_id.to_string()))?;
            if key.id() != key_id {
                return Err(CryptoError::KeyMismatch {
                    stored: key_id.to_string(),
                    configured: key.id().to_string(),
                });
            }
            key.decrypt(ciphertext)?
        };

        String::from_utf8(bytes)
            .map_err(|e| CryptoError::DecryptionFailed(format!("config is not UTF-8: {e}")))
    }
}

impl fmt::Debug for EncryptedConfigCodec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EncryptedConfigCodec")
            .field("key_id", &self.key_id())
            .finish()
    }
}
