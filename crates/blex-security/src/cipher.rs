//! Secret value cipher.
//!
//! Encrypts short strings with AES-256-GCM under one static key derived from
//! configuration at startup. Tokens are URL-safe base64 of
//! `version || nonce || ciphertext+tag`, so a value sealed under a different
//! key (or edited in the database) fails authentication instead of decrypting
//! to garbage.
//!
//! There is no key versioning: changing `cipher.key` makes every previously
//! stored token undecryptable.

use aes_gcm::aead::Aead;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as BASE64};
use blex_core::config::CipherConfig;
use blex_core::error::{BlexError, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};

const TOKEN_VERSION: u8 = 0x01;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Process-wide secret cipher. Cheap to clone.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; 32],
}

impl Cipher {
    /// Build a cipher from raw key material. Empty material is rejected.
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(BlexError::Config("cipher.key must not be empty".into()));
        }
        Ok(Self {
            key: derive_key(secret),
        })
    }

    /// Build a cipher from the `[cipher]` config section.
    pub fn from_config(config: &CipherConfig) -> Result<Self> {
        Self::new(&config.key)
    }

    /// Encrypt a value into token bytes (ASCII, URL-safe base64).
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        self.encrypt_str(plaintext).map(String::into_bytes)
    }

    /// Encrypt a value into a token string.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);

        let sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| BlexError::Security(format!("Encryption failed: {e}")))?;

        let mut raw = Vec::with_capacity(1 + NONCE_LEN + sealed.len());
        raw.push(TOKEN_VERSION);
        raw.extend_from_slice(&nonce_bytes);
        raw.extend_from_slice(&sealed);
        Ok(BASE64.encode(raw))
    }

    /// Decrypt token bytes. Fails with [`BlexError::InvalidToken`] for anything
    /// this key did not produce.
    pub fn decrypt(&self, token: &[u8]) -> Result<String> {
        let token = std::str::from_utf8(token).map_err(|_| BlexError::InvalidToken)?;
        self.decrypt_str(token)
    }

    /// Decrypt a token string.
    pub fn decrypt_str(&self, token: &str) -> Result<String> {
        let raw = BASE64
            .decode(token.trim())
            .map_err(|_| BlexError::InvalidToken)?;

        if raw.len() < 1 + NONCE_LEN + TAG_LEN || raw[0] != TOKEN_VERSION {
            return Err(BlexError::InvalidToken);
        }

        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let nonce = GenericArray::from_slice(&raw[1..1 + NONCE_LEN]);
        let plain = cipher
            .decrypt(nonce, &raw[1 + NONCE_LEN..])
            .map_err(|_| {
                tracing::debug!("Token failed authentication");
                BlexError::InvalidToken
            })?;

        String::from_utf8(plain).map_err(|_| BlexError::InvalidToken)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").field("key", &"<redacted>").finish()
    }
}

/// Stretch configured key material to an AES-256 key.
fn derive_key(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"blex::cipher::");
    hasher.update(secret.as_bytes());
    let result = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&result);
    key
}
