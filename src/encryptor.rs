use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Nonce size for AES-256-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits).
pub const KEY_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EncryptorError {
    #[error("session secret must be {KEY_SIZE} bytes of hex or base64")]
    InvalidKey,
    #[error("encryption failed")]
    Encrypt,
}

/// Authenticated encryption for opaque session strings.
///
/// Wire form is `base64(nonce || ciphertext)` with a fresh random nonce per
/// call. Decryption is all-or-nothing: a tampered token, a truncated token
/// or a token sealed under a different secret yields `None`, never garbage
/// plaintext.
#[derive(Clone)]
pub struct StringEncryptor {
    cipher: Aes256Gcm,
}

impl StringEncryptor {
    /// Create an encryptor from a raw 256-bit key.
    #[must_use]
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Create an encryptor from a hex- or base64-encoded secret.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptorError::InvalidKey`] if the secret does not decode
    /// to exactly [`KEY_SIZE`] bytes in either encoding.
    pub fn from_secret(secret: &str) -> Result<Self, EncryptorError> {
        Ok(Self::new(parse_key(secret)?))
    }

    /// Seal a plaintext string into an opaque token.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptorError::Encrypt`] if the cipher fails internally.
    pub fn encrypt_string(&self, plaintext: &str) -> Result<String, EncryptorError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| EncryptorError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Open a token produced by [`encrypt_string`](Self::encrypt_string).
    ///
    /// Returns `None` on any failure: bad base64, short input, wrong key
    /// or a ciphertext that fails authentication.
    #[must_use]
    pub fn decrypt_string(&self, encoded: &str) -> Option<String> {
        let sealed = BASE64.decode(encoded).ok()?;
        if sealed.len() <= NONCE_SIZE {
            return None;
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self.cipher.decrypt(nonce, ciphertext).ok()?;
        String::from_utf8(plaintext).ok()
    }
}

impl std::fmt::Debug for StringEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringEncryptor")
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Parses a hex- or base64-encoded 256-bit key.
fn parse_key(secret: &str) -> Result<[u8; KEY_SIZE], EncryptorError> {
    if secret.len() == KEY_SIZE * 2 {
        if let Ok(bytes) = hex::decode(secret) {
            if let Ok(key) = <[u8; KEY_SIZE]>::try_from(bytes) {
                return Ok(key);
            }
        }
    }

    let bytes = BASE64
        .decode(secret.trim())
        .map_err(|_| EncryptorError::InvalidKey)?;
    <[u8; KEY_SIZE]>::try_from(bytes).map_err(|_| EncryptorError::InvalidKey)
}
