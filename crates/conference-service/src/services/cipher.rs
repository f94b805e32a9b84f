//! At-rest encryption of chat message text.
//!
//! Text is sealed with AES-256-GCM under the service key and stored as
//! base64(nonce || ciphertext || tag). A fresh random 96-bit nonce is drawn
//! for every message.

use crate::errors::CsError;
use base64::{engine::general_purpose, Engine as _};
use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN},
    rand::{SecureRandom, SystemRandom},
};

const TAG_LEN: usize = 16;

/// Reversible transform applied to message text before it reaches the store.
pub struct MessageCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl MessageCipher {
    /// Build a cipher from a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns `CsError::Crypto` if the key is not 32 bytes long.
    pub fn new(key: &[u8]) -> Result<Self, CsError> {
        if key.len() != 32 {
            return Err(CsError::Crypto(format!(
                "Invalid message key length: {} (expected 32)",
                key.len()
            )));
        }

        let unbound_key = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|e| CsError::Crypto(format!("Cipher key creation failed: {}", e)))?;

        Ok(Self {
            key: LessSafeKey::new(unbound_key),
            rng: SystemRandom::new(),
        })
    }

    /// Seal clear text into its stored form.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CsError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|e| CsError::Crypto(format!("Nonce generation failed: {}", e)))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|e| CsError::Crypto(format!("Encryption operation failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);

        Ok(general_purpose::STANDARD.encode(sealed))
    }

    /// Open a stored value back into clear text.
    pub fn decrypt(&self, stored: &str) -> Result<String, CsError> {
        let sealed = general_purpose::STANDARD
            .decode(stored)
            .map_err(|e| CsError::Crypto(format!("Stored message is not base64: {}", e)))?;

        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CsError::Crypto(format!(
                "Stored message too short: {} bytes",
                sealed.len()
            )));
        }

        let (nonce_part, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce_bytes: [u8; NONCE_LEN] = nonce_part
            .try_into()
            .map_err(|e| CsError::Crypto(format!("Invalid nonce format: {}", e)))?;

        let mut in_out = ciphertext.to_vec();
        let decrypted = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|e| CsError::Crypto(format!("Decryption operation failed: {}", e)))?;

        String::from_utf8(decrypted.to_vec())
            .map_err(|e| CsError::Crypto(format!("Decrypted message is not UTF-8: {}", e)))
    }
}
