//! Symmetric cipher collaborator used by the queue worker and the fast path.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::CipherAction;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// Malformed input or wrong secret.
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &str, secret: &str) -> Result<String, CipherError>;
    fn decrypt(&self, ciphertext: &str, secret: &str) -> Result<String, CipherError>;

    fn apply(&self, action: CipherAction, payload: &str, secret: &str) -> Result<String, CipherError> {
        match action {
            CipherAction::Encrypt => self.encrypt(payload, secret),
            CipherAction::Decrypt => self.decrypt(payload, secret),
        }
    }
}

/// AES-256-GCM with a synthetic nonce.
///
/// The key is SHA-256 of the tenant secret; the nonce is the first 12 bytes
/// of HMAC-SHA256(key, plaintext), so equal inputs give equal ciphertexts.
/// Output is base64 of `nonce || ciphertext || tag`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AeadCipher;

impl AeadCipher {
    fn key(secret: &str) -> [u8; 32] {
        Sha256::digest(secret.as_bytes()).into()
    }

    fn sealing_key(key: &[u8; 32]) -> Result<LessSafeKey, ring::error::Unspecified> {
        UnboundKey::new(&AES_256_GCM, key).map(LessSafeKey::new)
    }

    fn synthetic_nonce(key: &[u8; 32], plaintext: &[u8]) -> Result<[u8; NONCE_LEN], CipherError> {
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|_| CipherError::Encrypt("invalid HMAC key length".to_string()))?;
        mac.update(plaintext);
        let digest = mac.finalize().into_bytes();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        Ok(nonce)
    }
}

impl Cipher for AeadCipher {
    fn encrypt(&self, plaintext: &str, secret: &str) -> Result<String, CipherError> {
        let key = Self::key(secret);
        let sealing = Self::sealing_key(&key)
            .map_err(|_| CipherError::Encrypt("invalid key".to_string()))?;
        let nonce = Self::synthetic_nonce(&key, plaintext.as_bytes())?;

        let mut in_out = plaintext.as_bytes().to_vec();
        sealing
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
            .map_err(|_| CipherError::Encrypt("seal failed".to_string()))?;

        let mut wire = Vec::with_capacity(NONCE_LEN + in_out.len());
        wire.extend_from_slice(&nonce);
        wire.extend_from_slice(&in_out);
        Ok(STANDARD.encode(wire))
    }

    fn decrypt(&self, ciphertext: &str, secret: &str) -> Result<String, CipherError> {
        let wire = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| CipherError::Decrypt("ciphertext is not valid base64".to_string()))?;
        if wire.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CipherError::Decrypt("ciphertext is too short".to_string()));
        }

        let key = Self::key(secret);
        let opening = Self::sealing_key(&key)
            .map_err(|_| CipherError::Decrypt("invalid key".to_string()))?;
        let (nonce, sealed) = wire.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| CipherError::Decrypt("invalid nonce".to_string()))?;

        let mut in_out = sealed.to_vec();
        let plain = opening
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CipherError::Decrypt("wrong secret or corrupted ciphertext".to_string()))?;
        String::from_utf8(plain.to_vec())
            .map_err(|_| CipherError::Decrypt("plaintext is not valid UTF-8".to_string()))
    }
}
