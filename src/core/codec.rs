//! Payload codec for the upstream fund API wire convention

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::debug;

const BLOCK_SIZE: usize = 16;

/// Legacy trailing marker in some decrypted payloads. The marker is five
/// characters but only the last four are removed, matching the upstream
/// format exactly.
const SENTINEL: &str = "}*#$*";
const SENTINEL_STRIP: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("key must be 16, 24 or 32 bytes, got {0}")]
    KeyLength(usize),
    #[error("ciphertext length {0} is not a positive multiple of the cipher block size")]
    Crypto(usize),
    #[error("decrypted payload is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),
    #[error("decrypted payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

enum AesKey {
    Aes128([u8; 16]),
    Aes192([u8; 24]),
    Aes256([u8; 32]),
}

/// Symmetric AES-CBC codec for the encrypted payload envelopes served by the
/// fund API. Key length selects the AES variant. Immutable after
/// construction; safe to share across tasks. Debug output names the cipher
/// variant and omits key and IV bytes.
pub struct PayloadCodec {
    key: AesKey,
    iv: [u8; BLOCK_SIZE],
}

impl fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cipher = match self.key {
            AesKey::Aes128(_) => "Aes128",
            AesKey::Aes192(_) => "Aes192",
            AesKey::Aes256(_) => "Aes256",
        };
        f.debug_struct("PayloadCodec")
            .field("cipher", &cipher)
            .finish_non_exhaustive()
    }
}

impl PayloadCodec {
    /// Builds a codec from raw key bytes and an IV seed. The IV is the seed
    /// truncated to 16 bytes, right-padded with zero bytes when shorter.
    pub fn new(key: &[u8], iv_seed: &[u8]) -> Result<Self, CodecError> {
        let key = match key.len() {
            16 => key.try_into().map(AesKey::Aes128),
            24 => key.try_into().map(AesKey::Aes192),
            32 => key.try_into().map(AesKey::Aes256),
            n => return Err(CodecError::KeyLength(n)),
        }
        .map_err(|_| CodecError::KeyLength(key.len()))?;

        let mut iv = [0u8; BLOCK_SIZE];
        let n = iv_seed.len().min(BLOCK_SIZE);
        iv[..n].copy_from_slice(&iv_seed[..n]);

        Ok(PayloadCodec { key, iv })
    }

    /// Decrypts a base64 payload into a JSON value.
    ///
    /// Padding removal follows the upstream trailing-byte-count convention:
    /// the final plaintext byte `n` says the last `n` bytes are padding, and
    /// that byte is trusted without checking the padding bytes themselves.
    /// Stripping saturates when `n` exceeds the buffer and removes nothing
    /// when `n` is zero. A malformed count therefore surfaces later as a
    /// `Decode` or `Parse` error, never as `Crypto`.
    ///
    /// If the decoded text ends with the legacy sentinel, the last four
    /// characters are removed. Not five; the closing brace stays.
    pub fn decrypt(&self, payload: &str) -> Result<Value, CodecError> {
        let ciphertext = STANDARD.decode(payload.trim())?;
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CodecError::Crypto(ciphertext.len()));
        }

        let mut plaintext = self.decrypt_blocks(&ciphertext)?;
        strip_reported_padding(&mut plaintext);

        let mut text = String::from_utf8(plaintext)?;
        if text.ends_with(SENTINEL) {
            text.truncate(text.len() - SENTINEL_STRIP);
        }

        debug!("Decrypted payload: {}", text);
        Ok(serde_json::from_str(&text)?)
    }

    /// Encrypts plaintext with standard PKCS#7 padding and returns base64.
    /// Padding is always added, a full extra block for exact multiples, so
    /// `decrypt` can round-trip the output.
    pub fn encrypt_text(&self, text: &str) -> String {
        STANDARD.encode(self.encrypt_blocks(text.as_bytes()))
    }

    /// Serializes a JSON value and encrypts it. Never emits the sentinel.
    pub fn encrypt_value(&self, value: &Value) -> Result<String, CodecError> {
        Ok(self.encrypt_text(&serde_json::to_string(value)?))
    }

    fn decrypt_blocks(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let iv = &self.iv;
        match &self.key {
            AesKey::Aes128(key) => cbc::Decryptor::<aes::Aes128>::new(key.into(), iv.into())
                .decrypt_padded_vec_mut::<NoPadding>(ciphertext),
            AesKey::Aes192(key) => cbc::Decryptor::<aes::Aes192>::new(key.into(), iv.into())
                .decrypt_padded_vec_mut::<NoPadding>(ciphertext),
            AesKey::Aes256(key) => cbc::Decryptor::<aes::Aes256>::new(key.into(), iv.into())
                .decrypt_padded_vec_mut::<NoPadding>(ciphertext),
        }
        .map_err(|_| CodecError::Crypto(ciphertext.len()))
    }

    fn encrypt_blocks(&self, plaintext: &[u8]) -> Vec<u8> {
        let iv = &self.iv;
        match &self.key {
            AesKey::Aes128(key) => cbc::Encryptor::<aes::Aes128>::new(key.into(), iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            AesKey::Aes192(key) => cbc::Encryptor::<aes::Aes192>::new(key.into(), iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            AesKey::Aes256(key) => cbc::Encryptor::<aes::Aes256>::new(key.into(), iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        }
    }

    /// Encrypts pre-padded blocks as-is so tests can shape the trailing
    /// bytes. Input must be block aligned.
    #[cfg(test)]
    pub(crate) fn encrypt_raw(&self, blocks: &[u8]) -> String {
        debug_assert!(blocks.len() % BLOCK_SIZE == 0);
        let iv = &self.iv;
        let ciphertext = match &self.key {
            AesKey::Aes128(key) => cbc::Encryptor::<aes::Aes128>::new(key.into(), iv.into())
                .encrypt_padded_vec_mut::<NoPadding>(blocks),
            AesKey::Aes192(key) => cbc::Encryptor::<aes::Aes192>::new(key.into(), iv.into())
                .encrypt_padded_vec_mut::<NoPadding>(blocks),
            AesKey::Aes256(key) => cbc::Encryptor::<aes::Aes256>::new(key.into(), iv.into())
                .encrypt_padded_vec_mut::<NoPadding>(blocks),
        };
        STANDARD.encode(ciphertext)
    }
}

/// Strips exactly the number of trailing bytes reported by the final byte.
/// Zero strips nothing; a count larger than the buffer strips everything.
fn strip_reported_padding(buf: &mut Vec<u8>) {
    if let Some(&n) = buf.last() {
        buf.truncate(buf.len().saturating_sub(n as usize));
    }
}
