//! At-rest payload codecs for stored source files: AES-GCM sealing with
//! base64 ciphertext and hex IV/tag, and gzip compression.

use std::io::{Read, Write};

use aes_gcm::aead::{Aead, KeyInit, Nonce};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub type PayloadResult<T> = Result<T, PayloadError>;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("unsupported cipher {0}")]
    UnsupportedCipher(String),

    #[error("no key configured for version {0}")]
    UnknownKeyVersion(String),

    #[error("malformed IV")]
    InvalidIv,

    #[error("malformed tag")]
    InvalidTag,

    #[error("malformed ciphertext")]
    InvalidCiphertext,

    #[error("authentication failed")]
    Authentication,

    #[error("unsupported compression algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("corrupt compressed payload: {0}")]
    Decompression(String),
}

impl PayloadError {
    pub fn is_decompression(&self) -> bool {
        matches!(
            self,
            PayloadError::UnsupportedAlgorithm(_) | PayloadError::Decompression(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    Aes128Gcm,
    Aes256Gcm,
}

impl Cipher {
    pub fn parse(name: &str) -> PayloadResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "aes-128-gcm" => Ok(Cipher::Aes128Gcm),
            "aes-256-gcm" => Ok(Cipher::Aes256Gcm),
            other => Err(PayloadError::UnsupportedCipher(other.to_string())),
        }
    }

    fn key_len(&self) -> usize {
        match self {
            Cipher::Aes128Gcm => 16,
            Cipher::Aes256Gcm => 32,
        }
    }

    /// Secrets are raw key bytes, truncated or zero-padded to the key size.
    fn key(&self, secret: &[u8]) -> Vec<u8> {
        let mut key = vec![0u8; self.key_len()];
        let n = secret.len().min(key.len());
        key[..n].copy_from_slice(&secret[..n]);
        key
    }
}

fn open<C: KeyInit + Aead>(key: &[u8], iv: &[u8], sealed: &[u8]) -> PayloadResult<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|_| PayloadError::Authentication)?;
    cipher
        .decrypt(Nonce::<C>::from_slice(iv), sealed)
        .map_err(|_| PayloadError::Authentication)
}

fn seal<C: KeyInit + Aead>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> PayloadResult<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|_| PayloadError::Authentication)?;
    cipher
        .encrypt(Nonce::<C>::from_slice(iv), plaintext)
        .map_err(|_| PayloadError::Authentication)
}

/// Decrypts base64 `ciphertext` sealed with `iv_hex`/`tag_hex`.
pub fn decrypt(
    cipher: Cipher,
    secret: &[u8],
    iv_hex: &str,
    tag_hex: &str,
    ciphertext: &[u8],
) -> PayloadResult<Vec<u8>> {
    let iv = hex::decode(iv_hex.trim()).map_err(|_| PayloadError::InvalidIv)?;
    if iv.len() != NONCE_LEN {
        return Err(PayloadError::InvalidIv);
    }
    let tag = hex::decode(tag_hex.trim()).map_err(|_| PayloadError::InvalidTag)?;
    if tag.len() != TAG_LEN {
        return Err(PayloadError::InvalidTag);
    }

    let text: Vec<u8> = ciphertext
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let mut sealed = STANDARD
        .decode(text)
        .map_err(|_| PayloadError::InvalidCiphertext)?;
    sealed.extend_from_slice(&tag);

    let key = cipher.key(secret);
    match cipher {
        Cipher::Aes128Gcm => open::<Aes128Gcm>(&key, &iv, &sealed),
        Cipher::Aes256Gcm => open::<Aes256Gcm>(&key, &iv, &sealed),
    }
}

/// Inverse of [`decrypt`]: returns the base64 ciphertext and the hex tag.
pub fn encrypt(
    cipher: Cipher,
    secret: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> PayloadResult<(String, String)> {
    if iv.len() != NONCE_LEN {
        return Err(PayloadError::InvalidIv);
    }

    let key = cipher.key(secret);
    let mut sealed = match cipher {
        Cipher::Aes128Gcm => seal::<Aes128Gcm>(&key, iv, plaintext)?,
        Cipher::Aes256Gcm => seal::<Aes256Gcm>(&key, iv, plaintext)?,
    };
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok((STANDARD.encode(sealed), hex::encode(tag)))
}

pub fn is_compressed(algorithm: Option<&str>) -> bool {
    algorithm.is_some_and(|a| !a.is_empty() && !a.eq_ignore_ascii_case("none"))
}

pub fn decompress(algorithm: &str, data: &[u8]) -> PayloadResult<Vec<u8>> {
    if !is_compressed(Some(algorithm)) {
        return Ok(data.to_vec());
    }
    if !algorithm.eq_ignore_ascii_case("gzip") {
        return Err(PayloadError::UnsupportedAlgorithm(algorithm.to_string()));
    }

    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| PayloadError::Decompression(e.to_string()))?;
    Ok(out)
}

pub fn gzip(data: &[u8]) -> PayloadResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| PayloadError::Decompression(e.to_string()))
}
