//! Chunked encryption and gzip compression for stored payloads.
//!
//! Plaintext is wrapped as a data URL (`data:<mime>;base64,<b64>`), split
//! into fixed-size chunks and each chunk is sealed with AES-256-GCM:
//! - key: PBKDF2-HMAC-SHA256(passphrase, salt), one random salt per payload
//! - nonce: random 96-bit per chunk
//! - token: `base64(salt || nonce || ciphertext || tag)`
//! - associated data: `index || total` as big-endian u64, so a dropped,
//!   reordered or spliced chunk fails authentication
//!
//! Tokens are joined with [`CHUNK_SEPARATOR`], which cannot occur in the
//! base64 alphabet. The joined text is what gets gzip-compressed for
//! transport (encrypt first, then compress).

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::io::{Read, Write};
use thiserror::Error;
use zeroize::Zeroize;

use crate::config::{Configuration, EncryptionKey};

/// Separator between encrypted chunk tokens.
pub const CHUNK_SEPARATOR: &str = "###";
/// Data-URL bytes per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;
/// PBKDF2 rounds used to turn the passphrase into a chunk key.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CodecError {
    /// Wrong key, corrupted or truncated data, or not a payload at all.
    #[error("Data format not supported: {0}")]
    UnsupportedFormat(String),

    #[error("No encryption key configured")]
    MissingKey,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;

fn unsupported(reason: impl Into<String>) -> CodecError {
    CodecError::UnsupportedFormat(reason.into())
}

/// Encrypted, chunked text form of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload(String);

impl EncryptedPayload {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn chunk_count(&self) -> usize {
        self.0.split(CHUNK_SEPARATOR).count()
    }
}

/// Plaintext recovered from a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Encrypts and decrypts payloads with one passphrase.
#[derive(Debug, Clone)]
pub struct Codec {
    key: EncryptionKey,
    chunk_size: usize,
    kdf_iterations: u32,
}

impl Codec {
    pub fn new(key: EncryptionKey) -> Self {
        Self {
            key,
            chunk_size: DEFAULT_CHUNK_SIZE,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }

    pub fn from_config(config: &Configuration) -> Self {
        Self::new(config.encryption_key.clone())
            .with_chunk_size(config.chunk_size)
            .with_kdf_iterations(config.kdf_iterations)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encrypt file bytes. Always produces at least one chunk.
    pub fn encode(&self, plain: &[u8], mime: &str) -> Result<EncryptedPayload> {
        if self.key.is_empty() {
            return Err(CodecError::MissingKey);
        }

        let data_url = format!("data:{};base64,{}", sanitize_mime(mime), BASE64.encode(plain));

        let salt: [u8; SALT_LEN] = rand::random();
        let cipher = self.derive_cipher(&salt)?;

        let bytes = data_url.as_bytes();
        let mut chunks: Vec<&[u8]> = bytes.chunks(self.chunk_size).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        let total = chunks.len();
        let tokens = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| seal_chunk(&cipher, &salt, chunk_aad(index, total), chunk))
            .collect::<Result<Vec<_>>>()?;

        Ok(EncryptedPayload(tokens.join(CHUNK_SEPARATOR)))
    }

    /// Decrypt a payload. Any failure is [`CodecError::UnsupportedFormat`].
    pub fn decode(&self, payload: &str) -> Result<Decoded> {
        if self.key.is_empty() {
            return Err(unsupported("no encryption key configured"));
        }

        let tokens: Vec<&str> = payload.split(CHUNK_SEPARATOR).collect();
        let total = tokens.len();

        // Chunks of one payload share a salt, so the key is derived once.
        let mut keyed: Option<([u8; SALT_LEN], Aes256Gcm)> = None;
        let mut data_url = String::with_capacity(payload.len());

        for (index, token) in tokens.into_iter().enumerate() {
            let raw = BASE64
                .decode(token)
                .map_err(|_| unsupported(format!("chunk {} is not base64", index)))?;
            if raw.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
                return Err(unsupported(format!("chunk {} is truncated", index)));
            }

            let (salt, rest) = raw.split_at(SALT_LEN);
            let (nonce, sealed) = rest.split_at(NONCE_LEN);
            let salt: [u8; SALT_LEN] = salt
                .try_into()
                .map_err(|_| unsupported(format!("chunk {} has a bad salt", index)))?;

            if keyed.is_none() {
                keyed = Some((salt, self.derive_cipher(&salt)?));
            }
            let Some((first_salt, cipher)) = &keyed else {
                return Err(unsupported(format!("chunk {} has no key", index)));
            };
            if *first_salt != salt {
                return Err(unsupported(format!(
                    "chunk {} belongs to another payload",
                    index
                )));
            }

            let aad = chunk_aad(index, total);
            let plain = cipher
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: sealed,
                        aad: &aad,
                    },
                )
                .map_err(|_| unsupported(format!("chunk {} failed to decrypt", index)))?;
            let text = String::from_utf8(plain)
                .map_err(|_| unsupported(format!("chunk {} is not text", index)))?;
            data_url.push_str(&text);
        }

        parse_data_url(&data_url)
    }

    /// [`Codec::encode`] on the blocking pool; key derivation and sealing
    /// are CPU-bound.
    pub async fn encode_owned(&self, plain: Vec<u8>, mime: String) -> Result<EncryptedPayload> {
        let codec = self.clone();
        tokio::task::spawn_blocking(move || codec.encode(&plain, &mime))
            .await
            .map_err(|e| CodecError::Encryption(format!("encoder task failed: {}", e)))?
    }

    /// [`Codec::decode`] on the blocking pool.
    pub async fn decode_owned(&self, payload: String) -> Result<Decoded> {
        let codec = self.clone();
        tokio::task::spawn_blocking(move || codec.decode(&payload))
            .await
            .map_err(|e| CodecError::Encryption(format!("decoder task failed: {}", e)))?
    }

    fn derive_cipher(&self, salt: &[u8]) -> Result<Aes256Gcm> {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(
            self.key.expose().as_bytes(),
            salt,
            self.kdf_iterations,
            &mut key,
        );
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CodecError::Encryption(format!("Invalid key length: {}", e)));
        key.zeroize();
        cipher
    }
}

/// Position of a chunk within its payload.
fn chunk_aad(index: usize, total: usize) -> [u8; 16] {
    let mut aad = [0u8; 16];
    aad[..8].copy_from_slice(&(index as u64).to_be_bytes());
    aad[8..].copy_from_slice(&(total as u64).to_be_bytes());
    aad
}

fn seal_chunk(
    cipher: &Aes256Gcm,
    salt: &[u8; SALT_LEN],
    aad: [u8; 16],
    chunk: &[u8],
) -> Result<String> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: chunk,
                aad: &aad,
            },
        )
        .map_err(|e| CodecError::Encryption(e.to_string()))?;

    let mut token = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
    token.extend_from_slice(salt);
    token.extend_from_slice(nonce.as_slice());
    token.extend_from_slice(&sealed);
    Ok(BASE64.encode(token))
}

/// MIME types end up inside the data URL preamble, so they must stay
/// ASCII and free of the preamble delimiters.
fn sanitize_mime(mime: &str) -> &str {
    let valid = !mime.is_empty()
        && mime
            .chars()
            .all(|c| c.is_ascii_graphic() && c != ',' && c != ';');
    if valid {
        mime
    } else {
        "application/octet-stream"
    }
}

fn parse_data_url(data_url: &str) -> Result<Decoded> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| unsupported("missing data URL prefix"))?;
    let (preamble, body) = rest
        .split_once(',')
        .ok_or_else(|| unsupported("missing data URL body"))?;
    let mime = preamble
        .strip_suffix(";base64")
        .ok_or_else(|| unsupported("data URL is not base64"))?;
    let bytes = BASE64
        .decode(body)
        .map_err(|_| unsupported("data URL body is not base64"))?;

    Ok(Decoded {
        mime: mime.to_string(),
        bytes,
    })
}

/// Gzip-compress bytes.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Inflate gzip bytes.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
