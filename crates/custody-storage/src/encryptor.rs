//! Chunked AES-256-GCM encryption for evidence files.
//!
//! Layout: a 12-byte header (version, chunk size, random nonce prefix)
//! followed by sealed chunks. Each chunk nonce is `prefix || counter || last`,
//! and the header is authenticated with every chunk. The final chunk is
//! always shorter than the chunk size (possibly empty), so truncation at a
//! chunk boundary is detected.

use std::{
    fmt,
    io::{self, Read, Write},
};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

use crate::key_provider::SymmetricKey;

pub const STREAM_VERSION: u8 = 1;
/// Default plaintext bytes per chunk (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
pub const TAG_LEN: usize = 16;

const NONCE_PREFIX_LEN: usize = 7;
/// version (1) + chunk size (4) + nonce prefix (7).
pub const HEADER_LEN: usize = 1 + 4 + NONCE_PREFIX_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("cipher initialization failed")]
    Init,
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(usize),
    #[error("unsupported ciphertext version: {0}")]
    UnsupportedVersion(u8),
    #[error("encryption failed")]
    Encrypt,
    /// Wrong key, tampered bytes, or reordered chunks.
    #[error("ciphertext failed authentication")]
    Authentication,
    #[error("ciphertext is truncated")]
    Truncated,
    #[error("unexpected data after final chunk")]
    TrailingData,
    #[error("input too large for a single stream")]
    TooLarge,
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

/// Streams plaintext to ciphertext (and back) in bounded-size chunks.
#[derive(Clone)]
pub struct Encryptor {
    cipher: Aes256Gcm,
    chunk_size: usize,
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl Encryptor {
    pub fn new(key: &SymmetricKey) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Init)?;
        Ok(Self {
            cipher,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Override the plaintext chunk size used when encrypting.
    /// Decryption always follows the size recorded in the header.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self, CryptoError> {
        validate_chunk_size(chunk_size)?;
        self.chunk_size = chunk_size;
        Ok(self)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Exact ciphertext length produced for `plaintext_len` input bytes.
    pub fn ciphertext_len(&self, plaintext_len: u64) -> u64 {
        let chunk = self.chunk_size as u64;
        let chunks = plaintext_len / chunk + 1;
        HEADER_LEN as u64 + plaintext_len + chunks * TAG_LEN as u64
    }

    /// Encrypt everything `reader` yields into `writer`. Returns plaintext bytes consumed.
    pub fn encrypt<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64, CryptoError> {
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        OsRng.fill_bytes(&mut prefix);
        let header = encode_header(self.chunk_size, &prefix);
        writer.write_all(&header)?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut counter: u32 = 0;
        let mut total = 0u64;
        loop {
            let filled = read_full(&mut reader, &mut buffer)?;
            total += filled as u64;
            let last = filled < self.chunk_size;

            let nonce = chunk_nonce(&prefix, counter, last);
            let sealed = self
                .cipher
                .encrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: &buffer[..filled],
                        aad: &header,
                    },
                )
                .map_err(|_| CryptoError::Encrypt)?;
            writer.write_all(&sealed)?;

            if last {
                break;
            }
            counter = counter.checked_add(1).ok_or(CryptoError::TooLarge)?;
        }

        writer.flush()?;
        Ok(total)
    }

    /// Decrypt a stream produced by [`Encryptor::encrypt`]. Returns plaintext bytes written.
    ///
    /// Chunks are written as they authenticate; on error the caller must
    /// discard whatever already reached `writer`.
    pub fn decrypt<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64, CryptoError> {
        let mut header = [0u8; HEADER_LEN];
        if read_full(&mut reader, &mut header)? < HEADER_LEN {
            return Err(CryptoError::Truncated);
        }
        let (chunk_size, prefix) = decode_header(&header)?;

        let sealed_len = chunk_size + TAG_LEN;
        let mut buffer = vec![0u8; sealed_len];
        let mut counter: u32 = 0;
        let mut total = 0u64;
        loop {
            let filled = read_full(&mut reader, &mut buffer)?;
            if filled < TAG_LEN {
                return Err(CryptoError::Truncated);
            }
            let last = filled < sealed_len;

            let nonce = chunk_nonce(&prefix, counter, last);
            let plaintext = self
                .cipher
                .decrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: &buffer[..filled],
                        aad: &header,
                    },
                )
                .map_err(|_| CryptoError::Authentication)?;
            writer.write_all(&plaintext)?;
            total += plaintext.len() as u64;

            if last {
                let mut probe = [0u8; 1];
                if read_full(&mut reader, &mut probe)? != 0 {
                    return Err(CryptoError::TrailingData);
                }
                break;
            }
            counter = counter.checked_add(1).ok_or(CryptoError::Truncated)?;
        }

        writer.flush()?;
        Ok(total)
    }
}

/// Encrypt an in-memory buffer.
pub fn encrypt_bytes(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let encryptor = Encryptor::new(key)?;
    let mut out = Vec::with_capacity(encryptor.ciphertext_len(data.len() as u64) as usize);
    encryptor.encrypt(data, &mut out)?;
    Ok(out)
}

/// Decrypt an in-memory buffer.
pub fn decrypt_bytes(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let encryptor = Encryptor::new(key)?;
    let mut out = Vec::with_capacity(data.len());
    encryptor.decrypt(data, &mut out)?;
    Ok(out)
}

fn validate_chunk_size(chunk_size: usize) -> Result<(), CryptoError> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(CryptoError::InvalidChunkSize(chunk_size));
    }
    Ok(())
}

fn encode_header(chunk_size: usize, prefix: &[u8; NONCE_PREFIX_LEN]) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = STREAM_VERSION;
    header[1..5].copy_from_slice(&(chunk_size as u32).to_le_bytes());
    header[5..].copy_from_slice(prefix);
    header
}

fn decode_header(header: &[u8; HEADER_LEN]) -> Result<(usize, [u8; NONCE_PREFIX_LEN]), CryptoError> {
    if header[0] != STREAM_VERSION {
        return Err(CryptoError::UnsupportedVersion(header[0]));
    }
    let mut size_bytes = [0u8; 4];
    size_bytes.copy_from_slice(&header[1..5]);
    let chunk_size = u32::from_le_bytes(size_bytes) as usize;
    validate_chunk_size(chunk_size)?;

    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    prefix.copy_from_slice(&header[5..]);
    Ok((chunk_size, prefix))
}

fn chunk_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u32, last: bool) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..11].copy_from_slice(&counter.to_be_bytes());
    nonce[11] = u8::from(last);
    nonce
}

/// Fill `buf` from `reader`, stopping early only at end of input.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
