use std::fmt;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// Environment variable read by [`EnvKeyProvider::default`].
pub const DEFAULT_KEY_VAR: &str = "CUSTODY_ENCRYPTION_KEY";

/// Symmetric key used for evidence encryption at rest.
///
/// Key bytes never appear in `Debug` output and are wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; KEY_LEN],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Configuration errors. Messages name the source, never the secret.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("encryption key not configured ({source_name})")]
    Missing { source_name: String },
    #[error("encryption key from {source_name} is invalid: expected 32 bytes")]
    InvalidLength { source_name: String },
    #[error("keyring error: {0}")]
    Keyring(String),
}

/// Supplies the process-wide evidence key.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn get_key(&self) -> Result<SymmetricKey, KeyError>;
}

/// Reads the key from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvKeyProvider {
    var: String,
}

impl EnvKeyProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvKeyProvider {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_VAR)
    }
}

#[async_trait]
impl KeyProvider for EnvKeyProvider {
    async fn get_key(&self) -> Result<SymmetricKey, KeyError> {
        let source_name = format!("env:{}", self.var);
        match std::env::var(&self.var) {
            Ok(mut secret) => {
                let key = decode_key(&secret, &source_name);
                secret.zeroize();
                key
            }
            Err(_) => Err(KeyError::Missing { source_name }),
        }
    }
}

/// OS keyring-backed provider. Read-only: the key is provisioned out of band.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn get_key(&self) -> Result<SymmetricKey, KeyError> {
        let source_name = format!("keyring:{}/{}", self.service, self.account);
        let entry = keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Keyring(e.to_string()))?;
        key_from_entry(&entry, source_name)
    }
}

fn key_from_entry(entry: &keyring::Entry, source_name: String) -> Result<SymmetricKey, KeyError> {
    match entry.get_password() {
        Ok(mut secret) => {
            let key = decode_key(&secret, &source_name);
            secret.zeroize();
            key
        }
        Err(keyring::Error::NoEntry) => Err(KeyError::Missing { source_name }),
        Err(err) => Err(KeyError::Keyring(err.to_string())),
    }
}

/// Hands out an already-loaded key (tests, embedding).
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    key: SymmetricKey,
}

impl StaticKeyProvider {
    pub fn new(key: SymmetricKey) -> Self {
        Self { key }
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn get_key(&self) -> Result<SymmetricKey, KeyError> {
        Ok(self.key.clone())
    }
}

/// Encode a key the way [`decode_key`] expects it (standard base64).
pub fn encode_key(key: &SymmetricKey) -> String {
    general_purpose::STANDARD.encode(key.as_bytes())
}

/// Accepts standard base64 of exactly 32 bytes, or a raw 32-byte string.
pub fn decode_key(secret: &str, source_name: &str) -> Result<SymmetricKey, KeyError> {
    let secret = secret.trim();
    if secret.is_empty() {
        return Err(KeyError::Missing {
            source_name: source_name.to_string(),
        });
    }

    if let Ok(mut decoded) = general_purpose::STANDARD.decode(secret) {
        if decoded.len() == KEY_LEN {
            let key = key_from_slice(&decoded);
            decoded.zeroize();
            return Ok(key);
        }
        decoded.zeroize();
    }

    if secret.len() == KEY_LEN {
        return Ok(key_from_slice(secret.as_bytes()));
    }

    Err(KeyError::InvalidLength {
        source_name: source_name.to_string(),
    })
}

fn key_from_slice(bytes: &[u8]) -> SymmetricKey {
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(bytes);
    SymmetricKey::from_bytes(out)
}
