use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by object store clients.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Network failure before the store answered.
    #[error("transport failure: {reason}")]
    Transport { reason: String },
    /// Credentials were missing or refused.
    #[error("object store refused credentials")]
    Unauthorized,
    /// The store answered but refused the request (duplicate name, quota, ...).
    #[error("object store rejected request ({status}): {reason}")]
    Rejected { status: u16, reason: String },
    #[error("object not found: {name}")]
    NotFound { name: String },
    /// Local failure reading the payload.
    #[error("local i/o failure: {reason}")]
    Io { reason: String },
}

/// Confirmation that a blob is present in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Identifier the blob can be fetched by.
    pub key: String,
    pub size: u64,
}

/// Name-addressable put/get contract the custody pipeline needs from a remote object store.
///
/// Uploads never overwrite: putting an existing name must fail with
/// [`StorageError::Rejected`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    /// Store `data` under `name`. Returns only once the blob is confirmed present.
    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<UploadReceipt, StorageError>;

    /// Store the contents of a local file under `name`.
    async fn upload_file(&self, name: &str, path: &Path) -> Result<UploadReceipt, StorageError> {
        let data = tokio::fs::read(path).await.map_err(|err| StorageError::Io {
            reason: err.to_string(),
        })?;
        self.upload(name, data).await
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove a blob (idempotent).
    async fn delete(&self, name: &str) -> Result<(), StorageError>;
}

/// Build the object name for an evidence artifact: `{incident}/{evidence}/{file}.enc`.
///
/// Only the final path component of `original_name` is kept, so a hostile
/// upload name cannot escape its incident prefix.
pub fn evidence_object_name(
    incident_id: &uuid::Uuid,
    evidence_id: &uuid::Uuid,
    original_name: &str,
) -> String {
    format!(
        "{incident_id}/{evidence_id}/{}.enc",
        sanitize_file_name(original_name)
    )
}

fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// In-memory object store for tests and offline smoke runs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryObjectStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent uploads fail with a transport error.
    pub fn fail_uploads(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn object_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|map| {
                let mut names: Vec<String> = map.keys().cloned().collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<UploadReceipt, StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Transport {
                reason: "simulated outage".to_string(),
            });
        }

        let mut map = self.inner.lock().map_err(|err| StorageError::Io {
            reason: format!("lock poisoned: {err}"),
        })?;
        if map.contains_key(name) {
            return Err(StorageError::Rejected {
                status: 409,
                reason: format!("duplicate object name: {name}"),
            });
        }

        let size = data.len() as u64;
        map.insert(name.to_string(), data);
        Ok(UploadReceipt {
            key: name.to_string(),
            size,
        })
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let map = self.inner.lock().map_err(|err| StorageError::Io {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.get(name).cloned().ok_or_else(|| StorageError::NotFound {
            name: name.to_string(),
        })
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let mut map = self.inner.lock().map_err(|err| StorageError::Io {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.remove(name);
        Ok(())
    }
}
