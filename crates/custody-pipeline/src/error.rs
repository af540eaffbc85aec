use custody_core::{records::RecordError, storage::StorageError};
use custody_storage::{encryptor::CryptoError, key_provider::KeyError, staging::StagingError};
use thiserror::Error;

/// Every way a pipeline invocation can fail.
///
/// `NotFound` and `Registration` happen after the upload went through, so
/// they name the orphaned object for operators to reconcile.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
    #[error("invalid submission: {reason}")]
    InvalidRequest { reason: String },
    #[error("encryption failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("staging failed: {0}")]
    Staging(std::io::Error),
    #[error("upload failed: {0}")]
    Storage(#[from] StorageError),
    #[error("{entity} not found: {id} (orphaned object: {orphaned_object})")]
    NotFound {
        entity: &'static str,
        id: String,
        orphaned_object: String,
    },
    #[error("registration failed: {error} (orphaned object: {orphaned_object})")]
    Registration {
        error: RecordError,
        orphaned_object: String,
    },
}

impl PipelineError {
    pub(crate) fn registration(err: RecordError, object: &str) -> Self {
        match err {
            RecordError::NotFound { entity, id } => PipelineError::NotFound {
                entity,
                id,
                orphaned_object: object.to_string(),
            },
            error => PipelineError::Registration {
                error,
                orphaned_object: object.to_string(),
            },
        }
    }

    /// Stable label for logs and audit descriptions.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration { .. } => "configuration",
            PipelineError::InvalidRequest { .. } => "invalid_request",
            PipelineError::Crypto(_) => "crypto",
            PipelineError::Staging(_) => "staging",
            PipelineError::Storage(_) => "storage",
            PipelineError::NotFound { .. } => "not_found",
            PipelineError::Registration { .. } => "registration",
        }
    }

    /// Object left in the store without an evidence record, if any.
    pub fn orphaned_object(&self) -> Option<&str> {
        match self {
            PipelineError::NotFound {
                orphaned_object, ..
            }
            | PipelineError::Registration {
                orphaned_object, ..
            } => Some(orphaned_object),
            _ => None,
        }
    }
}

impl From<KeyError> for PipelineError {
    fn from(err: KeyError) -> Self {
        PipelineError::Configuration {
            reason: err.to_string(),
        }
    }
}

impl From<StagingError> for PipelineError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::Io(err) => PipelineError::Staging(err),
            StagingError::Crypto(err) => PipelineError::Crypto(err),
        }
    }
}
