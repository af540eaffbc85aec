//! Evidence custody pipeline: stage, encrypt, upload, register, audit, clean up.
//!
//! An evidence record is only ever created after the object store has
//! confirmed the ciphertext upload, and staged files never outlive the
//! invocation that created them.

mod error;

use std::{
    fmt,
    io::{Read, Write},
    path::PathBuf,
    sync::Arc,
};

use custody_core::{
    model::{normalize_kind, ActorId, Evidence, IncidentId, NewEvidence, MAX_KIND_LEN},
    records::{AuditLogger, EvidenceRegistrar},
    storage::{evidence_object_name, ObjectStore},
};
use custody_storage::{
    encryptor::{Encryptor, DEFAULT_CHUNK_SIZE},
    key_provider::{KeyProvider, SymmetricKey},
    staging::{StagedUpload, StagingArea},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub use crate::error::PipelineError;

pub const ACTION_UPLOAD: &str = "evidence.upload";
pub const ACTION_UPLOAD_FAILED: &str = "evidence.upload_failed";
pub const ACTION_DOWNLOAD: &str = "evidence.download";

/// Tunables for a pipeline instance. Secrets are passed separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root for per-invocation staging directories (system temp dir when unset).
    pub staging_dir: Option<PathBuf>,
    /// Plaintext bytes per encrypted chunk.
    pub chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging_dir: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Progress of one invocation.
///
/// A failing run moves to `Failed` from whatever stage it reached; staging is
/// then released and every run that got past validation ends in `Cleaned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Staged,
    Encrypted,
    Uploaded,
    Registered,
    Logged,
    /// Carries the [`PipelineError::kind`] label.
    Failed(&'static str),
    Cleaned,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineStage::Received => "received",
            PipelineStage::Staged => "staged",
            PipelineStage::Encrypted => "encrypted",
            PipelineStage::Uploaded => "uploaded",
            PipelineStage::Registered => "registered",
            PipelineStage::Logged => "logged",
            PipelineStage::Failed(kind) => return write!(f, "failed({kind})"),
            PipelineStage::Cleaned => "cleaned",
        };
        f.write_str(label)
    }
}

/// Stages visited by one invocation, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Progress {
    trail: Vec<PipelineStage>,
}

impl Progress {
    fn new() -> Self {
        Self {
            trail: vec![PipelineStage::Received],
        }
    }

    fn current(&self) -> PipelineStage {
        self.trail
            .last()
            .copied()
            .unwrap_or(PipelineStage::Received)
    }

    fn advance(&mut self, next: PipelineStage) {
        debug!(from = %self.current(), to = %next, "pipeline transition");
        self.trail.push(next);
    }

    fn fail(&mut self, err: &PipelineError) {
        let reached = self.current();
        self.advance(PipelineStage::Failed(err.kind()));
        debug!(failed_after = %reached, "pipeline failed");
    }
}

/// One evidence upload as handed over by the web layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitEvidence {
    pub incident_id: IncidentId,
    pub actor_id: ActorId,
    pub file_name: String,
    /// Free-text type tag stored on the evidence record.
    pub file_type: String,
}

/// Whether the audit trail caught up with a committed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditStatus {
    Recorded { entry_id: Uuid },
    /// Evidence is committed but the audit append failed.
    Degraded { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub evidence: Evidence,
    pub audit: AuditStatus,
}

impl Submission {
    pub fn is_degraded(&self) -> bool {
        matches!(self.audit, AuditStatus::Degraded { .. })
    }
}

pub struct EvidencePipeline {
    encryptor: Encryptor,
    staging: StagingArea,
    objects: Arc<dyn ObjectStore>,
    registrar: Arc<dyn EvidenceRegistrar>,
    audit: Arc<dyn AuditLogger>,
}

impl EvidencePipeline {
    pub fn new(
        config: PipelineConfig,
        key: &SymmetricKey,
        objects: Arc<dyn ObjectStore>,
        registrar: Arc<dyn EvidenceRegistrar>,
        audit: Arc<dyn AuditLogger>,
    ) -> Result<Self, PipelineError> {
        let encryptor = Encryptor::new(key)?
            .with_chunk_size(config.chunk_size)
            .map_err(|err| PipelineError::Configuration {
                reason: err.to_string(),
            })?;
        let staging = match config.staging_dir {
            Some(dir) => StagingArea::new(dir),
            None => StagingArea::in_temp_dir(),
        };
        Ok(Self {
            encryptor,
            staging,
            objects,
            registrar,
            audit,
        })
    }

    /// Read the key once from `provider` and build the pipeline.
    pub async fn from_provider(
        config: PipelineConfig,
        provider: &dyn KeyProvider,
        objects: Arc<dyn ObjectStore>,
        registrar: Arc<dyn EvidenceRegistrar>,
        audit: Arc<dyn AuditLogger>,
    ) -> Result<Self, PipelineError> {
        let key = provider.get_key().await?;
        Self::new(config, &key, objects, registrar, audit)
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Run one file through the custody pipeline.
    ///
    /// Staged files are removed on every exit path. On success the returned
    /// evidence record references the uploaded ciphertext.
    #[instrument(
        skip_all,
        fields(incident = %request.incident_id, actor = %request.actor_id, store = self.objects.name())
    )]
    pub async fn submit_evidence<R: Read + Send>(
        &self,
        request: SubmitEvidence,
        content: R,
    ) -> Result<Submission, PipelineError> {
        let mut progress = Progress::new();
        let result = self.run(&request, content, &mut progress).await;

        match result {
            Ok(submission) => {
                info!(
                    evidence = %submission.evidence.id,
                    storage_ref = %submission.evidence.storage_ref,
                    degraded = submission.is_degraded(),
                    "evidence committed"
                );
                Ok(submission)
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "evidence submission failed");
                self.record_failure(&request, &err).await;
                Err(err)
            }
        }
    }

    async fn run<R: Read + Send>(
        &self,
        request: &SubmitEvidence,
        content: R,
        progress: &mut Progress,
    ) -> Result<Submission, PipelineError> {
        let kind = match validate(request) {
            Ok(kind) => kind,
            Err(err) => {
                progress.fail(&err);
                return Err(err);
            }
        };
        // A failed stage() removes its own directory when the TempDir drops.
        let mut staged = match self.staging.stage(content) {
            Ok(staged) => staged,
            Err(err) => {
                let err = PipelineError::from(err);
                progress.fail(&err);
                progress.advance(PipelineStage::Cleaned);
                return Err(err);
            }
        };
        progress.advance(PipelineStage::Staged);

        let outcome = self.commit(request, kind, &mut staged, progress).await;
        if let Err(err) = &outcome {
            progress.fail(err);
        }

        self.staging.release(staged);
        progress.advance(PipelineStage::Cleaned);
        outcome
    }

    async fn commit(
        &self,
        request: &SubmitEvidence,
        kind: &str,
        staged: &mut StagedUpload,
        progress: &mut Progress,
    ) -> Result<Submission, PipelineError> {
        let artifact = staged.materialize_encrypted(&self.encryptor)?;
        progress.advance(PipelineStage::Encrypted);

        let evidence_id = Uuid::new_v4();
        let object_name =
            evidence_object_name(&request.incident_id, &evidence_id, &request.file_name);
        let receipt = self
            .objects
            .upload_file(&object_name, &artifact.path)
            .await?;
        progress.advance(PipelineStage::Uploaded);

        let evidence = self
            .registrar
            .register(NewEvidence {
                id: evidence_id,
                incident_id: request.incident_id,
                storage_ref: receipt.key.clone(),
                original_name: request.file_name.clone(),
                kind: kind.to_string(),
                uploaded_by: request.actor_id,
                ciphertext_len: artifact.len,
            })
            .await
            .map_err(|err| PipelineError::registration(err, &receipt.key))?;
        progress.advance(PipelineStage::Registered);

        let description = format!(
            "uploaded {} ({}) to incident {} as {}",
            evidence.original_name, evidence.kind, evidence.incident_id, evidence.storage_ref
        );
        let audit = match self
            .audit
            .record(request.actor_id, ACTION_UPLOAD, &description)
            .await
        {
            Ok(entry) => AuditStatus::Recorded { entry_id: entry.id },
            Err(err) => {
                warn!(evidence = %evidence.id, error = %err, "audit append failed; evidence remains committed");
                AuditStatus::Degraded { reason: err.reason }
            }
        };
        progress.advance(PipelineStage::Logged);

        Ok(Submission { evidence, audit })
    }

    async fn record_failure(&self, request: &SubmitEvidence, err: &PipelineError) {
        let description = format!(
            "upload of {} to incident {} failed: {}",
            request.file_name,
            request.incident_id,
            err.kind()
        );
        if let Err(audit_err) = self
            .audit
            .record(request.actor_id, ACTION_UPLOAD_FAILED, &description)
            .await
        {
            debug!(error = %audit_err, "could not audit failed submission");
        }
    }

    /// Download and decrypt a stored artifact into `writer`. Returns plaintext bytes written.
    ///
    /// On error, anything already written to `writer` must be discarded.
    #[instrument(skip_all, fields(evidence = %evidence.id, actor = %actor_id))]
    pub async fn fetch_evidence<W: Write + Send>(
        &self,
        evidence: &Evidence,
        actor_id: ActorId,
        writer: W,
    ) -> Result<u64, PipelineError> {
        let ciphertext = self.objects.download(&evidence.storage_ref).await?;
        let written = self.encryptor.decrypt(&ciphertext[..], writer)?;

        let description = format!(
            "downloaded {} from incident {}",
            evidence.original_name, evidence.incident_id
        );
        if let Err(err) = self
            .audit
            .record(actor_id, ACTION_DOWNLOAD, &description)
            .await
        {
            warn!(error = %err, "audit append failed for download");
        }
        Ok(written)
    }
}

/// Checks a request up front and returns the type tag as it will be stored.
fn validate(request: &SubmitEvidence) -> Result<&str, PipelineError> {
    if request.file_name.trim().is_empty() {
        return Err(PipelineError::InvalidRequest {
            reason: "file name must not be empty".to_string(),
        });
    }
    normalize_kind(&request.file_type).ok_or_else(|| PipelineError::InvalidRequest {
        reason: format!("file type must be 1-{MAX_KIND_LEN} characters"),
    })
}

#[cfg(test)]
mod tests;
