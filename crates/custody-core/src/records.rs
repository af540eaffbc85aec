use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    Actor, ActorId, AuditLogEntry, Evidence, EvidenceId, Incident, IncidentId, NewEvidence,
    NewIncident, Role, Severity,
};

/// Errors produced by metadata stores.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// Referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    /// Unique constraint violated.
    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    /// Underlying persistence failure.
    #[error("metadata store failure: {reason}")]
    Storage { reason: String },
}

/// Errors produced by audit loggers.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("audit append failed: {reason}")]
pub struct AuditError {
    pub reason: String,
}

/// Creates evidence records. Only called after the ciphertext upload is confirmed.
#[async_trait]
pub trait EvidenceRegistrar: Send + Sync {
    /// Persist the record. Fails with [`RecordError::NotFound`] when the
    /// incident or uploading actor is unknown.
    async fn register(&self, evidence: NewEvidence) -> Result<Evidence, RecordError>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Durably append an entry before returning.
    async fn record(
        &self,
        actor_id: ActorId,
        action: &str,
        description: &str,
    ) -> Result<AuditLogEntry, AuditError>;
}

/// Management operations over actors, incidents and their evidence.
///
/// Implementations enforce the relational rules: deleting an incident deletes
/// its evidence, deleting an actor deletes the incidents it reported and the
/// evidence it uploaded, and clears it as classifier elsewhere. Audit entries
/// are never removed.
#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn create_actor(&self, username: String, role: Role) -> Result<Actor, RecordError>;
    async fn actor(&self, id: ActorId) -> Result<Actor, RecordError>;
    async fn actor_by_username(&self, username: &str) -> Result<Actor, RecordError>;
    async fn list_actors(&self) -> Result<Vec<Actor>, RecordError>;
    async fn delete_actor(&self, id: ActorId) -> Result<(), RecordError>;

    async fn open_incident(&self, input: NewIncident) -> Result<Incident, RecordError>;
    async fn incident(&self, id: IncidentId) -> Result<Incident, RecordError>;
    async fn list_incidents(&self) -> Result<Vec<Incident>, RecordError>;
    /// Set severity and classifier; moves the status to `Classified`.
    async fn classify_incident(
        &self,
        id: IncidentId,
        classifier: ActorId,
        severity: Severity,
    ) -> Result<Incident, RecordError>;
    async fn set_incident_status(
        &self,
        id: IncidentId,
        status: String,
    ) -> Result<Incident, RecordError>;
    async fn delete_incident(&self, id: IncidentId) -> Result<(), RecordError>;

    async fn evidence(&self, id: EvidenceId) -> Result<Evidence, RecordError>;
    async fn list_evidence(&self, incident_id: IncidentId) -> Result<Vec<Evidence>, RecordError>;

    async fn list_audit(&self) -> Result<Vec<AuditLogEntry>, RecordError>;
}
