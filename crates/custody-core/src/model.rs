use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ActorId = Uuid;
pub type IncidentId = Uuid;
pub type EvidenceId = Uuid;

/// Status every incident starts in.
pub const INITIAL_STATUS: &str = "New";
/// Status applied when an incident is classified.
pub const CLASSIFIED_STATUS: &str = "Classified";

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_STATUS_LEN: usize = 20;
pub const MAX_KIND_LEN: usize = 50;

/// Evidence type tag as stored: trimmed, 1 to [`MAX_KIND_LEN`] characters.
pub fn normalize_kind(kind: &str) -> Option<&str> {
    let kind = kind.trim();
    let len = kind.chars().count();
    (len > 0 && len <= MAX_KIND_LEN).then_some(kind)
}

/// Closed set of roles an actor may hold.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Security leadership; classifies and oversees incidents.
    Oversight,
    Analyst,
    #[default]
    General,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Oversight => "oversight",
            Role::Analyst => "analyst",
            Role::General => "general",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        };
        f.write_str(label)
    }
}

/// Authenticated identity that reports incidents and uploads evidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl Actor {
    pub fn new(username: String, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            role,
            created_at: Utc::now(),
        }
    }
}

/// Case record evidence is attached to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Incident {
    pub id: IncidentId,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub status: String,
    /// Reporting actor. Deleting the actor deletes the incident.
    pub reported_by: ActorId,
    /// Classifying actor. Cleared when that actor is deleted.
    pub classified_by: Option<ActorId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for opening an incident.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewIncident {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub reported_by: ActorId,
}

impl Incident {
    pub fn open(input: NewIncident) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: input.title,
            description: input.description,
            severity: input.severity,
            status: INITIAL_STATUS.to_string(),
            reported_by: input.reported_by,
            classified_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable link between an incident and an encrypted artifact in the object store.
///
/// Records are never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Evidence {
    pub id: EvidenceId,
    pub incident_id: IncidentId,
    /// Object-store identifier of the ciphertext.
    pub storage_ref: String,
    pub original_name: String,
    /// Free-text type tag (e.g. `pcap`, `memory-dump`).
    pub kind: String,
    pub uploaded_by: ActorId,
    pub ciphertext_len: u64,
    pub created_at: DateTime<Utc>,
}

/// Registration input, built by the pipeline once the upload is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewEvidence {
    pub id: EvidenceId,
    pub incident_id: IncidentId,
    pub storage_ref: String,
    pub original_name: String,
    pub kind: String,
    pub uploaded_by: ActorId,
    pub ciphertext_len: u64,
}

impl From<NewEvidence> for Evidence {
    fn from(input: NewEvidence) -> Self {
        Self {
            id: input.id,
            incident_id: input.incident_id,
            storage_ref: input.storage_ref,
            original_name: input.original_name,
            kind: input.kind,
            uploaded_by: input.uploaded_by,
            ciphertext_len: input.ciphertext_len,
            created_at: Utc::now(),
        }
    }
}

/// Append-only record of an action taken by an actor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor_id: ActorId,
    pub action: String,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(actor_id: ActorId, action: String, description: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            action,
            description,
            recorded_at: Utc::now(),
        }
    }
}
