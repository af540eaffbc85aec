use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::Utc;
use custody_core::{
    model::{
        Actor, ActorId, AuditLogEntry, Evidence, EvidenceId, Incident, IncidentId, NewEvidence,
        NewIncident, Role, Severity, CLASSIFIED_STATUS, MAX_KIND_LEN, MAX_STATUS_LEN,
        MAX_TITLE_LEN, normalize_kind,
    },
    records::{AuditError, AuditLogger, CaseStore, EvidenceRegistrar, RecordError},
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Every table of the case store, persisted as one JSON document.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CaseBook {
    actors: Vec<Actor>,
    incidents: Vec<Incident>,
    evidence: Vec<Evidence>,
    audit: Vec<AuditLogEntry>,
}

impl CaseBook {
    fn actor(&self, id: ActorId) -> Result<&Actor, RecordError> {
        self.actors
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| not_found("actor", id))
    }

    fn incident_mut(&mut self, id: IncidentId) -> Result<&mut Incident, RecordError> {
        self.incidents
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| not_found("incident", id))
    }

    fn remove_incidents(&mut self, doomed: impl Fn(&Incident) -> bool) {
        let removed: Vec<IncidentId> = self
            .incidents
            .iter()
            .filter(|i| doomed(i))
            .map(|i| i.id)
            .collect();
        self.incidents.retain(|i| !removed.contains(&i.id));
        self.evidence.retain(|e| !removed.contains(&e.incident_id));
    }
}

/// Case store kept in memory and, when opened from a path, mirrored to a JSON file.
///
/// Each write is applied to a copy of the tables, persisted atomically, and
/// only then made visible, so a failed write leaves no partial state.
pub struct LocalCaseStore {
    path: Option<PathBuf>,
    book: Mutex<CaseBook>,
}

impl LocalCaseStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            book: Mutex::new(CaseBook::default()),
        }
    }

    /// Open (or start) a store persisted at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RecordError> {
        let path = path.into();
        let book = load_book(&path)?;
        debug!(path = %path.display(), actors = book.actors.len(), incidents = book.incidents.len(), "opened case store");
        Ok(Self {
            path: Some(path),
            book: Mutex::new(book),
        })
    }

    fn read<T>(&self, f: impl FnOnce(&CaseBook) -> Result<T, RecordError>) -> Result<T, RecordError> {
        let guard = self.book.lock().map_err(|err| RecordError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        f(&guard)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut CaseBook) -> Result<T, RecordError>,
    ) -> Result<T, RecordError> {
        let mut guard = self.book.lock().map_err(|err| RecordError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        if let Some(path) = &self.path {
            save_book(path, &draft)?;
        }
        *guard = draft;
        Ok(out)
    }
}

#[async_trait]
impl CaseStore for LocalCaseStore {
    #[instrument(skip(self))]
    async fn create_actor(&self, username: String, role: Role) -> Result<Actor, RecordError> {
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(invalid("username", "must not be empty"));
        }
        self.write(|book| {
            if book.actors.iter().any(|a| a.username == username) {
                return Err(RecordError::Conflict {
                    entity: "actor",
                    key: username.clone(),
                });
            }
            let actor = Actor::new(username, role);
            book.actors.push(actor.clone());
            Ok(actor)
        })
    }

    async fn actor(&self, id: ActorId) -> Result<Actor, RecordError> {
        self.read(|book| book.actor(id).cloned())
    }

    async fn actor_by_username(&self, username: &str) -> Result<Actor, RecordError> {
        self.read(|book| {
            book.actors
                .iter()
                .find(|a| a.username == username)
                .cloned()
                .ok_or_else(|| RecordError::NotFound {
                    entity: "actor",
                    id: username.to_string(),
                })
        })
    }

    async fn list_actors(&self) -> Result<Vec<Actor>, RecordError> {
        self.read(|book| Ok(book.actors.clone()))
    }

    #[instrument(skip(self))]
    async fn delete_actor(&self, id: ActorId) -> Result<(), RecordError> {
        self.write(|book| {
            book.actor(id)?;
            book.actors.retain(|a| a.id != id);
            book.remove_incidents(|i| i.reported_by == id);
            book.evidence.retain(|e| e.uploaded_by != id);
            for incident in book.incidents.iter_mut() {
                if incident.classified_by == Some(id) {
                    incident.classified_by = None;
                    incident.updated_at = Utc::now();
                }
            }
            Ok(())
        })
    }

    #[instrument(skip(self, input), fields(reporter = %input.reported_by))]
    async fn open_incident(&self, input: NewIncident) -> Result<Incident, RecordError> {
        validate_title(&input.title)?;
        self.write(|book| {
            book.actor(input.reported_by)?;
            let incident = Incident::open(input);
            book.incidents.push(incident.clone());
            Ok(incident)
        })
    }

    async fn incident(&self, id: IncidentId) -> Result<Incident, RecordError> {
        self.read(|book| {
            book.incidents
                .iter()
                .find(|i| i.id == id)
                .cloned()
                .ok_or_else(|| not_found("incident", id))
        })
    }

    async fn list_incidents(&self) -> Result<Vec<Incident>, RecordError> {
        self.read(|book| Ok(book.incidents.clone()))
    }

    #[instrument(skip(self))]
    async fn classify_incident(
        &self,
        id: IncidentId,
        classifier: ActorId,
        severity: Severity,
    ) -> Result<Incident, RecordError> {
        self.write(|book| {
            book.actor(classifier)?;
            let incident = book.incident_mut(id)?;
            incident.severity = severity;
            incident.classified_by = Some(classifier);
            incident.status = CLASSIFIED_STATUS.to_string();
            incident.updated_at = Utc::now();
            Ok(incident.clone())
        })
    }

    #[instrument(skip(self))]
    async fn set_incident_status(
        &self,
        id: IncidentId,
        status: String,
    ) -> Result<Incident, RecordError> {
        let status = status.trim().to_string();
        if status.is_empty() || status.chars().count() > MAX_STATUS_LEN {
            return Err(invalid(
                "status",
                &format!("must be 1-{MAX_STATUS_LEN} characters"),
            ));
        }
        self.write(|book| {
            let incident = book.incident_mut(id)?;
            incident.status = status;
            incident.updated_at = Utc::now();
            Ok(incident.clone())
        })
    }

    #[instrument(skip(self))]
    async fn delete_incident(&self, id: IncidentId) -> Result<(), RecordError> {
        self.write(|book| {
            book.incident_mut(id)?;
            book.remove_incidents(|i| i.id == id);
            Ok(())
        })
    }

    async fn evidence(&self, id: EvidenceId) -> Result<Evidence, RecordError> {
        self.read(|book| {
            book.evidence
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .ok_or_else(|| not_found("evidence", id))
        })
    }

    async fn list_evidence(&self, incident_id: IncidentId) -> Result<Vec<Evidence>, RecordError> {
        self.read(|book| {
            Ok(book
                .evidence
                .iter()
                .filter(|e| e.incident_id == incident_id)
                .cloned()
                .collect())
        })
    }

    async fn list_audit(&self) -> Result<Vec<AuditLogEntry>, RecordError> {
        self.read(|book| Ok(book.audit.clone()))
    }
}

#[async_trait]
impl EvidenceRegistrar for LocalCaseStore {
    #[instrument(skip_all, fields(evidence = %evidence.id, incident = %evidence.incident_id))]
    async fn register(&self, mut evidence: NewEvidence) -> Result<Evidence, RecordError> {
        evidence.kind = normalize_kind(&evidence.kind)
            .ok_or_else(|| invalid("kind", &format!("must be 1-{MAX_KIND_LEN} characters")))?
            .to_string();
        self.write(|book| {
            book.incident_mut(evidence.incident_id)?;
            book.actor(evidence.uploaded_by)?;
            if book.evidence.iter().any(|e| e.id == evidence.id) {
                return Err(RecordError::Conflict {
                    entity: "evidence",
                    key: evidence.id.to_string(),
                });
            }
            let record = Evidence::from(evidence);
            book.evidence.push(record.clone());
            Ok(record)
        })
    }
}

#[async_trait]
impl AuditLogger for LocalCaseStore {
    #[instrument(skip(self, description))]
    async fn record(
        &self,
        actor_id: ActorId,
        action: &str,
        description: &str,
    ) -> Result<AuditLogEntry, AuditError> {
        self.write(|book| {
            book.actor(actor_id)?;
            let entry = AuditLogEntry::new(actor_id, action.to_string(), description.to_string());
            book.audit.push(entry.clone());
            Ok(entry)
        })
        .map_err(|err| AuditError {
            reason: err.to_string(),
        })
    }
}

fn validate_title(title: &str) -> Result<(), RecordError> {
    if title.trim().is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(invalid(
            "title",
            &format!("must be 1-{MAX_TITLE_LEN} characters"),
        ));
    }
    Ok(())
}

fn not_found(entity: &'static str, id: impl ToString) -> RecordError {
    RecordError::NotFound {
        entity,
        id: id.to_string(),
    }
}

fn invalid(field: &'static str, reason: &str) -> RecordError {
    RecordError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn load_book(path: &Path) -> Result<CaseBook, RecordError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(CaseBook::default()),
        Err(err) => return Err(storage_err(err)),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Ok(CaseBook::default());
    }
    serde_json::from_slice(&buf).map_err(storage_err)
}

fn save_book(path: &Path, book: &CaseBook) -> Result<(), RecordError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec_pretty(book).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn storage_err<E: ToString>(err: E) -> RecordError {
    RecordError::Storage {
        reason: err.to_string(),
    }
}
