use std::io::Write;

use color_eyre::{eyre::eyre, Result};
use custody_core::{
    model::{Actor, AuditLogEntry, Incident, NewIncident, Severity},
    records::{AuditLogger, CaseStore},
};
use tracing::warn;

use crate::cli::{ActorCommand, AuditCommand, IncidentCommand};

/// Execute an actor subcommand.
pub async fn handle_actor<S, W>(cmd: ActorCommand, store: &S, out: &mut W) -> Result<()>
where
    S: CaseStore + ?Sized,
    W: Write,
{
    match cmd {
        ActorCommand::Add { username, role } => {
            let actor = store
                .create_actor(username, role.into())
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            writeln!(out, "Created actor {} ({}) {}", actor.username, actor.role, actor.id)?;
        }
        ActorCommand::List => {
            let actors = store.list_actors().await.map_err(|e| eyre!(e.to_string()))?;
            if actors.is_empty() {
                writeln!(out, "No actors yet. Add one with `custody actor add <username>`.")?;
                return Ok(());
            }
            for actor in actors {
                writeln!(out, "{} [{}] {}", actor.id, actor.role, actor.username)?;
            }
        }
        ActorCommand::Remove { username } => {
            let actor = resolve_actor(store, &username).await?;
            store
                .delete_actor(actor.id)
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            writeln!(out, "Removed actor {}", actor.username)?;
        }
    }
    Ok(())
}

/// Execute an incident subcommand. Changes made on behalf of an actor are audited.
pub async fn handle_incident<S, W>(cmd: IncidentCommand, store: &S, out: &mut W) -> Result<()>
where
    S: CaseStore + AuditLogger + ?Sized,
    W: Write,
{
    match cmd {
        IncidentCommand::Open {
            title,
            description,
            severity,
            actor,
        } => {
            let reporter = resolve_actor(store, &actor).await?;
            let incident = store
                .open_incident(NewIncident {
                    title,
                    description,
                    severity: severity.into(),
                    reported_by: reporter.id,
                })
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            audit(
                store,
                &reporter,
                "incident.open",
                format!("opened incident {} ({})", incident.id, incident.title),
            )
            .await;
            writeln!(out, "Opened incident {}: {}", incident.id, incident.title)?;
        }
        IncidentCommand::List => {
            let incidents = store
                .list_incidents()
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            if incidents.is_empty() {
                writeln!(out, "No incidents recorded.")?;
                return Ok(());
            }
            for incident in incidents {
                write_incident(out, &incident)?;
            }
        }
        IncidentCommand::Classify {
            id,
            severity,
            actor,
        } => {
            let classifier = resolve_actor(store, &actor).await?;
            let severity: Severity = severity.into();
            let incident = store
                .classify_incident(id, classifier.id, severity)
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            audit(
                store,
                &classifier,
                "incident.classify",
                format!("classified incident {} as {severity}", incident.id),
            )
            .await;
            writeln!(out, "Classified {} as {}", incident.id, incident.severity)?;
        }
        IncidentCommand::Status { id, status, actor } => {
            let changer = resolve_actor(store, &actor).await?;
            let incident = store
                .set_incident_status(id, status)
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            audit(
                store,
                &changer,
                "incident.status",
                format!("set incident {} status to {}", incident.id, incident.status),
            )
            .await;
            writeln!(out, "Incident {} is now {}", incident.id, incident.status)?;
        }
        IncidentCommand::Remove { id } => {
            store
                .delete_incident(id)
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            writeln!(out, "Removed incident {id}")?;
        }
    }
    Ok(())
}

pub async fn handle_audit<S, W>(cmd: AuditCommand, store: &S, out: &mut W) -> Result<()>
where
    S: CaseStore + ?Sized,
    W: Write,
{
    let AuditCommand::List { actor } = cmd;
    let filter = match actor {
        Some(username) => Some(resolve_actor(store, &username).await?.id),
        None => None,
    };
    let entries: Vec<AuditLogEntry> = store
        .list_audit()
        .await
        .map_err(|e| eyre!(e.to_string()))?
        .into_iter()
        .filter(|entry| filter.is_none_or(|id| entry.actor_id == id))
        .collect();
    if entries.is_empty() {
        writeln!(out, "Audit log is empty.")?;
        return Ok(());
    }
    for entry in entries {
        writeln!(
            out,
            "{} {} {} {}",
            entry.recorded_at.to_rfc3339(),
            entry.actor_id,
            entry.action,
            entry.description
        )?;
    }
    Ok(())
}

pub async fn resolve_actor<S: CaseStore + ?Sized>(store: &S, username: &str) -> Result<Actor> {
    store
        .actor_by_username(username)
        .await
        .map_err(|e| eyre!(e.to_string()))
}

async fn audit<S: AuditLogger + ?Sized>(store: &S, actor: &Actor, action: &str, description: String) {
    if let Err(err) = store.record(actor.id, action, &description).await {
        warn!(action, error = %err, "audit append failed");
    }
}

fn write_incident<W: Write>(out: &mut W, incident: &Incident) -> Result<()> {
    writeln!(
        out,
        "{} [{} / {}] {}",
        incident.id, incident.severity, incident.status, incident.title
    )?;
    if !incident.description.is_empty() {
        writeln!(out, "    {}", incident.description)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{RoleArg, SeverityArg};
    use custody_records::LocalCaseStore;

    async fn store_with_alice() -> LocalCaseStore {
        let store = LocalCaseStore::in_memory();
        handle_actor(
            ActorCommand::Add {
                username: "alice".into(),
                role: RoleArg::Oversight,
            },
            &store,
            &mut Vec::new(),
        )
        .await
        .expect("add alice");
        store
    }

    async fn open_incident(store: &LocalCaseStore) -> Incident {
        handle_incident(
            IncidentCommand::Open {
                title: "Phishing wave".into(),
                description: "Credential harvesting emails".into(),
                severity: SeverityArg::Medium,
                actor: "alice".into(),
            },
            store,
            &mut Vec::new(),
        )
        .await
        .expect("open");
        store.list_incidents().await.expect("list").remove(0)
    }

    #[tokio::test]
    async fn actor_list_prints_each_actor() {
        let store = store_with_alice().await;
        let mut out = Vec::new();
        handle_actor(ActorCommand::List, &store, &mut out)
            .await
            .expect("list");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("[oversight] alice"));
    }

    #[tokio::test]
    async fn incident_open_is_audited() {
        let store = store_with_alice().await;
        let incident = open_incident(&store).await;
        assert_eq!(incident.status, "New");

        let audit = store.list_audit().await.expect("audit");
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "incident.open");
    }

    #[tokio::test]
    async fn classify_updates_severity_and_status() {
        let store = store_with_alice().await;
        let incident = open_incident(&store).await;

        let mut out = Vec::new();
        handle_incident(
            IncidentCommand::Classify {
                id: incident.id,
                severity: SeverityArg::High,
                actor: "alice".into(),
            },
            &store,
            &mut out,
        )
        .await
        .expect("classify");

        let updated = store.incident(incident.id).await.expect("incident");
        assert_eq!(updated.severity, Severity::High);
        assert_eq!(updated.status, "Classified");
        assert_eq!(updated.classified_by, Some(updated.reported_by));
        assert!(String::from_utf8(out).expect("utf8").contains("High"));
    }

    #[tokio::test]
    async fn unknown_actor_is_reported() {
        let store = LocalCaseStore::in_memory();
        let err = handle_incident(
            IncidentCommand::Open {
                title: "x".into(),
                description: String::new(),
                severity: SeverityArg::Low,
                actor: "mallory".into(),
            },
            &store,
            &mut Vec::new(),
        )
        .await
        .expect_err("no such actor");
        assert!(err.to_string().contains("mallory"));
    }

    #[tokio::test]
    async fn audit_list_filters_by_actor() {
        let store = store_with_alice().await;
        handle_actor(
            ActorCommand::Add {
                username: "bob".into(),
                role: RoleArg::Analyst,
            },
            &store,
            &mut Vec::new(),
        )
        .await
        .expect("add bob");
        open_incident(&store).await;

        let mut out = Vec::new();
        handle_audit(
            AuditCommand::List {
                actor: Some("bob".into()),
            },
            &store,
            &mut out,
        )
        .await
        .expect("audit list");
        assert_eq!(String::from_utf8(out).expect("utf8"), "Audit log is empty.\n");
    }

    #[tokio::test]
    async fn removing_actor_cascades_their_incidents() {
        let store = store_with_alice().await;
        open_incident(&store).await;

        handle_actor(
            ActorCommand::Remove {
                username: "alice".into(),
            },
            &store,
            &mut Vec::new(),
        )
        .await
        .expect("remove");
        assert!(store.list_incidents().await.expect("list").is_empty());
    }
}
