use std::{
    fs::{self, File, OpenOptions},
    io::{BufReader, BufWriter, Write},
    path::Path,
    sync::Arc,
};

use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use custody_core::records::CaseStore;
use custody_pipeline::{EvidencePipeline, SubmitEvidence};
use custody_records::LocalCaseStore;
use tracing::warn;
use uuid::Uuid;

use crate::{cases::resolve_actor, cli::EvidenceCommand, config, storage};

const FALLBACK_KIND: &str = "file";

/// Execute an evidence subcommand against the configured stores.
pub async fn handle(cmd: EvidenceCommand, config: &config::Config) -> Result<()> {
    let cases = Arc::new(storage::case_store_from_config(config)?);
    let mut out = std::io::stdout();

    match cmd {
        EvidenceCommand::List { incident } => list(cases.as_ref(), incident, &mut out).await,
        EvidenceCommand::Submit {
            incident,
            path,
            actor,
            kind,
            name,
        } => {
            let pipeline = build_pipeline(config, cases.clone()).await?;
            let request = SubmitRequest {
                incident,
                path: &path,
                actor: &actor,
                kind,
                name,
            };
            submit(&pipeline, cases.as_ref(), request, &mut out).await
        }
        EvidenceCommand::Fetch { id, output, actor } => {
            let pipeline = build_pipeline(config, cases.clone()).await?;
            fetch(&pipeline, cases.as_ref(), id, &output, &actor, &mut out).await
        }
    }
}

async fn build_pipeline(
    config: &config::Config,
    cases: Arc<LocalCaseStore>,
) -> Result<EvidencePipeline> {
    let provider = storage::key_provider_from_config(config);
    EvidencePipeline::from_provider(
        storage::pipeline_config(config),
        provider.as_ref(),
        storage::object_store_from_config(config)?,
        cases.clone(),
        cases,
    )
    .await
    .map_err(|e| eyre!(e.to_string()))
}

pub struct SubmitRequest<'a> {
    pub incident: Uuid,
    pub path: &'a Path,
    pub actor: &'a str,
    pub kind: Option<String>,
    pub name: Option<String>,
}

pub async fn submit<S, W>(
    pipeline: &EvidencePipeline,
    cases: &S,
    request: SubmitRequest<'_>,
    out: &mut W,
) -> Result<()>
where
    S: CaseStore + ?Sized,
    W: Write,
{
    let actor = resolve_actor(cases, request.actor).await?;
    let file_name = match request.name {
        Some(name) => name,
        None => request
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| eyre!("{} has no file name", request.path.display()))?,
    };
    let file_type = request.kind.unwrap_or_else(|| kind_from_path(request.path));

    let file = File::open(request.path)
        .wrap_err_with(|| format!("cannot read {}", request.path.display()))?;
    let submission = pipeline
        .submit_evidence(
            SubmitEvidence {
                incident_id: request.incident,
                actor_id: actor.id,
                file_name,
                file_type,
            },
            BufReader::new(file),
        )
        .await
        .map_err(|e| eyre!(e.to_string()))?;

    let evidence = &submission.evidence;
    writeln!(
        out,
        "Registered evidence {} as {} ({} bytes encrypted)",
        evidence.id, evidence.storage_ref, evidence.ciphertext_len
    )?;
    if submission.is_degraded() {
        writeln!(out, "warning: evidence is stored but the audit entry could not be written")?;
    }
    Ok(())
}

pub async fn list<S, W>(cases: &S, incident: Uuid, out: &mut W) -> Result<()>
where
    S: CaseStore + ?Sized,
    W: Write,
{
    cases
        .incident(incident)
        .await
        .map_err(|e| eyre!(e.to_string()))?;
    let evidence = cases
        .list_evidence(incident)
        .await
        .map_err(|e| eyre!(e.to_string()))?;
    if evidence.is_empty() {
        writeln!(out, "No evidence for incident {incident}.")?;
        return Ok(());
    }
    for item in evidence {
        writeln!(
            out,
            "{} [{}] {} -> {}",
            item.id, item.kind, item.original_name, item.storage_ref
        )?;
    }
    Ok(())
}

/// Decrypt a stored artifact into `output`, which must not exist yet.
/// A partially written file is removed on failure.
pub async fn fetch<S, W>(
    pipeline: &EvidencePipeline,
    cases: &S,
    id: Uuid,
    output: &Path,
    actor: &str,
    out: &mut W,
) -> Result<()>
where
    S: CaseStore + ?Sized,
    W: Write,
{
    let actor = resolve_actor(cases, actor).await?;
    let evidence = cases.evidence(id).await.map_err(|e| eyre!(e.to_string()))?;

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(output)
        .wrap_err_with(|| format!("cannot create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    let result = pipeline
        .fetch_evidence(&evidence, actor.id, &mut writer)
        .await
        .map_err(|e| eyre!(e.to_string()))
        .and_then(|written| {
            writer.flush()?;
            Ok(written)
        });

    match result {
        Ok(written) => {
            writeln!(
                out,
                "Wrote {written} bytes of {} to {}",
                evidence.original_name,
                output.display()
            )?;
            Ok(())
        }
        Err(err) => {
            drop(writer);
            if let Err(rm_err) = fs::remove_file(output) {
                warn!(path = %output.display(), error = %rm_err, "failed to remove partial output");
            }
            Err(err)
        }
    }
}

fn kind_from_path(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| FALLBACK_KIND.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_core::{
        model::{NewIncident, Role, Severity},
        storage::{InMemoryObjectStore, ObjectStore},
    };
    use custody_pipeline::PipelineConfig;
    use custody_storage::key_provider::SymmetricKey;
    use tempfile::TempDir;

    struct Harness {
        pipeline: EvidencePipeline,
        cases: Arc<LocalCaseStore>,
        objects: Arc<InMemoryObjectStore>,
        incident: Uuid,
        dir: TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let cases = Arc::new(LocalCaseStore::in_memory());
        let objects = Arc::new(InMemoryObjectStore::new());
        let alice = cases
            .create_actor("alice".into(), Role::Analyst)
            .await
            .expect("actor");
        let incident = cases
            .open_incident(NewIncident {
                title: "Ransomware".into(),
                description: String::new(),
                severity: Severity::High,
                reported_by: alice.id,
            })
            .await
            .expect("incident")
            .id;
        let pipeline = EvidencePipeline::new(
            PipelineConfig {
                staging_dir: Some(dir.path().join("staging")),
                ..PipelineConfig::default()
            },
            &SymmetricKey::generate(),
            objects.clone(),
            cases.clone(),
            cases.clone(),
        )
        .expect("pipeline");
        Harness {
            pipeline,
            cases,
            objects,
            incident,
            dir,
        }
    }

    fn write_input(h: &Harness, name: &str, body: &[u8]) -> std::path::PathBuf {
        let path = h.dir.path().join(name);
        fs::write(&path, body).expect("write input");
        path
    }

    #[tokio::test]
    async fn submit_then_fetch_round_trips_file() {
        let h = harness().await;
        let input = write_input(&h, "ransom-note.TXT", b"pay up");

        let mut out = Vec::new();
        submit(
            &h.pipeline,
            h.cases.as_ref(),
            SubmitRequest {
                incident: h.incident,
                path: &input,
                actor: "alice",
                kind: None,
                name: None,
            },
            &mut out,
        )
        .await
        .expect("submit");
        assert!(String::from_utf8(out).expect("utf8").starts_with("Registered evidence"));

        let stored = h.cases.list_evidence(h.incident).await.expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, "txt");
        assert_eq!(stored[0].original_name, "ransom-note.TXT");
        assert_eq!(h.objects.len(), 1);

        let output = h.dir.path().join("restored.txt");
        fetch(
            &h.pipeline,
            h.cases.as_ref(),
            stored[0].id,
            &output,
            "alice",
            &mut Vec::new(),
        )
        .await
        .expect("fetch");
        assert_eq!(fs::read(&output).expect("read"), b"pay up");
    }

    #[tokio::test]
    async fn fetch_refuses_to_overwrite() {
        let h = harness().await;
        let input = write_input(&h, "a.bin", b"abc");
        submit(
            &h.pipeline,
            h.cases.as_ref(),
            SubmitRequest {
                incident: h.incident,
                path: &input,
                actor: "alice",
                kind: Some("binary".into()),
                name: None,
            },
            &mut Vec::new(),
        )
        .await
        .expect("submit");
        let id = h.cases.list_evidence(h.incident).await.expect("list")[0].id;

        let err = fetch(&h.pipeline, h.cases.as_ref(), id, &input, "alice", &mut Vec::new())
            .await
            .expect_err("output exists");
        assert!(err.to_string().contains("cannot create"));
        assert_eq!(fs::read(&input).expect("read"), b"abc");
    }

    #[tokio::test]
    async fn fetch_removes_partial_output_on_failure() {
        let h = harness().await;
        let input = write_input(&h, "b.bin", b"xyz");
        submit(
            &h.pipeline,
            h.cases.as_ref(),
            SubmitRequest {
                incident: h.incident,
                path: &input,
                actor: "alice",
                kind: None,
                name: None,
            },
            &mut Vec::new(),
        )
        .await
        .expect("submit");
        let evidence = h.cases.list_evidence(h.incident).await.expect("list").remove(0);
        h.objects
            .delete(&evidence.storage_ref)
            .await
            .expect("delete");

        let output = h.dir.path().join("out.bin");
        fetch(&h.pipeline, h.cases.as_ref(), evidence.id, &output, "alice", &mut Vec::new())
            .await
            .expect_err("object is gone");
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn submit_to_unknown_incident_names_orphan() {
        let h = harness().await;
        let input = write_input(&h, "c.log", b"lines");
        let err = submit(
            &h.pipeline,
            h.cases.as_ref(),
            SubmitRequest {
                incident: Uuid::new_v4(),
                path: &input,
                actor: "alice",
                kind: None,
                name: None,
            },
            &mut Vec::new(),
        )
        .await
        .expect_err("unknown incident");
        assert!(err.to_string().contains("orphaned object"));
        assert_eq!(h.objects.len(), 1);
    }

    #[tokio::test]
    async fn list_requires_known_incident() {
        let h = harness().await;
        let mut out = Vec::new();
        list(h.cases.as_ref(), h.incident, &mut out)
            .await
            .expect("list");
        assert!(String::from_utf8(out).expect("utf8").starts_with("No evidence"));

        assert!(list(h.cases.as_ref(), Uuid::new_v4(), &mut Vec::new())
            .await
            .is_err());
    }

    #[test]
    fn kind_defaults_to_extension() {
        assert_eq!(kind_from_path(Path::new("/x/dump.PCAP")), "pcap");
        assert_eq!(kind_from_path(Path::new("/x/Makefile")), FALLBACK_KIND);
    }
}
