use std::io;

use async_trait::async_trait;
use custody_core::{
    model::{Actor, AuditLogEntry, Incident, NewIncident, Role, Severity},
    records::{AuditError, CaseStore},
    storage::{InMemoryObjectStore, StorageError},
};
use custody_records::LocalCaseStore;
use custody_storage::{
    encryptor::{decrypt_bytes, CryptoError},
    key_provider::EnvKeyProvider,
};
use tempfile::TempDir;

use super::*;

struct Fixture {
    pipeline: EvidencePipeline,
    key: SymmetricKey,
    objects: Arc<InMemoryObjectStore>,
    cases: Arc<LocalCaseStore>,
    alice: Actor,
    incident: Incident,
    _staging_root: TempDir,
}

async fn fixture() -> Fixture {
    fixture_with_audit(None).await
}

async fn fixture_with_audit(audit: Option<Arc<dyn AuditLogger>>) -> Fixture {
    let staging_root = tempfile::tempdir().expect("tempdir");
    let key = SymmetricKey::generate();
    let objects = Arc::new(InMemoryObjectStore::new());
    let cases = Arc::new(LocalCaseStore::in_memory());

    let alice = cases
        .create_actor("alice".into(), Role::Analyst)
        .await
        .expect("actor");
    let incident = cases
        .open_incident(NewIncident {
            title: "Suspicious login".into(),
            description: "Impossible travel for finance admin".into(),
            severity: Severity::High,
            reported_by: alice.id,
        })
        .await
        .expect("incident");

    let audit = audit.unwrap_or_else(|| cases.clone() as Arc<dyn AuditLogger>);
    let pipeline = EvidencePipeline::new(
        PipelineConfig {
            staging_dir: Some(staging_root.path().to_path_buf()),
            chunk_size: DEFAULT_CHUNK_SIZE,
        },
        &key,
        objects.clone(),
        cases.clone(),
        audit,
    )
    .expect("pipeline");

    Fixture {
        pipeline,
        key,
        objects,
        cases,
        alice,
        incident,
        _staging_root: staging_root,
    }
}

fn request(fx: &Fixture, file_name: &str) -> SubmitEvidence {
    SubmitEvidence {
        incident_id: fx.incident.id,
        actor_id: fx.alice.id,
        file_name: file_name.into(),
        file_type: "log".into(),
    }
}

fn assert_staging_empty(fx: &Fixture) {
    let pending = fx.pipeline.staging().pending().expect("pending");
    assert!(pending.is_empty(), "leftover staging dirs: {pending:?}");
}

struct FailingAudit;

#[async_trait]
impl AuditLogger for FailingAudit {
    async fn record(
        &self,
        _actor_id: ActorId,
        _action: &str,
        _description: &str,
    ) -> Result<AuditLogEntry, AuditError> {
        Err(AuditError {
            reason: "audit volume full".into(),
        })
    }
}

struct BrokenReader;

impl Read for BrokenReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away"))
    }
}

#[tokio::test]
async fn submit_encrypts_uploads_registers_and_audits() {
    let fx = fixture().await;

    let submission = fx
        .pipeline
        .submit_evidence(request(&fx, "auth.log"), &b"test data"[..])
        .await
        .expect("submission should succeed");

    let evidence = &submission.evidence;
    assert_eq!(evidence.incident_id, fx.incident.id);
    assert_eq!(evidence.uploaded_by, fx.alice.id);
    assert_eq!(evidence.kind, "log");
    assert_eq!(
        evidence.storage_ref,
        format!("{}/{}/auth.log.enc", fx.incident.id, evidence.id)
    );

    let stored = fx
        .objects
        .download(&evidence.storage_ref)
        .await
        .expect("object present");
    assert!(stored.len() > 10);
    assert_eq!(stored.len() as u64, evidence.ciphertext_len);
    assert_eq!(decrypt_bytes(&fx.key, &stored).expect("decrypt"), b"test data");

    assert!(matches!(submission.audit, AuditStatus::Recorded { .. }));
    let audit = fx.cases.list_audit().await.expect("audit");
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, ACTION_UPLOAD);
    assert_eq!(audit[0].actor_id, fx.alice.id);

    assert_eq!(
        fx.cases.list_evidence(fx.incident.id).await.expect("list"),
        vec![evidence.clone()]
    );
    assert_staging_empty(&fx);
}

#[tokio::test]
async fn storage_failure_leaves_no_evidence_and_no_staged_files() {
    let fx = fixture().await;
    fx.objects.fail_uploads(true);

    let err = fx
        .pipeline
        .submit_evidence(request(&fx, "auth.log"), &b"test data"[..])
        .await
        .expect_err("upload should fail");

    assert!(matches!(
        err,
        PipelineError::Storage(StorageError::Transport { .. })
    ));
    assert_eq!(err.orphaned_object(), None);
    assert!(fx
        .cases
        .list_evidence(fx.incident.id)
        .await
        .expect("list")
        .is_empty());
    assert!(fx.objects.is_empty());
    assert_staging_empty(&fx);

    let audit = fx.cases.list_audit().await.expect("audit");
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, ACTION_UPLOAD_FAILED);
    assert!(audit[0].description.contains("storage"));
}

#[tokio::test]
async fn concurrent_submissions_of_same_file_do_not_collide() {
    let fx = fixture().await;

    let (first, second) = tokio::join!(
        fx.pipeline
            .submit_evidence(request(&fx, "capture.pcap"), &b"first capture"[..]),
        fx.pipeline
            .submit_evidence(request(&fx, "capture.pcap"), &b"second capture"[..]),
    );
    let first = first.expect("first submission");
    let second = second.expect("second submission");

    assert_ne!(first.evidence.storage_ref, second.evidence.storage_ref);
    assert_eq!(fx.objects.len(), 2);

    let first_plain = decrypt_bytes(
        &fx.key,
        &fx.objects
            .download(&first.evidence.storage_ref)
            .await
            .expect("first object"),
    )
    .expect("decrypt first");
    assert_eq!(first_plain, b"first capture");
    assert_eq!(
        fx.cases
            .list_evidence(fx.incident.id)
            .await
            .expect("list")
            .len(),
        2
    );
    assert_staging_empty(&fx);
}

#[tokio::test]
async fn unknown_incident_surfaces_orphaned_object() {
    let fx = fixture().await;
    let mut req = request(&fx, "notes.txt");
    req.incident_id = Uuid::new_v4();

    let err = fx
        .pipeline
        .submit_evidence(req, &b"orphan"[..])
        .await
        .expect_err("registration should fail");

    match &err {
        PipelineError::NotFound {
            entity,
            orphaned_object,
            ..
        } => {
            assert_eq!(*entity, "incident");
            assert_eq!(fx.objects.object_names(), vec![orphaned_object.clone()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.orphaned_object().is_some());
    assert_staging_empty(&fx);
}

#[tokio::test]
async fn audit_failure_degrades_but_keeps_evidence() {
    let fx = fixture_with_audit(Some(Arc::new(FailingAudit))).await;

    let submission = fx
        .pipeline
        .submit_evidence(request(&fx, "mem.raw"), &b"memory"[..])
        .await
        .expect("submission still succeeds");

    assert!(submission.is_degraded());
    assert_eq!(
        submission.audit,
        AuditStatus::Degraded {
            reason: "audit volume full".into()
        }
    );
    assert_eq!(
        fx.cases
            .evidence(submission.evidence.id)
            .await
            .expect("evidence committed"),
        submission.evidence
    );
    assert_staging_empty(&fx);
}

#[tokio::test]
async fn unreadable_upload_fails_in_staging() {
    let fx = fixture().await;

    let err = fx
        .pipeline
        .submit_evidence(request(&fx, "broken.bin"), BrokenReader)
        .await
        .expect_err("read should fail");

    assert!(matches!(err, PipelineError::Staging(_)));
    assert!(fx.objects.is_empty());
    assert_staging_empty(&fx);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_staging() {
    let fx = fixture().await;
    let mut req = request(&fx, "a.bin");
    req.file_type = "  ".into();

    let err = fx
        .pipeline
        .submit_evidence(req, &b"x"[..])
        .await
        .expect_err("blank type");
    assert!(matches!(err, PipelineError::InvalidRequest { .. }));
    assert!(fx.objects.is_empty());
    assert_staging_empty(&fx);
}

#[tokio::test]
async fn fetch_decrypts_and_audits_download() {
    let fx = fixture().await;
    let submission = fx
        .pipeline
        .submit_evidence(request(&fx, "report.pdf"), &b"%PDF-1.7 evidence"[..])
        .await
        .expect("submit");

    let mut out = Vec::new();
    let written = fx
        .pipeline
        .fetch_evidence(&submission.evidence, fx.alice.id, &mut out)
        .await
        .expect("fetch");
    assert_eq!(written, 17);
    assert_eq!(out, b"%PDF-1.7 evidence");

    let actions: Vec<String> = fx
        .cases
        .list_audit()
        .await
        .expect("audit")
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, vec![ACTION_UPLOAD, ACTION_DOWNLOAD]);
}

#[tokio::test]
async fn fetch_rejects_tampered_objects() {
    let fx = fixture().await;
    let submission = fx
        .pipeline
        .submit_evidence(request(&fx, "disk.img"), &b"sector data"[..])
        .await
        .expect("submit");

    let name = &submission.evidence.storage_ref;
    let mut stored = fx.objects.download(name).await.expect("download");
    let last = stored.len() - 1;
    stored[last] ^= 0xFF;
    fx.objects.delete(name).await.expect("delete");
    fx.objects.upload(name, stored).await.expect("reupload");

    let err = fx
        .pipeline
        .fetch_evidence(&submission.evidence, fx.alice.id, &mut Vec::new())
        .await
        .expect_err("tampered");
    assert!(matches!(
        err,
        PipelineError::Crypto(CryptoError::Authentication)
    ));
}

#[tokio::test]
async fn missing_key_fails_before_touching_disk() {
    let root = tempfile::tempdir().expect("tempdir");
    let staging_dir = root.path().join("staging");
    let cases = Arc::new(LocalCaseStore::in_memory());

    let result = EvidencePipeline::from_provider(
        PipelineConfig {
            staging_dir: Some(staging_dir.clone()),
            chunk_size: DEFAULT_CHUNK_SIZE,
        },
        &EnvKeyProvider::new("CUSTODY_PIPELINE_TEST_KEY_NEVER_SET"),
        Arc::new(InMemoryObjectStore::new()),
        cases.clone(),
        cases,
    )
    .await;

    assert!(matches!(result, Err(PipelineError::Configuration { .. })));
    assert!(!staging_dir.exists());
}

#[test]
fn invalid_chunk_size_is_a_configuration_error() {
    let cases = Arc::new(LocalCaseStore::in_memory());
    let result = EvidencePipeline::new(
        PipelineConfig {
            staging_dir: None,
            chunk_size: 0,
        },
        &SymmetricKey::generate(),
        Arc::new(InMemoryObjectStore::new()),
        cases.clone(),
        cases,
    );
    assert!(matches!(result, Err(PipelineError::Configuration { .. })));
}

#[tokio::test]
async fn padded_file_type_is_stored_trimmed_without_orphans() {
    let fx = fixture().await;
    let longest = "k".repeat(MAX_KIND_LEN);
    let mut req = request(&fx, "a.bin");
    req.file_type = format!("{longest} ");

    let submission = fx
        .pipeline
        .submit_evidence(req, &b"payload"[..])
        .await
        .expect("padded type within limit");
    assert_eq!(submission.evidence.kind, longest);
    assert_eq!(fx.objects.len(), 1);

    let mut req = request(&fx, "b.bin");
    req.file_type = format!("{longest}k");
    let err = fx
        .pipeline
        .submit_evidence(req, &b"payload"[..])
        .await
        .expect_err("type too long");
    assert!(matches!(err, PipelineError::InvalidRequest { .. }));
    assert_eq!(fx.objects.len(), 1);
}

#[tokio::test]
async fn successful_run_visits_every_stage() {
    let fx = fixture().await;
    let mut progress = Progress::new();

    fx.pipeline
        .run(&request(&fx, "ok.log"), &b"ok"[..], &mut progress)
        .await
        .expect("run");

    use PipelineStage::*;
    assert_eq!(
        progress.trail,
        vec![Received, Staged, Encrypted, Uploaded, Registered, Logged, Cleaned]
    );
}

#[tokio::test]
async fn failed_upload_moves_to_failed_then_cleaned() {
    let fx = fixture().await;
    fx.objects.fail_uploads(true);
    let mut progress = Progress::new();

    fx.pipeline
        .run(&request(&fx, "x.log"), &b"x"[..], &mut progress)
        .await
        .expect_err("upload refused");

    use PipelineStage::*;
    assert_eq!(
        progress.trail,
        vec![Received, Staged, Encrypted, Failed("storage"), Cleaned]
    );
    assert_staging_empty(&fx);
}

#[tokio::test]
async fn rejected_request_ends_in_failed() {
    let fx = fixture().await;
    let mut req = request(&fx, "x.log");
    req.file_name = " ".into();
    let mut progress = Progress::new();

    fx.pipeline
        .run(&req, &b"x"[..], &mut progress)
        .await
        .expect_err("blank name");

    assert_eq!(progress.current(), PipelineStage::Failed("invalid_request"));
}

#[test]
fn failed_stage_displays_its_kind() {
    assert_eq!(PipelineStage::Failed("crypto").to_string(), "failed(crypto)");
}
