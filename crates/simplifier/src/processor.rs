//! Simplification orchestrator
//!
//! One request runs through `Staging → Running → Reconciling → Done | Failed`,
//! spawning exactly one simplifier run. There is no retry, queueing or
//! concurrency limit; independent requests run fully in parallel.

use crate::runner::Simplifier;
use crate::staging::{StagedInput, Stager};
use lexplain_common::errors::{AppError, Result};
use lexplain_common::metrics;
use lexplain_common::models::{StatusPatch, StoreIds};
use lexplain_common::store::{DocumentStores, LocalMetadataStore};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Body of a simplify call
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimplifyRequest {
    /// Server-local file to simplify
    #[serde(default)]
    pub file_path: Option<String>,

    /// Raw text to simplify, used when no file path is given
    #[serde(default)]
    pub text: Option<String>,

    /// Store records to mark processed on success
    #[serde(flatten)]
    pub ids: StoreIds,

    /// Record in the local metadata file to mark processed on success
    #[serde(default)]
    pub local_id: Option<String>,
}

/// What the simplifier will read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimplifyInput<'a> {
    Path(&'a str),
    Text(&'a str),
}

impl SimplifyRequest {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Resolve the input. Empty strings count as absent; a path wins over text.
    pub fn input(&self) -> Result<SimplifyInput<'_>> {
        let path = self.file_path.as_deref().filter(|p| !p.is_empty());
        let text = self.text.as_deref().filter(|t| !t.is_empty());

        match (path, text) {
            (Some(path), _) => Ok(SimplifyInput::Path(path)),
            (None, Some(text)) => Ok(SimplifyInput::Text(text)),
            (None, None) => Err(AppError::missing_input("Provide filePath or text")),
        }
    }
}

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Staging,
    Running,
    Reconciling,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Staging => "staging",
            Phase::Running => "running",
            Phase::Reconciling => "reconciling",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    /// Phases only move forward; any live phase may fail
    pub fn can_advance_to(&self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Staging, Phase::Running)
                | (Phase::Running, Phase::Reconciling)
                | (Phase::Reconciling, Phase::Done)
                | (Phase::Staging | Phase::Running | Phase::Reconciling, Phase::Failed)
        )
    }
}

/// Phase bookkeeping for one request
#[derive(Debug)]
struct RunState {
    phase: Phase,
}

impl RunState {
    fn new() -> Self {
        debug!(phase = Phase::Staging.as_str(), "Simplification started");
        Self {
            phase: Phase::Staging,
        }
    }

    fn advance(&mut self, next: Phase) {
        if !self.phase.can_advance_to(next) {
            error!(from = self.phase.as_str(), to = next.as_str(), "Illegal phase transition");
            debug_assert!(false, "illegal phase transition {:?} -> {:?}", self.phase, next);
            return;
        }
        debug!(from = self.phase.as_str(), to = next.as_str(), "Phase transition");
        self.phase = next;
    }

    fn fail(&mut self, err: AppError) -> AppError {
        self.advance(Phase::Failed);
        err
    }
}

/// Drives simplification requests and reconciles their results
#[derive(Clone)]
pub struct SimplificationService {
    simplifier: Arc<dyn Simplifier>,
    stager: Stager,
    stores: DocumentStores,
    local: Option<Arc<LocalMetadataStore>>,
}

impl SimplificationService {
    pub fn new(
        simplifier: Arc<dyn Simplifier>,
        stager: Stager,
        stores: DocumentStores,
        local: Option<Arc<LocalMetadataStore>>,
    ) -> Self {
        Self {
            simplifier,
            stager,
            stores,
            local,
        }
    }

    /// Run one simplification; returns the simplifier's stdout verbatim
    #[instrument(skip_all, fields(dual = request.ids.is_dual(), local_id = ?request.local_id))]
    pub async fn simplify(&self, request: &SimplifyRequest) -> Result<String> {
        let started = Instant::now();
        let result = self.execute(request).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => outcome_label(e),
        };
        metrics::record_simplification(started.elapsed().as_secs_f64(), outcome);

        match &result {
            Ok(output) => info!(bytes = output.len(), "Simplification complete"),
            Err(e) => warn!(outcome, error = ?e, "Simplification did not complete"),
        }
        result
    }

    async fn execute(&self, request: &SimplifyRequest) -> Result<String> {
        let input = request.input()?;
        let mut run = RunState::new();

        // Readiness first so a missing script never leaves a temp file behind
        if let Err(e) = self.simplifier.prepare().await {
            return Err(run.fail(e.into()));
        }

        let staged = match self.stage(input).await {
            Ok(staged) => staged,
            Err(e) => return Err(run.fail(e)),
        };

        run.advance(Phase::Running);
        let result = self.simplifier.run(staged.path()).await;
        staged.cleanup();

        let output = match result {
            Ok(output) => output,
            Err(e) => return Err(run.fail(e.into())),
        };

        run.advance(Phase::Reconciling);
        if !output.success() {
            return Err(run.fail(AppError::ProcessFailed {
                exit_code: output.exit_code,
                detail: output.diagnostic().to_string(),
            }));
        }

        if let Err(e) = self.reconcile(&request.ids, request.local_id.as_deref(), &output.stdout).await {
            return Err(run.fail(e));
        }

        run.advance(Phase::Done);
        Ok(output.stdout)
    }

    async fn stage(&self, input: SimplifyInput<'_>) -> Result<StagedInput> {
        let staged = match input {
            SimplifyInput::Path(path) => self.stager.stage_path(path)?,
            SimplifyInput::Text(text) => self.stager.stage_text(text).await?,
        };
        Ok(staged)
    }

    /// Mark the referenced records processed
    async fn reconcile(&self, ids: &StoreIds, local_id: Option<&str>, text: &str) -> Result<()> {
        let patch = StatusPatch::processed(text);
        self.stores.update_status(ids, &patch).await?;

        let (Some(local_id), Some(local)) = (local_id, self.local.as_ref()) else {
            return Ok(());
        };
        if self.stores.is_available() {
            debug!(local_id, "Stores configured; ignoring local id");
            return Ok(());
        }

        match local.update(local_id, &patch).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::StatusUpdate {
                message: format!("no local record {}", local_id),
            }),
            Err(e) => Err(AppError::StatusUpdate {
                message: format!("local: {:?}", e),
            }),
        }
    }
}

fn outcome_label(err: &AppError) -> &'static str {
    match err {
        AppError::MissingInput { .. } => "invalid_input",
        AppError::ScriptNotFound { .. } => "script_not_found",
        AppError::SpawnFailed { .. } => "spawn_failed",
        AppError::ProcessFailed { .. } => "process_failed",
        AppError::StatusUpdate { .. } => "status_update_failed",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SimplifyError;
    use crate::process::ProcessSimplifier;
    use crate::runner::SimplifierOutput;
    use async_trait::async_trait;
    use lexplain_common::models::{DocumentRecord, DocumentStatus};
    use lexplain_common::store::{DocumentStore, MemoryStore};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const ECHO: &str = "read p\ncat \"$p\"\n";
    const FAIL: &str = "read p\nprintf 'bad input' >&2\nexit 2\n";

    struct Fixture {
        dir: TempDir,
        primary: Arc<MemoryStore>,
        secondary: Arc<MemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                primary: Arc::new(MemoryStore::new("primary")),
                secondary: Arc::new(MemoryStore::new("secondary")),
            }
        }

        fn scratch(&self) -> PathBuf {
            self.dir.path().join("scratch")
        }

        fn script(&self, body: &str) -> PathBuf {
            let path = self.dir.path().join("simplify.sh");
            std::fs::write(&path, body).unwrap();
            path
        }

        fn dual_stores(&self) -> DocumentStores {
            DocumentStores::new(
                Some(self.primary.clone() as Arc<dyn DocumentStore>),
                Some(self.secondary.clone() as Arc<dyn DocumentStore>),
            )
        }

        fn service(&self, script: &Path, stores: DocumentStores) -> SimplificationService {
            SimplificationService::new(
                Arc::new(ProcessSimplifier::new("sh", script)),
                Stager::new(self.scratch()),
                stores,
                None,
            )
        }

        fn scratch_entries(&self) -> usize {
            std::fs::read_dir(self.scratch()).map(|d| d.count()).unwrap_or(0)
        }
    }

    fn record() -> DocumentRecord {
        DocumentRecord::uploaded("1-a.txt", "a.txt", "text/plain", 5, "uploads/1-a.txt")
    }

    #[test]
    fn test_request_input_rules() {
        assert!(SimplifyRequest::default().input().is_err());

        let empty = SimplifyRequest {
            file_path: Some(String::new()),
            text: Some(String::new()),
            ..SimplifyRequest::default()
        };
        assert!(matches!(empty.input(), Err(AppError::MissingInput { .. })));

        let both = SimplifyRequest {
            file_path: Some("a.txt".into()),
            text: Some("hello".into()),
            ..SimplifyRequest::default()
        };
        assert_eq!(both.input().unwrap(), SimplifyInput::Path("a.txt"));
        assert_eq!(
            SimplifyRequest::from_text("hi").input().unwrap(),
            SimplifyInput::Text("hi")
        );
    }

    #[test]
    fn test_request_wire_names() {
        let request: SimplifyRequest = serde_json::from_value(serde_json::json!({
            "text": "Hello",
            "firebaseId": "fs-1",
            "secondaryId": "sql-1",
            "localId": "local-1"
        }))
        .unwrap();
        assert_eq!(request.ids.primary_id.as_deref(), Some("fs-1"));
        assert_eq!(request.ids.secondary_id.as_deref(), Some("sql-1"));
        assert_eq!(request.local_id.as_deref(), Some("local-1"));
    }

    #[test]
    fn test_phase_transitions() {
        assert!(Phase::Staging.can_advance_to(Phase::Running));
        assert!(Phase::Running.can_advance_to(Phase::Reconciling));
        assert!(Phase::Reconciling.can_advance_to(Phase::Done));
        assert!(Phase::Staging.can_advance_to(Phase::Failed));
        assert!(!Phase::Staging.can_advance_to(Phase::Reconciling));
        assert!(!Phase::Running.can_advance_to(Phase::Staging));
        assert!(!Phase::Done.can_advance_to(Phase::Failed));
        assert!(!Phase::Failed.can_advance_to(Phase::Done));
        assert!(Phase::Done.is_terminal() && Phase::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_text_is_echoed_and_temp_file_removed() {
        let fx = Fixture::new();
        let service = fx.service(&fx.script(ECHO), DocumentStores::none());

        let output = service.simplify(&SimplifyRequest::from_text("Hello")).await.unwrap();
        assert_eq!(output, "Hello");
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn test_output_is_byte_exact() {
        let fx = Fixture::new();
        let service = fx.service(&fx.script(ECHO), DocumentStores::none());
        let input = fx.dir.path().join("doc.txt");
        std::fs::write(&input, "line one\n\tline two  \n\n").unwrap();

        let output = service
            .simplify(&SimplifyRequest::from_path(input.display().to_string()))
            .await
            .unwrap();
        assert_eq!(output, "line one\n\tline two  \n\n");
        assert!(input.exists());
    }

    #[tokio::test]
    async fn test_cancelled_request_leaves_no_temp_file() {
        let fx = Fixture::new();
        let service = fx.service(&fx.script("read p\nsleep 5\ncat \"$p\"\n"), DocumentStores::none());

        let request = SimplifyRequest::from_text("Hello");
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            service.simplify(&request),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn test_missing_script_spawns_nothing() {
        let fx = Fixture::new();
        let service = fx.service(&fx.dir.path().join("absent.sh"), fx.dual_stores());

        let err = service.simplify(&SimplifyRequest::from_text("Hello")).await.unwrap_err();
        assert!(matches!(err, AppError::ScriptNotFound { .. }));
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn test_process_failure_reports_stderr_and_skips_stores() {
        let fx = Fixture::new();
        let stores = fx.dual_stores();
        let ids = stores.create(&record()).await.unwrap();
        let service = fx.service(&fx.script(FAIL), stores);

        let request = SimplifyRequest {
            text: Some("Hello".into()),
            ids,
            ..SimplifyRequest::default()
        };
        let err = service.simplify(&request).await.unwrap_err();

        match &err {
            AppError::ProcessFailed { exit_code, detail } => {
                assert_eq!(*exit_code, Some(2));
                assert_eq!(detail, "bad input");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.client_detail(), Some("bad input"));
        assert_eq!(fx.primary.update_count(), 0);
        assert_eq!(fx.secondary.update_count(), 0);
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_stdout() {
        let fx = Fixture::new();
        let service = fx.service(&fx.script("read p\necho 'only stdout'\nexit 1\n"), DocumentStores::none());

        let err = service.simplify(&SimplifyRequest::from_text("x")).await.unwrap_err();
        assert_eq!(err.client_detail(), Some("only stdout\n"));
    }

    #[tokio::test]
    async fn test_only_supplied_ids_are_reconciled() {
        let fx = Fixture::new();
        let stores = fx.dual_stores();
        let ids = stores.create(&record()).await.unwrap();
        let service = fx.service(&fx.script(ECHO), stores);

        let request = SimplifyRequest {
            text: Some("Plain words".into()),
            ids: StoreIds {
                primary_id: ids.primary_id.clone(),
                secondary_id: None,
            },
            ..SimplifyRequest::default()
        };
        service.simplify(&request).await.unwrap();

        let primary = fx.primary.get(ids.primary_id.as_deref().unwrap()).unwrap();
        assert_eq!(primary.status, DocumentStatus::Processed);
        assert_eq!(primary.simplified_text.as_deref(), Some("Plain words"));
        assert!(primary.processed_at.is_some());

        let secondary = fx.secondary.get(ids.secondary_id.as_deref().unwrap()).unwrap();
        assert_eq!(secondary.status, DocumentStatus::Uploaded);
        assert_eq!(fx.secondary.update_count(), 0);
    }

    #[tokio::test]
    async fn test_processed_document_is_not_reconciled_twice() {
        let fx = Fixture::new();
        let stores = fx.dual_stores();
        let ids = stores.create(&record()).await.unwrap();
        let service = fx.service(&fx.script(ECHO), stores);

        let first = SimplifyRequest {
            text: Some("first".into()),
            ids: ids.clone(),
            ..SimplifyRequest::default()
        };
        service.simplify(&first).await.unwrap();

        let second = SimplifyRequest {
            text: Some("second".into()),
            ids: ids.clone(),
            ..SimplifyRequest::default()
        };
        let err = service.simplify(&second).await.unwrap_err();
        assert!(matches!(err, AppError::StatusUpdate { .. }));

        let primary = fx.primary.get(ids.primary_id.as_deref().unwrap()).unwrap();
        assert_eq!(primary.simplified_text.as_deref(), Some("first"));
        assert_eq!(fx.primary.update_count(), 1);
    }

    #[tokio::test]
    async fn test_reconciliation_failure_is_distinct() {
        let fx = Fixture::new();
        let stores = fx.dual_stores();
        let ids = stores.create(&record()).await.unwrap();
        fx.primary.fail_writes(true);
        let service = fx.service(&fx.script(ECHO), stores);

        let request = SimplifyRequest {
            text: Some("Hello".into()),
            ids,
            ..SimplifyRequest::default()
        };
        let err = service.simplify(&request).await.unwrap_err();
        assert!(matches!(err, AppError::StatusUpdate { .. }));
        assert_eq!(err.to_string(), "Failed to update document status");
    }

    #[tokio::test]
    async fn test_local_record_reconciled_without_stores() {
        let fx = Fixture::new();
        let local = Arc::new(LocalMetadataStore::new(fx.dir.path().join("metadata.json")));
        let stored = local.append(record()).await.unwrap();

        let service = SimplificationService::new(
            Arc::new(ProcessSimplifier::new("sh", fx.script(ECHO))),
            Stager::new(fx.scratch()),
            DocumentStores::none(),
            Some(local.clone()),
        );

        let request = SimplifyRequest {
            text: Some("Done".into()),
            local_id: stored.id.clone(),
            ..SimplifyRequest::default()
        };
        service.simplify(&request).await.unwrap();

        let records = local.list().await;
        assert_eq!(records[0].status, DocumentStatus::Processed);
        assert_eq!(records[0].simplified_text.as_deref(), Some("Done"));

        let again = SimplifyRequest {
            text: Some("Redone".into()),
            local_id: stored.id.clone(),
            ..SimplifyRequest::default()
        };
        let err = service.simplify(&again).await.unwrap_err();
        assert!(matches!(err, AppError::StatusUpdate { .. }));
        assert_eq!(local.list().await[0].simplified_text.as_deref(), Some("Done"));

        let unknown = SimplifyRequest {
            text: Some("Done".into()),
            local_id: Some("local-0-0".into()),
            ..SimplifyRequest::default()
        };
        let err = service.simplify(&unknown).await.unwrap_err();
        assert!(matches!(err, AppError::StatusUpdate { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure_cleans_up() {
        let fx = Fixture::new();
        let service = SimplificationService::new(
            Arc::new(ProcessSimplifier::new("/nonexistent/interpreter", fx.script(ECHO))),
            Stager::new(fx.scratch()),
            DocumentStores::none(),
            None,
        );

        let err = service.simplify(&SimplifyRequest::from_text("Hello")).await.unwrap_err();
        assert!(matches!(err, AppError::SpawnFailed { .. }));
        assert_eq!(fx.scratch_entries(), 0);
    }

    /// In-process simplifier: the orchestrator does not care what runs behind the port
    struct Uppercase;

    #[async_trait]
    impl Simplifier for Uppercase {
        async fn prepare(&self) -> std::result::Result<(), SimplifyError> {
            Ok(())
        }

        async fn run(&self, input: &Path) -> std::result::Result<SimplifierOutput, SimplifyError> {
            let text = tokio::fs::read_to_string(input).await?;
            Ok(SimplifierOutput {
                exit_code: Some(0),
                stdout: text.to_uppercase(),
                stderr: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_in_process_simplifier() {
        let fx = Fixture::new();
        let service = SimplificationService::new(
            Arc::new(Uppercase),
            Stager::new(fx.scratch()),
            DocumentStores::none(),
            None,
        );

        let output = service.simplify(&SimplifyRequest::from_text("whereas")).await.unwrap();
        assert_eq!(output, "WHEREAS");
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_isolated() {
        let fx = Fixture::new();
        let service = fx.service(&fx.script(ECHO), DocumentStores::none());

        let runs = (0..8).map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let text = format!("document {}", i);
                let output = service.simplify(&SimplifyRequest::from_text(text.clone())).await.unwrap();
                assert_eq!(output, text);
            })
        });
        for run in runs.collect::<Vec<_>>() {
            run.await.unwrap();
        }
        assert_eq!(fx.scratch_entries(), 0);
    }
}
