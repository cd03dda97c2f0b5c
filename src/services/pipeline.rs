//! Sequences quota check, archiving, upload and cleanup for one run.
//!
//! Both entry points ([`Pipeline::run`] and [`Pipeline::get_file`]) end in the
//! same finalizer, which removes whatever staging namespace the run claimed,
//! whether the run succeeded or not. Two runs sharing a namespace at the same
//! time race on the archive; callers must not overlap them.

use chrono::Utc;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::models::{
    ARCHIVE_NAME, ArchiveSummary, InputBatch, InputFile, RunReport, UploadReceipt,
};
use crate::services::archive::ArchiveBuilder;
use crate::services::quota::check_quota;
use crate::services::staging::StagingStore;
use crate::services::status::StatusReporter;
use crate::services::upload::Uploader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    QuotaChecking,
    Archiving,
    Persisted,
    Uploading,
    Failed,
    CleaningUp,
}

/// Staging namespace the current run is responsible for removing.
#[derive(Debug, Default)]
struct RunScope {
    claimed: Option<String>,
}

impl RunScope {
    fn claim(&mut self, namespace: &str) {
        self.claimed = Some(namespace.to_string());
    }
}

type StageOutcome = Result<(Option<ArchiveSummary>, UploadReceipt), PipelineError>;

pub struct Pipeline {
    store: Arc<dyn StagingStore>,
    archiver: ArchiveBuilder,
    uploader: Uploader,
    namespace: String,
    status: StatusReporter,
    state: watch::Sender<PipelineState>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn StagingStore>, uploader: Uploader, config: &PipelineConfig) -> Self {
        let status = StatusReporter::new(config.status_capacity);
        let archiver = ArchiveBuilder::new(store.clone(), status.clone(), config.entry_spool_bytes);
        let (state, _rx) = watch::channel(PipelineState::Idle);

        Self {
            store,
            archiver,
            uploader,
            namespace: config.namespace.clone(),
            status,
            state,
        }
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Archives `files` into the staging area and uploads the result.
    pub async fn run(&self, files: Vec<InputFile>) -> Result<RunReport, PipelineError> {
        let batch = match InputBatch::new(files) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!("Nothing to do: {}", e);
                return Err(e);
            }
        };

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline_run", run_id = %run_id, files = batch.len());

        async move {
            let started_at = Utc::now();
            let mut scope = RunScope::default();
            let outcome = self.archive_and_upload(&batch, &mut scope).await;
            self.finish(scope, outcome)
                .await
                .map(|(archive, upload)| RunReport {
                    run_id,
                    archive,
                    upload,
                    started_at,
                    finished_at: Utc::now(),
                })
        }
        .instrument(span)
        .await
    }

    /// Uploads an archive left in the staging namespace by an earlier run.
    pub async fn get_file(&self) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline_retrieve", run_id = %run_id);

        async move {
            let started_at = Utc::now();
            let mut scope = RunScope::default();
            scope.claim(&self.namespace);

            let outcome = self.upload_persisted().await.map(|receipt| (None, receipt));
            self.finish(scope, outcome)
                .await
                .map(|(archive, upload)| RunReport {
                    run_id,
                    archive,
                    upload,
                    started_at,
                    finished_at: Utc::now(),
                })
        }
        .instrument(span)
        .await
    }

    async fn archive_and_upload(&self, batch: &InputBatch, scope: &mut RunScope) -> StageOutcome {
        self.transition(PipelineState::QuotaChecking);
        let estimate = self
            .store
            .estimate()
            .await
            .map_err(|e| PipelineError::storage("estimate staging quota", e))?;
        check_quota(batch, estimate, &self.status)?;

        self.transition(PipelineState::Archiving);
        scope.claim(&self.namespace);
        let (_, summary) = self.archiver.build(&self.namespace, batch).await?;

        let receipt = self.upload_persisted().await?;
        Ok((Some(summary), receipt))
    }

    /// Re-reads the finished archive from staging and sends it.
    async fn upload_persisted(&self) -> Result<UploadReceipt, PipelineError> {
        let ns = self
            .store
            .open_namespace(&self.namespace, false)
            .await
            .map_err(|e| self.not_found_or(e, "open staging namespace"))?;
        let file = self
            .store
            .get_or_create_file(&ns, ARCHIVE_NAME, false)
            .await
            .map_err(|e| self.not_found_or(e, "open staged archive"))?;
        self.transition(PipelineState::Persisted);

        let archive = self
            .store
            .read_file(&file)
            .await
            .map_err(|e| PipelineError::storage("read staged archive", e))?;

        self.transition(PipelineState::Uploading);
        self.status.report("Archive upload started");
        let receipt = self
            .uploader
            .upload(ARCHIVE_NAME, archive, &self.status)
            .await?;
        self.status.report("Archive upload finished");

        Ok(receipt)
    }

    fn not_found_or(&self, e: io::Error, context: &'static str) -> PipelineError {
        if e.kind() == io::ErrorKind::NotFound {
            PipelineError::NamespaceNotFound(self.namespace.clone())
        } else {
            PipelineError::storage(context, e)
        }
    }

    /// Runs on every exit path: reports a failure, removes the claimed
    /// namespace and returns to `Idle`. Cleanup problems are logged and never
    /// replace the run's own outcome.
    async fn finish<T>(
        &self,
        scope: RunScope,
        outcome: Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        if let Err(e) = &outcome {
            self.transition(PipelineState::Failed);
            tracing::error!("❌ Run failed: {}", e);
            self.status.report(format!("Error: {}", e));
        }

        self.transition(PipelineState::CleaningUp);
        if let Some(namespace) = scope.claimed {
            match self.store.remove_recursive(&namespace).await {
                Ok(()) => tracing::info!("🧹 Staging namespace '{}' cleared", namespace),
                Err(e) => tracing::warn!(
                    "Failed to remove staging namespace '{}': {}",
                    namespace,
                    e
                ),
            }
        }

        self.transition(PipelineState::Idle);
        outcome
    }

    fn transition(&self, next: PipelineState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "pipeline state changed");
        }
    }
}
