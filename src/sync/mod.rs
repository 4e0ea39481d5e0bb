//! Reconciliation for self-orchestrated DAGs.
//!
//! DAGs whose engine config names an external scheduler are never driven by
//! the local engine. Instead this module periodically pulls completed remote
//! runs and materializes them as local result rows, reading each operator's
//! metadata blob (suffixed with the remote run id) to recover the execution
//! state the worker recorded.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dag::{DagValidationError, WorkflowDag};
use crate::db::{MetadataStore, StoreError};
use crate::models::{
    ArtifactResult, DagResult, EngineConfig, ExecError, ExecutionState, ExecutionStatus,
    FailureType, OperatorResult, OperatorResultMetadata,
};
use crate::storage::{paths, Storage, StorageError};

pub mod airflow;

pub use airflow::AirflowClient;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Validation(#[from] DagValidationError),
    #[error("remote scheduler error: {0}")]
    Remote(String),
}

/// State of one remote DAG run as reported by the external scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteRunState {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RemoteDagRun {
    pub run_id: String,
    pub state: RemoteRunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Read-side view of an external workflow scheduler.
#[async_trait]
pub trait RemoteScheduler: Send + Sync {
    /// Runs of the remote DAG started after `since`, any state.
    async fn dag_runs_since(
        &self,
        remote_dag_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteDagRun>, SyncError>;

    /// Terminal status of one task within a run.
    async fn task_status(
        &self,
        remote_dag_id: &str,
        run_id: &str,
        task_id: &str,
    ) -> Result<ExecutionStatus, SyncError>;
}

/// Remote DAG identifier under which a DAG was registered with the external
/// scheduler. Task ids are operator ids.
pub fn remote_dag_id(dag_id: Uuid) -> String {
    format!("aqueduct-{dag_id}")
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub runs_recorded: usize,
    pub runs_skipped: usize,
}

pub struct SyncService {
    store: Arc<dyn MetadataStore>,
}

impl SyncService {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Reconcile every externally-scheduled workflow in the org.
    pub async fn reconcile(
        &self,
        org_id: &str,
        scheduler: &dyn RemoteScheduler,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let dag_ids = self
            .store
            .latest_dag_ids_by_org(org_id, Some("airflow"))
            .await?;
        for dag_id in dag_ids {
            let full = self.store.get_full_dag(dag_id).await?;
            let dag = WorkflowDag::new(full.dag, full.operators, full.artifacts, full.edges)?;
            let storage = crate::storage::from_config(&dag.meta.storage_config);
            self.reconcile_dag(&dag, scheduler, storage.as_ref(), &mut report)
                .await?;
        }
        Ok(report)
    }

    async fn reconcile_dag(
        &self,
        dag: &WorkflowDag,
        scheduler: &dyn RemoteScheduler,
        storage: &dyn Storage,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let metadata_prefix = match &dag.meta.engine_config {
            EngineConfig::Airflow {
                operator_metadata_prefix,
                ..
            } => operator_metadata_prefix.clone(),
            other => {
                return Err(SyncError::Remote(format!(
                    "dag {} is not externally scheduled (engine {})",
                    dag.meta.id,
                    other.engine_type()
                )))
            }
        };

        // Runs already materialized are bounded by the newest local row.
        let last_sync = self
            .store
            .dag_results_by_workflow(dag.meta.workflow_id)
            .await?
            .first()
            .map(|result| result.created_at)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let remote_id = remote_dag_id(dag.meta.id);
        let runs = scheduler.dag_runs_since(&remote_id, last_sync).await?;

        for run in runs {
            if run.state == RemoteRunState::Running {
                report.runs_skipped += 1;
                continue;
            }
            self.record_run(dag, scheduler, storage, &remote_id, &metadata_prefix, &run)
                .await?;
            report.runs_recorded += 1;
        }
        Ok(())
    }

    /// Materialize one completed remote run as local rows, in a single
    /// transaction.
    async fn record_run(
        &self,
        dag: &WorkflowDag,
        scheduler: &dyn RemoteScheduler,
        storage: &dyn Storage,
        remote_id: &str,
        metadata_prefix: &str,
        run: &RemoteDagRun,
    ) -> Result<(), SyncError> {
        let dag_result_id = Uuid::new_v4();
        let mut dag_state = ExecutionState::pending();
        dag_state.timestamps.pending_at = Some(run.started_at);
        match run.state {
            RemoteRunState::Succeeded => dag_state.succeeded(),
            _ => dag_state.failed(
                FailureType::UserFatal,
                ExecError::new(
                    "the remote scheduler reported the run as failed",
                    "See the operator results for details.",
                ),
            ),
        }
        dag_state.timestamps.finished_at = run.finished_at;

        let mut operator_results = Vec::new();
        let mut artifact_results = Vec::new();

        for (op_id, operator) in &dag.operators {
            let task_status = scheduler
                .task_status(remote_id, &run.run_id, &op_id.to_string())
                .await?;
            let blob_path = operator_blob_path(metadata_prefix, *op_id, &run.run_id);
            let (exec_state, metadata) =
                resolve_operator_state(storage, &blob_path, operator, task_status).await;

            for artifact_id in dag.operator_outputs(*op_id) {
                artifact_results.push(ArtifactResult {
                    id: Uuid::new_v4(),
                    dag_result_id,
                    artifact_id: *artifact_id,
                    content_path: paths::with_remote_run_id(
                        &paths::artifact_content_path(*artifact_id),
                        &run.run_id,
                    ),
                    exec_state: exec_state.clone(),
                    metadata: metadata
                        .as_ref()
                        .and_then(|m| m.artifact_metadata.get(artifact_id).cloned())
                        .unwrap_or_default(),
                });
            }
            operator_results.push(OperatorResult {
                id: Uuid::new_v4(),
                dag_result_id,
                operator_id: *op_id,
                exec_state,
            });
        }

        self.store
            .record_synced_run(
                &DagResult {
                    id: dag_result_id,
                    dag_id: dag.meta.id,
                    exec_state: dag_state,
                    created_at: run.started_at,
                },
                &operator_results,
                &artifact_results,
            )
            .await?;
        info!(run = %run.run_id, dag = %dag.meta.id, "materialized remote run");
        Ok(())
    }
}

/// Metadata blob path for one operator within one remote run.
fn operator_blob_path(prefix: &str, operator_id: Uuid, run_id: &str) -> String {
    let base = paths::operator_metadata_path(operator_id);
    let prefixed = if prefix.is_empty() {
        base
    } else {
        format!("{}/{base}", prefix.trim_end_matches('/'))
    };
    paths::with_remote_run_id(&prefixed, run_id)
}

/// Combine the scheduler's task status with the worker's metadata blob. The
/// blob wins when present; a missing blob falls back to the task status; an
/// IO error is a system failure with the standard tip.
async fn resolve_operator_state(
    storage: &dyn Storage,
    blob_path: &str,
    operator: &crate::models::Operator,
    task_status: ExecutionStatus,
) -> (ExecutionState, Option<OperatorResultMetadata>) {
    match storage.get(blob_path).await {
        Ok(raw) => match serde_json::from_slice::<OperatorResultMetadata>(&raw) {
            Ok(metadata) => (metadata.exec_state.clone(), Some(metadata)),
            Err(err) => (
                ExecutionState::system_failure(format!(
                    "operator {} wrote an unreadable metadata blob: {err}",
                    operator.name
                )),
                None,
            ),
        },
        Err(StorageError::NotFound(_)) => {
            let mut state = ExecutionState::pending();
            match task_status {
                ExecutionStatus::Succeeded => state.succeeded(),
                ExecutionStatus::Canceled => state.canceled(),
                _ => state.failed(
                    FailureType::UserFatal,
                    ExecError::new(
                        format!("task for operator {} did not succeed", operator.name),
                        "See the remote scheduler's logs for details.",
                    ),
                ),
            }
            (state, None)
        }
        Err(err) => {
            warn!(path = %blob_path, error = %err, "failed to read operator blob during sync");
            (
                ExecutionState::system_failure(format!(
                    "failed to read metadata for operator {}: {err}",
                    operator.name
                )),
                None,
            )
        }
    }
}
