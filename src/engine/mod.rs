//! The execution engine: drives every operator of a DAG to a terminal state
//! within a time budget.
//!
//! The run loop is single-threaded and cooperative; concurrency against
//! external systems comes from the job managers, which the loop never blocks
//! on. Failure propagation follows the failure taxonomy: System and
//! UserFatal failures stop the DAG, UserNonFatal failures let it continue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dag::{DagValidationError, WorkflowDag};
use crate::db::{MetadataStore, StoreError};
use crate::job::{JobError, JobManager};
use crate::models::{
    DagResult, ExecutionState, ExecutionStatus, FailureType, Notification,
    NotificationAssociation, NotificationLevel, NotificationStatus, Workflow,
};
use crate::storage::{Storage, StorageError};

pub mod operator;
pub mod preview;

use operator::OperatorExecution;
pub use preview::{PreviewArtifact, PreviewCache};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] DagValidationError),
    #[error("no initial operators to schedule")]
    NoStartingOperators,
    #[error("failed to launch operator {operator}: {source}")]
    Launch {
        operator: String,
        source: JobError,
    },
    #[error("operator {operator} failed with a {failure_type:?} failure")]
    OperatorFailed {
        operator: String,
        failure_type: FailureType,
    },
    #[error("execution exceeded its time budget")]
    Timeout,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("internal engine error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// No DAG-result row; artifact contents come back inline and blobs are
    /// swept afterwards.
    Preview,
    /// Durable run: result rows, notification, retention sweep.
    Publish,
}

#[derive(Debug, Clone)]
pub struct EngineTimeouts {
    /// Wall-clock budget for the whole run.
    pub exec_timeout: Duration,
    /// How long cleanup waits for outstanding operators after a stop.
    pub cleanup_timeout: Duration,
    /// Sleep between poll rounds.
    pub poll_interval: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            exec_timeout: Duration::from_secs(8 * 60 * 60),
            cleanup_timeout: Duration::from_secs(2 * 60),
            poll_interval: Duration::from_millis(300),
        }
    }
}

/// What a run produced. Operator states are always populated; preview
/// artifacts only in preview mode; the DAG-result id only in publish mode.
#[derive(Debug)]
pub struct RunOutcome {
    pub dag_result_id: Option<Uuid>,
    pub status: ExecutionStatus,
    pub failure_type: Option<FailureType>,
    pub operator_states: HashMap<Uuid, ExecutionState>,
    pub preview_artifacts: HashMap<Uuid, PreviewArtifact>,
}

pub struct Engine {
    store: Arc<dyn MetadataStore>,
    preview_cache: Arc<PreviewCache>,
    timeouts: EngineTimeouts,
}

impl Engine {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        preview_cache: Arc<PreviewCache>,
        timeouts: EngineTimeouts,
    ) -> Self {
        Self {
            store,
            preview_cache,
            timeouts,
        }
    }

    /// Run with backends derived from the DAG's own storage and engine
    /// configs.
    pub async fn run(
        &self,
        dag: &WorkflowDag,
        mode: ExecutionMode,
    ) -> Result<RunOutcome, EngineError> {
        let storage = crate::storage::from_config(&dag.meta.storage_config);
        let manager = crate::job::from_engine_config(&dag.meta.engine_config)
            .map_err(|err| EngineError::Internal(err.to_string()))?;
        self.run_with(dag, mode, storage, manager).await
    }

    /// Run with explicit backends. The entry point for tests and for callers
    /// that already hold a storage/manager pair.
    pub async fn run_with(
        &self,
        dag: &WorkflowDag,
        mode: ExecutionMode,
        storage: Arc<dyn Storage>,
        manager: Arc<dyn JobManager>,
    ) -> Result<RunOutcome, EngineError> {
        if dag.meta.engine_config.is_self_orchestrated() {
            return Err(EngineError::Internal(
                "self-orchestrated DAGs are reconciled, not executed".to_string(),
            ));
        }

        let mut executions =
            operator::build_executions(dag, mode, self.store.as_ref(), manager).await?;

        let (workflow, dag_result_id) = match mode {
            ExecutionMode::Publish => {
                let workflow = self.store.get_workflow(dag.meta.workflow_id).await?;
                let dag_result_id = Uuid::new_v4();
                self.store
                    .create_dag_result(&DagResult {
                        id: dag_result_id,
                        dag_id: dag.meta.id,
                        exec_state: ExecutionState::pending(),
                        created_at: chrono::Utc::now(),
                    })
                    .await?;
                for exec in executions.values_mut() {
                    exec.initialize_result(self.store.as_ref(), dag_result_id)
                        .await?;
                }
                (Some(workflow), Some(dag_result_id))
            }
            ExecutionMode::Preview => (None, None),
        };

        let mut preview_artifacts = HashMap::new();
        let run_result = self
            .run_loop(
                dag,
                mode,
                storage.as_ref(),
                &mut executions,
                dag_result_id,
                &mut preview_artifacts,
            )
            .await;

        if run_result.is_err() {
            self.drain_and_cancel(mode, storage.as_ref(), &mut executions, dag_result_id)
                .await;
        }

        let (status, failure_type) = final_dag_state(&executions, &run_result);

        if let (Some(dag_result_id), Some(workflow)) = (dag_result_id, workflow.as_ref()) {
            self.finalize_publish(dag, workflow, dag_result_id, status, failure_type, &storage)
                .await;
        }

        for exec in executions.values() {
            exec.finish(storage.as_ref(), mode).await;
        }

        run_result?;

        Ok(RunOutcome {
            dag_result_id,
            status,
            failure_type,
            operator_states: executions
                .iter()
                .map(|(id, exec)| (*id, exec.exec_state.clone()))
                .collect(),
            preview_artifacts,
        })
    }

    async fn run_loop(
        &self,
        dag: &WorkflowDag,
        mode: ExecutionMode,
        storage: &dyn Storage,
        executions: &mut HashMap<Uuid, OperatorExecution>,
        dag_result_id: Option<Uuid>,
        preview_artifacts: &mut HashMap<Uuid, PreviewArtifact>,
    ) -> Result<(), EngineError> {
        let mut remaining: HashMap<Uuid, usize> = dag
            .operators
            .keys()
            .map(|id| (*id, dag.operator_inputs(*id).len()))
            .collect();
        let mut in_progress: HashSet<Uuid> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        if in_progress.is_empty() {
            return Err(EngineError::NoStartingOperators);
        }
        let mut completed: HashSet<Uuid> = HashSet::new();

        // Gates held while an operator computes a cacheable preview result.
        let mut held_gates: HashMap<
            Uuid,
            Vec<(Uuid, tokio::sync::OwnedMutexGuard<Option<PreviewArtifact>>)>,
        > = HashMap::new();

        let deadline = Instant::now() + self.timeouts.exec_timeout;

        while !in_progress.is_empty() {
            if Instant::now() >= deadline {
                return Err(EngineError::Timeout);
            }

            let round: Vec<Uuid> = in_progress.iter().copied().collect();
            for op_id in round {
                let exec = executions
                    .get_mut(&op_id)
                    .ok_or_else(|| EngineError::Internal(format!("unknown operator {op_id}")))?;
                let state = exec.poll(storage).await?;

                match state.status {
                    ExecutionStatus::Registered | ExecutionStatus::Pending => {
                        if mode == ExecutionMode::Preview
                            && self
                                .try_serve_cached(
                                    dag,
                                    exec,
                                    storage,
                                    preview_artifacts,
                                    &mut held_gates,
                                )
                                .await?
                        {
                            continue;
                        }
                        if let Err(err) = exec.launch().await {
                            // The execution is already terminal Failed/System;
                            // its row must reflect that before the run stops.
                            if let Some(dag_result_id) = dag_result_id {
                                exec.persist_result(self.store.as_ref(), dag_result_id)
                                    .await;
                            }
                            return Err(err);
                        }
                    }
                    ExecutionStatus::Running => {}
                    _ => {
                        debug_assert!(state.is_terminal() || state.status == ExecutionStatus::Unknown);
                        if let Some(dag_result_id) = dag_result_id {
                            exec.persist_result(self.store.as_ref(), dag_result_id).await;
                        }

                        if state.blocks_execution() {
                            let name = exec.operator.name.clone();
                            let failure_type =
                                state.failure_type.unwrap_or(FailureType::System);
                            self.cancel_unstarted(
                                executions,
                                &completed,
                                &in_progress,
                                dag_result_id,
                            )
                            .await;
                            metrics::counter!("aqueduct_operator_failures_total").increment(1);
                            return Err(EngineError::OperatorFailed {
                                operator: name,
                                failure_type,
                            });
                        }

                        let cached = executions
                            .get(&op_id)
                            .is_some_and(|exec| exec.is_cached());
                        if mode == ExecutionMode::Preview
                            && state.status == ExecutionStatus::Succeeded
                            && !cached
                        {
                            self.collect_preview_outputs(
                                dag,
                                executions
                                    .get(&op_id)
                                    .ok_or_else(|| {
                                        EngineError::Internal(format!(
                                            "unknown operator {op_id}"
                                        ))
                                    })?,
                                storage,
                                preview_artifacts,
                                held_gates.remove(&op_id),
                            )
                            .await?;
                        } else {
                            held_gates.remove(&op_id);
                        }

                        in_progress.remove(&op_id);
                        if !completed.insert(op_id) {
                            return Err(EngineError::Internal(format!(
                                "operator {op_id} completed twice"
                            )));
                        }
                        for artifact_id in dag.operator_outputs(op_id) {
                            for consumer in dag.artifact_consumers(*artifact_id) {
                                let counter = remaining.get_mut(consumer).ok_or_else(|| {
                                    EngineError::Internal(format!(
                                        "unknown downstream operator {consumer}"
                                    ))
                                })?;
                                *counter = counter.checked_sub(1).ok_or_else(|| {
                                    EngineError::Internal(format!(
                                        "dependency counter for {consumer} went negative"
                                    ))
                                })?;
                                if *counter == 0 {
                                    if completed.contains(consumer) {
                                        return Err(EngineError::Internal(format!(
                                            "operator {consumer} became ready after completing"
                                        )));
                                    }
                                    in_progress.insert(*consumer);
                                }
                            }
                        }
                    }
                }
            }

            tokio::time::sleep(self.timeouts.poll_interval).await;
        }

        if completed.len() != dag.operators.len() {
            return Err(EngineError::Internal(format!(
                "run terminated with {} of {} operators completed",
                completed.len(),
                dag.operators.len()
            )));
        }
        if let Some((id, _)) = remaining.iter().find(|(_, count)| **count != 0) {
            return Err(EngineError::Internal(format!(
                "operator {id} still has unsatisfied dependencies after termination"
            )));
        }
        Ok(())
    }

    /// Preview cache short-circuit: if every output of the operator is
    /// already cached, serve it without launching. Otherwise the acquired
    /// gates are held until the operator terminates, so no other preview
    /// computes the same signatures concurrently.
    async fn try_serve_cached(
        &self,
        dag: &WorkflowDag,
        exec: &mut OperatorExecution,
        storage: &dyn Storage,
        preview_artifacts: &mut HashMap<Uuid, PreviewArtifact>,
        held_gates: &mut HashMap<
            Uuid,
            Vec<(Uuid, tokio::sync::OwnedMutexGuard<Option<PreviewArtifact>>)>,
        >,
    ) -> Result<bool, EngineError> {
        if exec.outputs.is_empty() {
            return Ok(false);
        }
        let mut guards = Vec::with_capacity(exec.outputs.len());
        for output in &exec.outputs {
            let signature = dag.artifact_signature(output.artifact_id).ok_or_else(|| {
                EngineError::Internal(format!(
                    "artifact {} has no signature",
                    output.artifact_id
                ))
            })?;
            guards.push((signature, self.preview_cache.acquire(signature).await));
        }

        if guards.iter().all(|(_, guard)| guard.is_some()) {
            let mut metadata = std::collections::BTreeMap::new();
            for (output, (_, guard)) in exec.outputs.iter().zip(guards.iter()) {
                if let Some(artifact) = guard.as_ref() {
                    // Downstream operators read this run's paths, so the
                    // cached content still has to land there.
                    storage.put(&output.content_path, &artifact.content).await?;
                    metadata.insert(output.artifact_id, artifact.metadata.clone());
                    preview_artifacts.insert(output.artifact_id, artifact.clone());
                }
            }
            info!(operator = %exec.operator.name, "served operator from preview cache");
            exec.mark_cached(metadata);
            return Ok(true);
        }

        held_gates.insert(exec.operator.id, guards);
        Ok(false)
    }

    /// Read the succeeded operator's output blobs inline and publish them to
    /// the preview cache through the held gates.
    async fn collect_preview_outputs(
        &self,
        dag: &WorkflowDag,
        exec: &OperatorExecution,
        storage: &dyn Storage,
        preview_artifacts: &mut HashMap<Uuid, PreviewArtifact>,
        gates: Option<Vec<(Uuid, tokio::sync::OwnedMutexGuard<Option<PreviewArtifact>>)>>,
    ) -> Result<(), EngineError> {
        let mut gates: HashMap<Uuid, _> = gates
            .into_iter()
            .flatten()
            .map(|(signature, guard)| (signature, guard))
            .collect();

        for output in &exec.outputs {
            let content = storage.get(&output.content_path).await?;
            let artifact = PreviewArtifact {
                content,
                metadata: exec.artifact_metadata(output.artifact_id),
            };
            let signature = dag.artifact_signature(output.artifact_id).ok_or_else(|| {
                EngineError::Internal(format!(
                    "artifact {} has no signature",
                    output.artifact_id
                ))
            })?;
            match gates.remove(&signature) {
                Some(mut guard) => *guard = Some(artifact.clone()),
                None => self.preview_cache.insert(signature, artifact.clone()).await,
            }
            preview_artifacts.insert(output.artifact_id, artifact);
        }
        Ok(())
    }

    /// Cancel operators that never started. In-progress ones are left for
    /// the drain pass.
    async fn cancel_unstarted(
        &self,
        executions: &mut HashMap<Uuid, OperatorExecution>,
        completed: &HashSet<Uuid>,
        in_progress: &HashSet<Uuid>,
        dag_result_id: Option<Uuid>,
    ) {
        for (op_id, exec) in executions.iter_mut() {
            if completed.contains(op_id) || in_progress.contains(op_id) {
                continue;
            }
            exec.cancel();
            if let Some(dag_result_id) = dag_result_id {
                exec.persist_result(self.store.as_ref(), dag_result_id).await;
            }
        }
    }

    /// Bounded cleanup after a stop: wait up to `cleanup_timeout` for
    /// launched jobs to terminate, then cancel whatever is left locally.
    async fn drain_and_cancel(
        &self,
        _mode: ExecutionMode,
        storage: &dyn Storage,
        executions: &mut HashMap<Uuid, OperatorExecution>,
        dag_result_id: Option<Uuid>,
    ) {
        let deadline = Instant::now() + self.timeouts.cleanup_timeout;
        loop {
            let mut outstanding = false;
            for exec in executions.values_mut() {
                if exec.needs_drain() {
                    if let Err(err) = exec.poll(storage).await {
                        warn!(error = %err, "poll failed during cleanup");
                    }
                    if exec.needs_drain() {
                        outstanding = true;
                    }
                }
            }
            if !outstanding || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.timeouts.poll_interval).await;
        }

        for exec in executions.values_mut() {
            if !exec.exec_state.is_terminal() {
                exec.cancel();
                if let Some(dag_result_id) = dag_result_id {
                    exec.persist_result(self.store.as_ref(), dag_result_id).await;
                }
            }
        }
    }

    /// Terminal bookkeeping for publish runs: final DAG-result state, a
    /// notification for the workflow owner, and the retention sweep. All
    /// best-effort; failures here never change the run's outcome.
    async fn finalize_publish(
        &self,
        dag: &WorkflowDag,
        workflow: &Workflow,
        dag_result_id: Uuid,
        status: ExecutionStatus,
        failure_type: Option<FailureType>,
        storage: &Arc<dyn Storage>,
    ) {
        let mut final_state = ExecutionState::pending();
        match status {
            ExecutionStatus::Succeeded => final_state.succeeded(),
            ExecutionStatus::Canceled => final_state.canceled(),
            _ => final_state.failed(
                failure_type.unwrap_or(FailureType::System),
                crate::models::ExecError::new(
                    "one or more operators did not succeed",
                    "See the operator results for details.",
                ),
            ),
        }
        if let Err(err) = self
            .store
            .update_dag_result_state(dag_result_id, &final_state)
            .await
        {
            error!(error = %err, "failed to persist final dag result state");
        }

        let level = match (status, failure_type) {
            (ExecutionStatus::Succeeded, _) => NotificationLevel::Success,
            (_, Some(FailureType::UserNonFatal)) => NotificationLevel::Warning,
            _ => NotificationLevel::Error,
        };
        let muted = workflow
            .notification_settings
            .min_level
            .is_some_and(|min| level < min);
        if !muted {
            let notification = Notification {
                id: Uuid::new_v4(),
                receiver_id: workflow.user_id,
                content: format!("Workflow {} finished with status {status:?}.", workflow.name),
                level,
                status: NotificationStatus::Unread,
                association: NotificationAssociation::DagResult { id: dag_result_id },
            };
            if let Err(err) = self.store.create_notification(&notification).await {
                error!(error = %err, "failed to create run notification");
            }
        }

        if let Some(keep) = workflow.retention_policy.kept_latest_runs {
            if let Err(err) = self
                .sweep_expired_runs(dag.meta.workflow_id, keep, storage)
                .await
            {
                error!(error = %err, "retention sweep failed");
            }
        }
    }

    /// Delete result rows and content blobs older than the newest `keep`
    /// runs of the workflow.
    async fn sweep_expired_runs(
        &self,
        workflow_id: Uuid,
        keep: i64,
        storage: &Arc<dyn Storage>,
    ) -> Result<(), EngineError> {
        let expired = self
            .store
            .dag_results_by_workflow_after(workflow_id, keep)
            .await?;
        for run in expired {
            let artifacts = self.store.artifact_results_by_dag_result(run.id).await?;
            let deletions = futures::future::join_all(
                artifacts
                    .iter()
                    .map(|artifact| storage.delete(&artifact.content_path)),
            )
            .await;
            for (artifact, deletion) in artifacts.iter().zip(deletions) {
                if let Err(err) = deletion {
                    warn!(path = %artifact.content_path, error = %err, "failed to sweep blob");
                }
            }
            self.store.delete_dag_result(run.id).await?;
            metrics::counter!("aqueduct_runs_swept_total").increment(1);
            info!(dag_result = %run.id, "swept expired run");
        }
        Ok(())
    }
}

/// Final DAG status: Succeeded iff every operator succeeded, otherwise
/// Failed carrying the most severe failure observed.
fn final_dag_state(
    executions: &HashMap<Uuid, OperatorExecution>,
    run_result: &Result<(), EngineError>,
) -> (ExecutionStatus, Option<FailureType>) {
    match run_result {
        Err(EngineError::OperatorFailed { failure_type, .. }) => {
            (ExecutionStatus::Failed, Some(*failure_type))
        }
        Err(_) => (ExecutionStatus::Failed, Some(FailureType::System)),
        Ok(()) => {
            let all_succeeded = executions
                .values()
                .all(|exec| exec.exec_state.status == ExecutionStatus::Succeeded);
            if all_succeeded {
                (ExecutionStatus::Succeeded, None)
            } else {
                // Only non-blocking failures can be present on the Ok path.
                (ExecutionStatus::Failed, Some(FailureType::UserNonFatal))
            }
        }
    }
}
