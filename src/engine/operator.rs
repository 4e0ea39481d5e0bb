//! Per-operator execution lifecycle.
//!
//! An [`OperatorExecution`] owns the run-scoped paths and job spec for one
//! operator, tracks its execution state, and mediates between the job
//! manager's reported status and the metadata blob the worker writes. The
//! blob wins: whatever terminal state the worker recorded overrides the
//! backend's view.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, warn};
use uuid::Uuid;

use crate::db::MetadataStore;
use crate::job::spec::{
    ExtractJobSpec, FunctionJobSpec, JobBase, JobSpec, LoadJobSpec, ParamJobSpec,
    SystemMetricJobSpec,
};
use crate::job::{JobError, JobManager};
use crate::models::{
    ArtifactResult, ArtifactResultMetadata, ExecutionState, ExecutionStatus, FailureType,
    Operator, OperatorResult, OperatorResultMetadata, OperatorSpec,
};
use crate::storage::{paths, Storage, StorageError};

use super::{EngineError, ExecutionMode};

/// Run-scoped paths for one output artifact.
#[derive(Debug, Clone)]
pub struct OutputArtifact {
    pub artifact_id: Uuid,
    pub content_path: String,
    pub metadata_path: String,
    /// Artifact-result row id; set when results are initialized in publish
    /// mode.
    pub result_row_id: Uuid,
}

/// Run-scoped view of an input artifact, resolved from its producer.
#[derive(Debug, Clone)]
pub struct InputArtifact {
    pub artifact_id: Uuid,
    pub content_path: String,
    pub metadata_path: String,
    /// Name of the producing operator, used for parameter expansion.
    pub producer_name: String,
    /// Operator-metadata path of the producer, consumed by system metrics.
    pub producer_metadata_path: String,
}

pub struct OperatorExecution {
    pub operator: Operator,
    pub job_name: String,
    pub metadata_path: String,
    pub inputs: Vec<InputArtifact>,
    pub outputs: Vec<OutputArtifact>,
    pub exec_state: ExecutionState,
    spec: JobSpec,
    job_manager: Arc<dyn JobManager>,
    result_row_id: Option<Uuid>,
    launched: bool,
    /// True when the result was served from the preview cache; cached
    /// operators have no blobs of their own to collect.
    cached: bool,
    /// False once the backend answered `Noop`; such jobs are considered
    /// drained immediately during cleanup.
    backend_observable: bool,
    /// Per-artifact metadata lifted from the worker's blob at terminal poll.
    artifact_metadata: BTreeMap<Uuid, ArtifactResultMetadata>,
}

impl OperatorExecution {
    pub(super) fn new(
        operator: Operator,
        spec: JobSpec,
        job_manager: Arc<dyn JobManager>,
        metadata_path: String,
        inputs: Vec<InputArtifact>,
        outputs: Vec<OutputArtifact>,
    ) -> Self {
        let job_name = spec.name().to_string();
        Self {
            operator,
            job_name,
            metadata_path,
            inputs,
            outputs,
            exec_state: ExecutionState::pending(),
            spec,
            job_manager,
            result_row_id: None,
            launched: false,
            cached: false,
            backend_observable: true,
            artifact_metadata: BTreeMap::new(),
        }
    }

    pub fn artifact_metadata(&self, artifact_id: Uuid) -> ArtifactResultMetadata {
        self.artifact_metadata
            .get(&artifact_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Insert the Pending operator-result row and one artifact-result row
    /// per output. Publish mode only.
    pub async fn initialize_result(
        &mut self,
        store: &dyn MetadataStore,
        dag_result_id: Uuid,
    ) -> Result<(), EngineError> {
        let row_id = Uuid::new_v4();
        store
            .create_operator_result(&OperatorResult {
                id: row_id,
                dag_result_id,
                operator_id: self.operator.id,
                exec_state: ExecutionState::pending(),
            })
            .await?;
        self.result_row_id = Some(row_id);

        for output in &self.outputs {
            store
                .create_artifact_result(&ArtifactResult {
                    id: output.result_row_id,
                    dag_result_id,
                    artifact_id: output.artifact_id,
                    content_path: output.content_path.clone(),
                    exec_state: ExecutionState::pending(),
                    metadata: ArtifactResultMetadata::default(),
                })
                .await?;
        }
        Ok(())
    }

    /// Push the job to the backend. AWS keys from the engine's environment
    /// are injected into the spec's storage config so the worker can reach
    /// S3-backed blobs.
    pub async fn launch(&mut self) -> Result<(), EngineError> {
        let mut spec = self.spec.clone();
        if let (Ok(key_id), Ok(secret)) = (
            std::env::var("AWS_ACCESS_KEY_ID"),
            std::env::var("AWS_SECRET_ACCESS_KEY"),
        ) {
            spec.inject_aws_credentials(&key_id, &secret);
        }
        match self.job_manager.launch(&spec).await {
            Ok(()) => {
                self.launched = true;
                self.exec_state.running();
                Ok(())
            }
            Err(err) => {
                self.exec_state = ExecutionState::system_failure(format!(
                    "failed to launch operator {}: {err}",
                    self.operator.name
                ));
                Err(EngineError::Launch {
                    operator: self.operator.name.clone(),
                    source: err,
                })
            }
        }
    }

    /// Current state of the operator: the job manager's report combined with
    /// the worker's metadata blob.
    pub async fn poll(&mut self, storage: &dyn Storage) -> Result<ExecutionState, EngineError> {
        if self.exec_state.is_terminal() {
            return Ok(self.exec_state.clone());
        }
        if !self.launched {
            return Ok(self.exec_state.clone());
        }

        match self.job_manager.poll(&self.job_name).await {
            Ok(status) if !status.is_terminal() => Ok(self.exec_state.clone()),
            Ok(status) => {
                self.resolve_terminal(storage, Some(status)).await;
                Ok(self.exec_state.clone())
            }
            // Backend cannot introspect jobs; the blob is the only signal.
            Err(JobError::Noop) => {
                self.backend_observable = false;
                if storage.exists(&self.metadata_path).await {
                    self.resolve_terminal(storage, None).await;
                }
                Ok(self.exec_state.clone())
            }
            Err(JobError::JobMissing(name)) => {
                self.exec_state = ExecutionState::system_failure(format!(
                    "job {name} disappeared from the backend"
                ));
                Ok(self.exec_state.clone())
            }
            Err(JobError::User(message)) => {
                let mut state = ExecutionState::pending();
                state.failed(
                    FailureType::UserFatal,
                    crate::models::ExecError::new(message, "Your code reported a fatal error."),
                );
                self.exec_state = state;
                Ok(self.exec_state.clone())
            }
            Err(JobError::System(message)) => {
                self.exec_state = ExecutionState::system_failure(message);
                Ok(self.exec_state.clone())
            }
        }
    }

    /// The job terminated (or the blob appeared). The blob's stored state
    /// overrides the backend's status; a terminal job with no blob is a
    /// system failure.
    async fn resolve_terminal(&mut self, storage: &dyn Storage, status: Option<ExecutionStatus>) {
        match storage.get(&self.metadata_path).await {
            Ok(raw) => match serde_json::from_slice::<OperatorResultMetadata>(&raw) {
                Ok(metadata) => {
                    self.exec_state = metadata.exec_state;
                    self.artifact_metadata = metadata.artifact_metadata;
                    if !self.exec_state.is_terminal() {
                        // A worker that wrote a non-terminal state is a bug.
                        self.exec_state = ExecutionState::system_failure(format!(
                            "operator {} wrote a non-terminal metadata blob",
                            self.operator.name
                        ));
                    }
                }
                Err(err) => {
                    self.exec_state = ExecutionState::system_failure(format!(
                        "operator {} wrote an unreadable metadata blob: {err}",
                        self.operator.name
                    ));
                }
            },
            Err(StorageError::NotFound(_)) => {
                self.exec_state = ExecutionState::system_failure(format!(
                    "operator {} terminated ({status:?}) without writing metadata",
                    self.operator.name
                ));
            }
            Err(err) => {
                self.exec_state = ExecutionState::system_failure(format!(
                    "failed to read metadata for operator {}: {err}",
                    self.operator.name
                ));
            }
        }
    }

    /// Write the terminal state into the operator-result row and update each
    /// output artifact-result. Errors are logged, not propagated; the run
    /// proceeds to cancel the remaining operators regardless.
    pub async fn persist_result(&self, store: &dyn MetadataStore, dag_result_id: Uuid) {
        let Some(row_id) = self.result_row_id else {
            warn!(
                operator = %self.operator.name,
                "skipping persist for uninitialized operator result"
            );
            return;
        };
        if let Err(err) = store
            .update_operator_result_state(row_id, &self.exec_state)
            .await
        {
            error!(
                operator = %self.operator.name,
                error = %err,
                "failed to persist operator result"
            );
        }

        for output in &self.outputs {
            let result = ArtifactResult {
                id: output.result_row_id,
                dag_result_id,
                artifact_id: output.artifact_id,
                content_path: output.content_path.clone(),
                exec_state: self.exec_state.clone(),
                metadata: self.artifact_metadata(output.artifact_id),
            };
            if let Err(err) = store.update_artifact_result(&result).await {
                error!(
                    operator = %self.operator.name,
                    artifact = %output.artifact_id,
                    error = %err,
                    "failed to persist artifact result"
                );
            }
        }
    }

    /// Mark the operator served from the preview cache, adopting the cached
    /// per-artifact metadata.
    pub fn mark_cached(&mut self, artifact_metadata: BTreeMap<Uuid, ArtifactResultMetadata>) {
        self.launched = false;
        self.cached = true;
        self.artifact_metadata = artifact_metadata;
        self.exec_state.succeeded();
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Local cancellation; the backend job, if any, is left to drain.
    pub fn cancel(&mut self) {
        if !self.exec_state.is_terminal() {
            self.exec_state.canceled();
        }
    }

    pub fn is_launched(&self) -> bool {
        self.launched
    }

    /// Whether cleanup should keep waiting on this job. Unlaunched jobs and
    /// Noop backends are drained immediately.
    pub fn needs_drain(&self) -> bool {
        self.launched && self.backend_observable && !self.exec_state.is_terminal()
    }

    /// Release run-scoped blobs. Preview blobs are swept; publish blobs are
    /// the durable record and stay.
    pub async fn finish(&self, storage: &dyn Storage, mode: ExecutionMode) {
        if mode != ExecutionMode::Preview {
            return;
        }
        let mut paths = vec![self.metadata_path.clone()];
        for output in &self.outputs {
            paths.push(output.content_path.clone());
            paths.push(output.metadata_path.clone());
        }
        for path in paths {
            if let Err(err) = storage.delete(&path).await {
                warn!(path = %path, error = %err, "failed to sweep preview blob");
            }
        }
    }
}

/// Resolve run-scoped paths for every operator, then build each operator's
/// job spec against its neighbors' paths.
pub(super) async fn build_executions(
    dag: &crate::dag::WorkflowDag,
    mode: ExecutionMode,
    store: &dyn MetadataStore,
    default_manager: Arc<dyn JobManager>,
) -> Result<std::collections::HashMap<Uuid, OperatorExecution>, EngineError> {
    use std::collections::HashMap;

    struct Planned {
        metadata_path: String,
        outputs: Vec<OutputArtifact>,
    }

    let decorate = |path: String| match mode {
        ExecutionMode::Preview => paths::preview_path(&path),
        ExecutionMode::Publish => path,
    };

    let mut planned: HashMap<Uuid, Planned> = HashMap::new();
    for op_id in dag.operators.keys() {
        let outputs = dag
            .operator_outputs(*op_id)
            .iter()
            .map(|artifact_id| OutputArtifact {
                artifact_id: *artifact_id,
                content_path: decorate(paths::artifact_content_path(Uuid::new_v4())),
                metadata_path: decorate(paths::artifact_metadata_path(Uuid::new_v4())),
                result_row_id: Uuid::new_v4(),
            })
            .collect();
        planned.insert(
            *op_id,
            Planned {
                metadata_path: decorate(paths::operator_metadata_path(Uuid::new_v4())),
                outputs,
            },
        );
    }

    let mut executions = HashMap::new();
    for (op_id, operator) in &dag.operators {
        let plan = &planned[op_id];

        let inputs: Vec<InputArtifact> = dag
            .operator_inputs(*op_id)
            .iter()
            .map(|artifact_id| {
                let producer_id = dag.artifact_producer(*artifact_id).ok_or_else(|| {
                    EngineError::Internal(format!("artifact {artifact_id} has no producer"))
                })?;
                let producer_plan = &planned[&producer_id];
                let output = producer_plan
                    .outputs
                    .iter()
                    .find(|output| output.artifact_id == *artifact_id)
                    .ok_or_else(|| {
                        EngineError::Internal(format!(
                            "artifact {artifact_id} missing from its producer's outputs"
                        ))
                    })?;
                Ok(InputArtifact {
                    artifact_id: *artifact_id,
                    content_path: output.content_path.clone(),
                    metadata_path: output.metadata_path.clone(),
                    producer_name: dag.operators[&producer_id].name.clone(),
                    producer_metadata_path: producer_plan.metadata_path.clone(),
                })
            })
            .collect::<Result<_, EngineError>>()?;

        let spec = build_spec(
            operator,
            &dag.meta.storage_config,
            &plan.metadata_path,
            &inputs,
            &plan.outputs,
            store,
        )
        .await?;

        let manager = match &operator.engine_config {
            Some(config) => crate::job::from_engine_config(config).map_err(|err| {
                EngineError::Launch {
                    operator: operator.name.clone(),
                    source: err,
                }
            })?,
            None => Arc::clone(&default_manager),
        };

        executions.insert(
            *op_id,
            OperatorExecution::new(
                operator.clone(),
                spec,
                manager,
                plan.metadata_path.clone(),
                inputs,
                plan.outputs.clone(),
            ),
        );
    }

    Ok(executions)
}

async fn build_spec(
    operator: &Operator,
    storage_config: &crate::models::StorageConfig,
    metadata_path: &str,
    inputs: &[InputArtifact],
    outputs: &[OutputArtifact],
    store: &dyn MetadataStore,
) -> Result<JobSpec, EngineError> {
    let base = JobBase {
        name: format!("{}-{}", operator.id, Uuid::new_v4()),
        storage_config: storage_config.clone(),
        metadata_path: metadata_path.to_string(),
    };
    let input_content_paths: Vec<String> =
        inputs.iter().map(|i| i.content_path.clone()).collect();
    let input_metadata_paths: Vec<String> =
        inputs.iter().map(|i| i.metadata_path.clone()).collect();
    let output_content_paths: Vec<String> =
        outputs.iter().map(|o| o.content_path.clone()).collect();
    let output_metadata_paths: Vec<String> =
        outputs.iter().map(|o| o.metadata_path.clone()).collect();

    let single_output = || -> Result<&OutputArtifact, EngineError> {
        outputs.first().ok_or_else(|| {
            EngineError::Internal(format!("operator {} has no output artifact", operator.name))
        })
    };

    let spec = match &operator.spec {
        OperatorSpec::Function(params) | OperatorSpec::Metric(params) => {
            JobSpec::Function(FunctionJobSpec {
                base,
                function_path: params.storage_path.clone(),
                entry_point: params.entry_point.clone(),
                input_content_paths,
                input_metadata_paths,
                output_content_paths,
                output_metadata_paths,
                check_severity: None,
            })
        }
        OperatorSpec::Check { function, severity } => JobSpec::Function(FunctionJobSpec {
            base,
            function_path: function.storage_path.clone(),
            entry_point: function.entry_point.clone(),
            input_content_paths,
            input_metadata_paths,
            output_content_paths,
            output_metadata_paths,
            check_severity: Some(*severity),
        }),
        OperatorSpec::Param {
            value,
            serialization_type,
        } => {
            let output = single_output()?;
            JobSpec::Param(ParamJobSpec {
                base,
                value: value.clone(),
                serialization_type: serialization_type.clone(),
                output_content_path: output.content_path.clone(),
                output_metadata_path: output.metadata_path.clone(),
            })
        }
        OperatorSpec::SystemMetric { metric_name } => {
            let output = single_output()?;
            JobSpec::SystemMetric(SystemMetricJobSpec {
                base,
                metric_name: metric_name.clone(),
                input_metadata_paths: inputs
                    .iter()
                    .map(|i| i.producer_metadata_path.clone())
                    .collect(),
                output_content_path: output.content_path.clone(),
                output_metadata_path: output.metadata_path.clone(),
            })
        }
        OperatorSpec::Extract(params) => {
            let resource = store.get_resource(params.resource_id).await?;
            let output = single_output()?;
            JobSpec::Extract(ExtractJobSpec {
                base,
                service: resource.service,
                config: resource.config,
                query: params.query.clone(),
                input_param_names: inputs.iter().map(|i| i.producer_name.clone()).collect(),
                input_content_paths,
                output_content_path: output.content_path.clone(),
                output_metadata_path: output.metadata_path.clone(),
            })
        }
        OperatorSpec::Load(params) => {
            let resource = store.get_resource(params.resource_id).await?;
            let input = inputs.first().ok_or_else(|| {
                EngineError::Internal(format!(
                    "load operator {} has no input artifact",
                    operator.name
                ))
            })?;
            JobSpec::Load(LoadJobSpec {
                base,
                service: resource.service,
                config: resource.config,
                table: params.table.clone(),
                update_mode: params.update_mode.clone(),
                input_content_path: input.content_path.clone(),
                input_metadata_path: input.metadata_path.clone(),
            })
        }
    };
    Ok(spec)
}
