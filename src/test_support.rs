//! Scripted execution backend for engine tests.
//!
//! [`ScriptedJobManager`] plays the role of a worker fleet: launching a job
//! immediately writes the blobs a real worker would write (output contents
//! plus the operator metadata blob) according to a per-operator script, and
//! records the launch so tests can assert on scheduling order and counts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::job::spec::JobSpec;
use crate::job::{JobError, JobManager, JobResult};
use crate::models::{ExecError, ExecutionState, ExecutionStatus, FailureType};
use crate::storage::Storage;

/// What the fake worker does for one operator.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Write output contents and a Succeeded metadata blob.
    Succeed,
    /// Write a Failed metadata blob with the given failure type; no output
    /// contents.
    Fail(FailureType),
    /// Reject the launch with a system error; nothing is written.
    RefuseLaunch,
    /// Accept the launch but never terminate and never write blobs.
    Hang,
}

#[derive(Default)]
struct Inner {
    outcomes: HashMap<Uuid, ScriptedOutcome>,
    contents: HashMap<Uuid, Vec<u8>>,
    launches: Vec<Uuid>,
    jobs: HashMap<String, ExecutionStatus>,
}

pub struct ScriptedJobManager {
    storage: Arc<dyn Storage>,
    inner: Mutex<Inner>,
}

impl ScriptedJobManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Script an outcome for an operator. Unscripted operators succeed.
    pub fn script(&self, operator_id: Uuid, outcome: ScriptedOutcome) {
        self.inner
            .lock()
            .unwrap()
            .outcomes
            .insert(operator_id, outcome);
    }

    /// Bytes written to each output content path of the operator.
    pub fn set_content(&self, operator_id: Uuid, content: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .unwrap()
            .contents
            .insert(operator_id, content.into());
    }

    /// Operator ids in launch order.
    pub fn launches(&self) -> Vec<Uuid> {
        self.inner.lock().unwrap().launches.clone()
    }

    pub fn launch_count(&self, operator_id: Uuid) -> usize {
        self.inner
            .lock()
            .unwrap()
            .launches
            .iter()
            .filter(|id| **id == operator_id)
            .count()
    }
}

/// Job names are `{operator_id}-{run_uuid}`.
fn operator_of(job_name: &str) -> Option<Uuid> {
    job_name.get(..36).and_then(|s| Uuid::parse_str(s).ok())
}

fn output_content_paths(spec: &JobSpec) -> Vec<String> {
    match spec {
        JobSpec::Function(s) => s.output_content_paths.clone(),
        JobSpec::Param(s) => vec![s.output_content_path.clone()],
        JobSpec::SystemMetric(s) => vec![s.output_content_path.clone()],
        JobSpec::Extract(s) => vec![s.output_content_path.clone()],
        _ => Vec::new(),
    }
}

#[async_trait]
impl JobManager for ScriptedJobManager {
    async fn launch(&self, spec: &JobSpec) -> JobResult<()> {
        let operator_id = operator_of(spec.name()).ok_or_else(|| {
            JobError::System(format!("job {} has no operator prefix", spec.name()))
        })?;

        let (outcome, content) = {
            let mut inner = self.inner.lock().unwrap();
            inner.launches.push(operator_id);
            (
                inner
                    .outcomes
                    .get(&operator_id)
                    .cloned()
                    .unwrap_or(ScriptedOutcome::Succeed),
                inner
                    .contents
                    .get(&operator_id)
                    .cloned()
                    .unwrap_or_else(|| b"42".to_vec()),
            )
        };

        let mut exec_state = ExecutionState::pending();
        let status = match outcome {
            ScriptedOutcome::Succeed => {
                for path in output_content_paths(spec) {
                    self.storage
                        .put(&path, &content)
                        .await
                        .map_err(|err| JobError::System(err.to_string()))?;
                }
                exec_state.succeeded();
                ExecutionStatus::Succeeded
            }
            ScriptedOutcome::Fail(failure_type) => {
                exec_state.failed(
                    failure_type,
                    ExecError::new("scripted failure", "This operator was scripted to fail."),
                );
                ExecutionStatus::Failed
            }
            ScriptedOutcome::RefuseLaunch => {
                return Err(JobError::System(format!(
                    "backend refused job {}",
                    spec.name()
                )));
            }
            ScriptedOutcome::Hang => {
                self.inner
                    .lock()
                    .unwrap()
                    .jobs
                    .insert(spec.name().to_string(), ExecutionStatus::Running);
                return Ok(());
            }
        };

        let metadata = crate::models::OperatorResultMetadata {
            exec_state,
            artifact_metadata: Default::default(),
        };
        let raw = serde_json::to_vec(&metadata)
            .map_err(|err| JobError::System(err.to_string()))?;
        self.storage
            .put(&spec.base().metadata_path, &raw)
            .await
            .map_err(|err| JobError::System(err.to_string()))?;

        self.inner
            .lock()
            .unwrap()
            .jobs
            .insert(spec.name().to_string(), status);
        Ok(())
    }

    async fn poll(&self, name: &str) -> JobResult<ExecutionStatus> {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .get(name)
            .copied()
            .ok_or_else(|| JobError::JobMissing(name.to_string()))
    }

    async fn deploy_cron(&self, _name: &str, _cron_expr: &str, _spec: JobSpec) -> JobResult<()> {
        Err(JobError::Noop)
    }

    async fn cron_exists(&self, _name: &str) -> bool {
        false
    }

    async fn edit_cron(&self, _name: &str, _cron_expr: &str) -> JobResult<()> {
        Err(JobError::Noop)
    }

    async fn delete_cron(&self, _name: &str) -> JobResult<()> {
        Err(JobError::Noop)
    }
}
