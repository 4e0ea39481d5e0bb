//! Job managers: the single polymorphism point between the engine and its
//! execution backends.
//!
//! Every backend — local processes, Kubernetes, Lambda, Databricks, Spark —
//! implements the same interface. Backend-specific knobs stay inside the
//! engine-config variant that selects the backend; nothing backend-specific
//! leaks through the trait.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{EngineConfig, ExecutionStatus};

pub mod cron;
pub mod databricks;
pub mod kubernetes;
pub mod lambda;
pub mod process;
pub mod spark;
pub mod spec;

pub use process::ProcessJobManager;
pub use spec::JobSpec;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Backend or infrastructure fault. Propagates as an operator failure.
    #[error("{0}")]
    System(String),
    /// The job ran and reported a user-level failure.
    #[error("{0}")]
    User(String),
    /// The named job is unknown to this backend.
    #[error("job {0} does not exist")]
    JobMissing(String),
    /// The backend cannot introspect individual jobs; the caller must read
    /// the metadata blob the worker writes instead.
    #[error("operation is not observable on this backend")]
    Noop,
}

impl From<reqwest::Error> for JobError {
    fn from(err: reqwest::Error) -> Self {
        JobError::System(err.to_string())
    }
}

pub type JobResult<T> = Result<T, JobError>;

/// Launch units of work and answer for their status. Cron operations are
/// only meaningful on backends that own a schedule; the rest return `Noop`.
#[async_trait]
pub trait JobManager: Send + Sync {
    async fn launch(&self, spec: &JobSpec) -> JobResult<()>;
    async fn poll(&self, name: &str) -> JobResult<ExecutionStatus>;
    async fn deploy_cron(&self, name: &str, cron_expr: &str, spec: JobSpec) -> JobResult<()>;
    async fn cron_exists(&self, name: &str) -> bool;
    /// An empty expression pauses the job without discarding its spec.
    async fn edit_cron(&self, name: &str, cron_expr: &str) -> JobResult<()>;
    async fn delete_cron(&self, name: &str) -> JobResult<()>;
}

/// Construct the job manager selected by an engine config. Self-orchestrated
/// engines never launch jobs locally, so asking for one is an error.
pub fn from_engine_config(config: &EngineConfig) -> JobResult<Arc<dyn JobManager>> {
    match config {
        EngineConfig::Aqueduct {} => Ok(Arc::new(process::ProcessJobManager::new(
            process::ProcessConfig::default(),
        ))),
        EngineConfig::Kubernetes {
            kubeconfig_path,
            cluster_name,
            use_same_cluster,
        } => Ok(Arc::new(kubernetes::KubernetesJobManager::from_kubeconfig(
            kubeconfig_path,
            cluster_name,
            *use_same_cluster,
        )?)),
        EngineConfig::Lambda { role_arn, region } => Ok(Arc::new(
            lambda::LambdaJobManager::new(role_arn.clone(), region.clone()),
        )),
        EngineConfig::Databricks {
            workspace_url,
            access_token,
            s3_instance_profile_arn,
            instance_pool_id,
        } => Ok(Arc::new(databricks::DatabricksJobManager::new(
            workspace_url.clone(),
            access_token.clone(),
            s3_instance_profile_arn.clone(),
            instance_pool_id.clone(),
        ))),
        EngineConfig::Spark { livy_server_url } => Ok(Arc::new(
            spark::SparkJobManager::new(livy_server_url.clone()),
        )),
        EngineConfig::Airflow { .. } => Err(JobError::System(
            "airflow-backed DAGs are reconciled, not launched locally".to_string(),
        )),
    }
}
