//! Typed repositories over the relational metadata database.
//!
//! Each entity gets a read capability and a write capability so handlers
//! that mutate state are obvious at the signature level. The Postgres
//! implementation is the production path; the in-memory implementation backs
//! tests and previews that never need durability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Artifact, ArtifactResult, Dag, DagEdge, DagResult, ExecutionEnvironment, ExecutionState,
    ExecutionStatus, Notification, NotificationStatus, Operator, OperatorResult, Resource,
    Schedule, StorageMigration, User, Workflow,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Change-set for the generic update-workflow path. None fields are left
/// untouched; every set field is serialized uniformly.
#[derive(Debug, Default, Clone)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub schedule: Option<Schedule>,
}

/// Row of the workflow "latest status" view. `status` is None for workflows
/// that have never run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStatusEntry {
    pub workflow_id: Uuid,
    pub name: String,
    pub status: Option<ExecutionStatus>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// A DAG hydrated with every node and edge, ready to hand to the DAG model.
#[derive(Debug, Clone)]
pub struct FullDag {
    pub dag: Dag,
    pub operators: Vec<Operator>,
    pub artifacts: Vec<Artifact>,
    pub edges: Vec<DagEdge>,
}

#[async_trait]
pub trait UserReader: Send + Sync {
    async fn get_user(&self, id: Uuid) -> StoreResult<User>;
}

#[async_trait]
pub trait UserWriter: Send + Sync {
    async fn create_user(&self, user: &User) -> StoreResult<()>;
    async fn delete_user(&self, id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn get_resource(&self, id: Uuid) -> StoreResult<Resource>;
    async fn resources_by_org(&self, org_id: &str) -> StoreResult<Vec<Resource>>;
}

#[async_trait]
pub trait ResourceWriter: Send + Sync {
    async fn create_resource(&self, resource: &Resource) -> StoreResult<()>;
    async fn delete_resource(&self, id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait WorkflowReader: Send + Sync {
    async fn get_workflow(&self, id: Uuid) -> StoreResult<Workflow>;
    /// Latest DAG-result status and time per workflow in an org; NULL status
    /// for workflows that never ran.
    async fn workflow_latest_statuses(&self, org_id: &str)
        -> StoreResult<Vec<WorkflowStatusEntry>>;
}

#[async_trait]
pub trait WorkflowWriter: Send + Sync {
    async fn create_workflow(&self, workflow: &Workflow) -> StoreResult<()>;
    async fn update_workflow(&self, id: Uuid, update: WorkflowUpdate) -> StoreResult<()>;
    /// Cascades to DAGs, edges, and results.
    async fn delete_workflow(&self, id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait DagReader: Send + Sync {
    async fn get_dag(&self, id: Uuid) -> StoreResult<Dag>;
    async fn get_full_dag(&self, id: Uuid) -> StoreResult<FullDag>;
    async fn latest_dag_by_workflow(&self, workflow_id: Uuid) -> StoreResult<Dag>;
    /// Latest DAG id per workflow in the org, optionally filtered by engine
    /// type tag.
    async fn latest_dag_ids_by_org(
        &self,
        org_id: &str,
        engine_type: Option<&str>,
    ) -> StoreResult<Vec<Uuid>>;
    /// Every DAG that references the given operator (deletion safety).
    async fn dags_referencing_operator(&self, operator_id: Uuid) -> StoreResult<Vec<Uuid>>;
}

#[async_trait]
pub trait DagWriter: Send + Sync {
    /// Commit a DAG with its nodes and edges in one transaction.
    async fn create_dag(&self, full: &FullDag) -> StoreResult<()>;
}

#[async_trait]
pub trait OperatorReader: Send + Sync {
    /// Operators with an edge to the given resource ("what uses this").
    async fn operators_by_resource(&self, resource_id: Uuid) -> StoreResult<Vec<Operator>>;
}

#[async_trait]
pub trait ResultReader: Send + Sync {
    async fn get_dag_result(&self, id: Uuid) -> StoreResult<DagResult>;
    /// Newest first.
    async fn dag_results_by_workflow(&self, workflow_id: Uuid) -> StoreResult<Vec<DagResult>>;
    /// Offset-skip form used by retention sweeps: results older than the
    /// newest `keep` rows for the workflow, newest first.
    async fn dag_results_by_workflow_after(
        &self,
        workflow_id: Uuid,
        keep: i64,
    ) -> StoreResult<Vec<DagResult>>;
    async fn operator_results_by_dag_result(
        &self,
        dag_result_id: Uuid,
    ) -> StoreResult<Vec<OperatorResult>>;
    async fn artifact_results_by_artifact(
        &self,
        artifact_ids: &[Uuid],
    ) -> StoreResult<Vec<ArtifactResult>>;
    async fn artifact_results_by_dag_result(
        &self,
        dag_result_id: Uuid,
    ) -> StoreResult<Vec<ArtifactResult>>;
    /// Results of check operators consuming the given artifact, used for
    /// badge rendering.
    async fn check_results_by_upstream_artifact(
        &self,
        artifact_id: Uuid,
    ) -> StoreResult<Vec<OperatorResult>>;
}

#[async_trait]
pub trait ResultWriter: Send + Sync {
    async fn create_dag_result(&self, result: &DagResult) -> StoreResult<()>;
    async fn update_dag_result_state(&self, id: Uuid, state: &ExecutionState) -> StoreResult<()>;
    async fn create_operator_result(&self, result: &OperatorResult) -> StoreResult<()>;
    async fn update_operator_result_state(
        &self,
        id: Uuid,
        state: &ExecutionState,
    ) -> StoreResult<()>;
    async fn create_artifact_result(&self, result: &ArtifactResult) -> StoreResult<()>;
    async fn update_artifact_result(&self, result: &ArtifactResult) -> StoreResult<()>;
    /// Cascades to operator and artifact results.
    async fn delete_dag_result(&self, id: Uuid) -> StoreResult<()>;
    /// Materialize one remote run as local rows in a single transaction.
    async fn record_synced_run(
        &self,
        dag_result: &DagResult,
        operator_results: &[OperatorResult],
        artifact_results: &[ArtifactResult],
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait NotificationReader: Send + Sync {
    async fn notifications_by_receiver(
        &self,
        receiver_id: Uuid,
        status: NotificationStatus,
    ) -> StoreResult<Vec<Notification>>;
}

#[async_trait]
pub trait NotificationWriter: Send + Sync {
    async fn create_notification(&self, notification: &Notification) -> StoreResult<()>;
    async fn update_notification_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait EnvironmentReader: Send + Sync {
    async fn environment_by_hash(&self, hash: Uuid)
        -> StoreResult<Option<ExecutionEnvironment>>;
}

#[async_trait]
pub trait EnvironmentWriter: Send + Sync {
    async fn create_environment(&self, env: &ExecutionEnvironment) -> StoreResult<()>;
    /// Sweep environments no operator references anymore; returns the number
    /// of rows removed.
    async fn delete_unreferenced_environments(&self) -> StoreResult<u64>;
}

#[async_trait]
pub trait StorageMigrationReader: Send + Sync {
    async fn current_storage_migration(&self) -> StoreResult<Option<StorageMigration>>;
}

#[async_trait]
pub trait StorageMigrationWriter: Send + Sync {
    async fn create_storage_migration(&self, migration: &StorageMigration) -> StoreResult<()>;
    /// Flip the `current` flag to the given row, clearing it everywhere else
    /// in the same transaction.
    async fn set_current_storage_migration(&self, id: Uuid) -> StoreResult<()>;
}

/// Everything the engine and sync paths need from persistence.
pub trait MetadataStore:
    UserReader
    + UserWriter
    + ResourceReader
    + ResourceWriter
    + WorkflowReader
    + WorkflowWriter
    + DagReader
    + DagWriter
    + OperatorReader
    + ResultReader
    + ResultWriter
    + NotificationReader
    + NotificationWriter
    + EnvironmentReader
    + EnvironmentWriter
    + StorageMigrationReader
    + StorageMigrationWriter
{
}

impl<T> MetadataStore for T where
    T: UserReader
        + UserWriter
        + ResourceReader
        + ResourceWriter
        + WorkflowReader
        + WorkflowWriter
        + DagReader
        + DagWriter
        + OperatorReader
        + ResultReader
        + ResultWriter
        + NotificationReader
        + NotificationWriter
        + EnvironmentReader
        + EnvironmentWriter
        + StorageMigrationReader
        + StorageMigrationWriter
{
}
