//! In-memory metadata store for tests and ephemeral previews.
//!
//! Mirrors the Postgres implementation's query semantics (ordering, cascades,
//! node sharing across DAG revisions) without a database. Nothing here
//! persists past process exit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    Artifact, ArtifactResult, Dag, DagEdge, DagResult, ExecutionEnvironment, ExecutionState,
    Notification, NotificationStatus, Operator, OperatorResult, Resource, StorageMigration, User,
    Workflow,
};

use super::{
    DagReader, DagWriter, EnvironmentReader, EnvironmentWriter, FullDag, NotificationReader,
    NotificationWriter, OperatorReader, ResourceReader, ResourceWriter, ResultReader,
    ResultWriter, StorageMigrationReader, StorageMigrationWriter, StoreError, StoreResult,
    UserReader, UserWriter, WorkflowReader, WorkflowStatusEntry, WorkflowUpdate, WorkflowWriter,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    resources: HashMap<Uuid, Resource>,
    workflows: HashMap<Uuid, Workflow>,
    dags: HashMap<Uuid, Dag>,
    operators: HashMap<Uuid, Operator>,
    artifacts: HashMap<Uuid, Artifact>,
    edges: Vec<DagEdge>,
    dag_results: HashMap<Uuid, DagResult>,
    operator_results: HashMap<Uuid, OperatorResult>,
    artifact_results: HashMap<Uuid, ArtifactResult>,
    notifications: HashMap<Uuid, Notification>,
    environments: HashMap<Uuid, ExecutionEnvironment>,
    storage_migrations: HashMap<Uuid, StorageMigration>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn dag_ids_of_workflow(&self, workflow_id: Uuid) -> Vec<Uuid> {
        self.dags
            .values()
            .filter(|dag| dag.workflow_id == workflow_id)
            .map(|dag| dag.id)
            .collect()
    }

    /// Newest-first DAG results for one workflow.
    fn workflow_results(&self, workflow_id: Uuid) -> Vec<DagResult> {
        let dag_ids = self.dag_ids_of_workflow(workflow_id);
        let mut results: Vec<DagResult> = self
            .dag_results
            .values()
            .filter(|result| dag_ids.contains(&result.dag_id))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results
    }

    /// Cascade used by both delete_dag_result and delete_workflow.
    fn remove_dag_result(&mut self, id: Uuid) {
        self.dag_results.remove(&id);
        self.operator_results
            .retain(|_, result| result.dag_result_id != id);
        self.artifact_results
            .retain(|_, result| result.dag_result_id != id);
    }
}

#[async_trait]
impl UserReader for MemoryStore {
    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        let inner = self.inner.read().await;
        inner.users.get(&id).cloned().ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl UserWriter for MemoryStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        self.inner.write().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        self.inner.write().await.users.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl ResourceReader for MemoryStore {
    async fn get_resource(&self, id: Uuid) -> StoreResult<Resource> {
        let inner = self.inner.read().await;
        inner
            .resources
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn resources_by_org(&self, org_id: &str) -> StoreResult<Vec<Resource>> {
        let inner = self.inner.read().await;
        let mut resources: Vec<Resource> = inner
            .resources
            .values()
            .filter(|resource| resource.org_id == org_id)
            .cloned()
            .collect();
        resources.sort_by_key(|resource| resource.created_at);
        Ok(resources)
    }
}

#[async_trait]
impl ResourceWriter for MemoryStore {
    async fn create_resource(&self, resource: &Resource) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .resources
            .insert(resource.id, resource.clone());
        Ok(())
    }

    async fn delete_resource(&self, id: Uuid) -> StoreResult<()> {
        self.inner.write().await.resources.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl WorkflowReader for MemoryStore {
    async fn get_workflow(&self, id: Uuid) -> StoreResult<Workflow> {
        let inner = self.inner.read().await;
        inner
            .workflows
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn workflow_latest_statuses(
        &self,
        org_id: &str,
    ) -> StoreResult<Vec<WorkflowStatusEntry>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<WorkflowStatusEntry> = inner
            .workflows
            .values()
            .filter(|workflow| {
                inner
                    .users
                    .get(&workflow.user_id)
                    .is_some_and(|user| user.org_id == org_id)
            })
            .map(|workflow| {
                let latest = inner.workflow_results(workflow.id).into_iter().next();
                WorkflowStatusEntry {
                    workflow_id: workflow.id,
                    name: workflow.name.clone(),
                    status: latest.as_ref().map(|result| result.exec_state.status),
                    last_run_at: latest.map(|result| result.created_at),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[async_trait]
impl WorkflowWriter for MemoryStore {
    async fn create_workflow(&self, workflow: &Workflow) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .workflows
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn update_workflow(&self, id: Uuid, update: WorkflowUpdate) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let workflow = inner.workflows.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(name) = update.name {
            workflow.name = name;
        }
        if let Some(description) = update.description {
            workflow.description = description;
        }
        if let Some(schedule) = update.schedule {
            workflow.schedule = schedule;
        }
        Ok(())
    }

    async fn delete_workflow(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let dag_ids = inner.dag_ids_of_workflow(id);
        let result_ids: Vec<Uuid> = inner
            .dag_results
            .values()
            .filter(|result| dag_ids.contains(&result.dag_id))
            .map(|result| result.id)
            .collect();
        for result_id in result_ids {
            inner.remove_dag_result(result_id);
        }
        inner.edges.retain(|edge| !dag_ids.contains(&edge.dag_id));
        for dag_id in &dag_ids {
            inner.dags.remove(dag_id);
        }
        inner.workflows.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl DagReader for MemoryStore {
    async fn get_dag(&self, id: Uuid) -> StoreResult<Dag> {
        let inner = self.inner.read().await;
        inner.dags.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_full_dag(&self, id: Uuid) -> StoreResult<FullDag> {
        let inner = self.inner.read().await;
        let dag = inner.dags.get(&id).cloned().ok_or(StoreError::NotFound)?;
        let mut edges: Vec<DagEdge> = inner
            .edges
            .iter()
            .filter(|edge| edge.dag_id == id)
            .cloned()
            .collect();
        edges.sort_by_key(|edge| edge.idx);

        let mut operators: Vec<Operator> = Vec::new();
        let mut artifacts: Vec<Artifact> = Vec::new();
        let mut seen: Vec<Uuid> = Vec::new();
        for edge in &edges {
            for node_id in [edge.from_id, edge.to_id] {
                if seen.contains(&node_id) {
                    continue;
                }
                seen.push(node_id);
                if let Some(operator) = inner.operators.get(&node_id) {
                    operators.push(operator.clone());
                } else if let Some(artifact) = inner.artifacts.get(&node_id) {
                    artifacts.push(artifact.clone());
                }
            }
        }

        Ok(FullDag {
            dag,
            operators,
            artifacts,
            edges,
        })
    }

    async fn latest_dag_by_workflow(&self, workflow_id: Uuid) -> StoreResult<Dag> {
        let inner = self.inner.read().await;
        inner
            .dags
            .values()
            .filter(|dag| dag.workflow_id == workflow_id)
            .max_by_key(|dag| dag.created_at)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn latest_dag_ids_by_org(
        &self,
        org_id: &str,
        engine_type: Option<&str>,
    ) -> StoreResult<Vec<Uuid>> {
        let inner = self.inner.read().await;
        let mut latest_per_workflow: HashMap<Uuid, &Dag> = HashMap::new();
        for dag in inner.dags.values() {
            let in_org = inner
                .workflows
                .get(&dag.workflow_id)
                .and_then(|workflow| inner.users.get(&workflow.user_id))
                .is_some_and(|user| user.org_id == org_id);
            if !in_org {
                continue;
            }
            latest_per_workflow
                .entry(dag.workflow_id)
                .and_modify(|current| {
                    if dag.created_at > current.created_at {
                        *current = dag;
                    }
                })
                .or_insert(dag);
        }
        Ok(latest_per_workflow
            .into_values()
            .filter(|dag| {
                engine_type.is_none_or(|wanted| dag.engine_config.engine_type() == wanted)
            })
            .map(|dag| dag.id)
            .collect())
    }

    async fn dags_referencing_operator(&self, operator_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let inner = self.inner.read().await;
        let mut dag_ids: Vec<Uuid> = inner
            .edges
            .iter()
            .filter(|edge| edge.from_id == operator_id || edge.to_id == operator_id)
            .map(|edge| edge.dag_id)
            .collect();
        dag_ids.sort_unstable();
        dag_ids.dedup();
        Ok(dag_ids)
    }
}

#[async_trait]
impl DagWriter for MemoryStore {
    async fn create_dag(&self, full: &FullDag) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.dags.insert(full.dag.id, full.dag.clone());
        for operator in &full.operators {
            inner
                .operators
                .entry(operator.id)
                .or_insert_with(|| operator.clone());
        }
        for artifact in &full.artifacts {
            inner
                .artifacts
                .entry(artifact.id)
                .or_insert_with(|| artifact.clone());
        }
        for edge in &full.edges {
            let mut edge = edge.clone();
            edge.dag_id = full.dag.id;
            inner.edges.push(edge);
        }
        Ok(())
    }
}

#[async_trait]
impl OperatorReader for MemoryStore {
    async fn operators_by_resource(&self, resource_id: Uuid) -> StoreResult<Vec<Operator>> {
        let inner = self.inner.read().await;
        Ok(inner
            .operators
            .values()
            .filter(|operator| operator.spec.resource_id() == Some(resource_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ResultReader for MemoryStore {
    async fn get_dag_result(&self, id: Uuid) -> StoreResult<DagResult> {
        let inner = self.inner.read().await;
        inner
            .dag_results
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn dag_results_by_workflow(&self, workflow_id: Uuid) -> StoreResult<Vec<DagResult>> {
        let inner = self.inner.read().await;
        Ok(inner.workflow_results(workflow_id))
    }

    async fn dag_results_by_workflow_after(
        &self,
        workflow_id: Uuid,
        keep: i64,
    ) -> StoreResult<Vec<DagResult>> {
        let inner = self.inner.read().await;
        Ok(inner
            .workflow_results(workflow_id)
            .into_iter()
            .skip(keep.max(0) as usize)
            .collect())
    }

    async fn operator_results_by_dag_result(
        &self,
        dag_result_id: Uuid,
    ) -> StoreResult<Vec<OperatorResult>> {
        let inner = self.inner.read().await;
        Ok(inner
            .operator_results
            .values()
            .filter(|result| result.dag_result_id == dag_result_id)
            .cloned()
            .collect())
    }

    async fn artifact_results_by_artifact(
        &self,
        artifact_ids: &[Uuid],
    ) -> StoreResult<Vec<ArtifactResult>> {
        let inner = self.inner.read().await;
        Ok(inner
            .artifact_results
            .values()
            .filter(|result| artifact_ids.contains(&result.artifact_id))
            .cloned()
            .collect())
    }

    async fn artifact_results_by_dag_result(
        &self,
        dag_result_id: Uuid,
    ) -> StoreResult<Vec<ArtifactResult>> {
        let inner = self.inner.read().await;
        Ok(inner
            .artifact_results
            .values()
            .filter(|result| result.dag_result_id == dag_result_id)
            .cloned()
            .collect())
    }

    async fn check_results_by_upstream_artifact(
        &self,
        artifact_id: Uuid,
    ) -> StoreResult<Vec<OperatorResult>> {
        let inner = self.inner.read().await;
        let check_consumers: Vec<Uuid> = inner
            .edges
            .iter()
            .filter(|edge| edge.from_id == artifact_id)
            .filter(|edge| {
                inner
                    .operators
                    .get(&edge.to_id)
                    .is_some_and(|operator| operator.spec.is_check())
            })
            .map(|edge| edge.to_id)
            .collect();
        Ok(inner
            .operator_results
            .values()
            .filter(|result| check_consumers.contains(&result.operator_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ResultWriter for MemoryStore {
    async fn create_dag_result(&self, result: &DagResult) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .dag_results
            .insert(result.id, result.clone());
        Ok(())
    }

    async fn update_dag_result_state(&self, id: Uuid, state: &ExecutionState) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let result = inner.dag_results.get_mut(&id).ok_or(StoreError::NotFound)?;
        result.exec_state = state.clone();
        Ok(())
    }

    async fn create_operator_result(&self, result: &OperatorResult) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .operator_results
            .insert(result.id, result.clone());
        Ok(())
    }

    async fn update_operator_result_state(
        &self,
        id: Uuid,
        state: &ExecutionState,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let result = inner
            .operator_results
            .get_mut(&id)
            .ok_or(StoreError::NotFound)?;
        result.exec_state = state.clone();
        Ok(())
    }

    async fn create_artifact_result(&self, result: &ArtifactResult) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .artifact_results
            .insert(result.id, result.clone());
        Ok(())
    }

    async fn update_artifact_result(&self, result: &ArtifactResult) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let existing = inner
            .artifact_results
            .get_mut(&result.id)
            .ok_or(StoreError::NotFound)?;
        *existing = result.clone();
        Ok(())
    }

    async fn delete_dag_result(&self, id: Uuid) -> StoreResult<()> {
        self.inner.write().await.remove_dag_result(id);
        Ok(())
    }

    async fn record_synced_run(
        &self,
        dag_result: &DagResult,
        operator_results: &[OperatorResult],
        artifact_results: &[ArtifactResult],
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.dag_results.insert(dag_result.id, dag_result.clone());
        for result in operator_results {
            inner.operator_results.insert(result.id, result.clone());
        }
        for result in artifact_results {
            inner.artifact_results.insert(result.id, result.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationReader for MemoryStore {
    async fn notifications_by_receiver(
        &self,
        receiver_id: Uuid,
        status: NotificationStatus,
    ) -> StoreResult<Vec<Notification>> {
        let inner = self.inner.read().await;
        Ok(inner
            .notifications
            .values()
            .filter(|n| n.receiver_id == receiver_id && n.status == status)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotificationWriter for MemoryStore {
    async fn create_notification(&self, notification: &Notification) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .notifications
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn update_notification_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let notification = inner
            .notifications
            .get_mut(&id)
            .ok_or(StoreError::NotFound)?;
        notification.status = status;
        Ok(())
    }
}

#[async_trait]
impl EnvironmentReader for MemoryStore {
    async fn environment_by_hash(
        &self,
        hash: Uuid,
    ) -> StoreResult<Option<ExecutionEnvironment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .environments
            .values()
            .find(|env| env.hash == hash)
            .cloned())
    }
}

#[async_trait]
impl EnvironmentWriter for MemoryStore {
    async fn create_environment(&self, env: &ExecutionEnvironment) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        // De-duplicated by content hash, same as the unique index.
        if inner.environments.values().any(|e| e.hash == env.hash) {
            return Ok(());
        }
        inner.environments.insert(env.id, env.clone());
        Ok(())
    }

    async fn delete_unreferenced_environments(&self) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let referenced: Vec<Uuid> = inner
            .operators
            .values()
            .filter_map(|operator| operator.execution_environment_id)
            .collect();
        let before = inner.environments.len();
        inner.environments.retain(|id, _| referenced.contains(id));
        Ok((before - inner.environments.len()) as u64)
    }
}

#[async_trait]
impl StorageMigrationReader for MemoryStore {
    async fn current_storage_migration(&self) -> StoreResult<Option<StorageMigration>> {
        let inner = self.inner.read().await;
        Ok(inner
            .storage_migrations
            .values()
            .find(|migration| migration.current)
            .cloned())
    }
}

#[async_trait]
impl StorageMigrationWriter for MemoryStore {
    async fn create_storage_migration(&self, migration: &StorageMigration) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .storage_migrations
            .insert(migration.id, migration.clone());
        Ok(())
    }

    async fn set_current_storage_migration(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.storage_migrations.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        for migration in inner.storage_migrations.values_mut() {
            migration.current = migration.id == id;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::*;
    use crate::models::{EngineConfig, ExecutionState, OperatorSpec, StorageConfig};

    async fn seed_user(store: &MemoryStore) -> User {
        let user = User {
            id: Uuid::new_v4(),
            org_id: "org-1".into(),
            email: "eng@example.com".into(),
            role: "admin".into(),
            api_key: "key".into(),
            external_auth_id: None,
        };
        store.create_user(&user).await.unwrap();
        user
    }

    fn workflow_for(user: &User) -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            user_id: user.id,
            name: "wf".into(),
            description: String::new(),
            schedule: crate::models::Schedule::manual(),
            retention_policy: Default::default(),
            notification_settings: Default::default(),
        }
    }

    fn dag_for(workflow_id: Uuid, engine_config: EngineConfig) -> Dag {
        Dag {
            id: Uuid::new_v4(),
            workflow_id,
            created_at: Utc::now(),
            storage_config: StorageConfig::File {
                directory: "/tmp/content".into(),
            },
            engine_config,
        }
    }

    #[tokio::test]
    async fn latest_dag_ids_filter_by_engine_type() {
        let store = MemoryStore::new();
        let user = seed_user(&store).await;

        let wf_native = workflow_for(&user);
        let wf_airflow = workflow_for(&user);
        store.create_workflow(&wf_native).await.unwrap();
        store.create_workflow(&wf_airflow).await.unwrap();

        let operator = Operator {
            id: Uuid::new_v4(),
            name: "p".into(),
            description: String::new(),
            spec: OperatorSpec::Param {
                value: json!(1),
                serialization_type: "json".into(),
            },
            engine_config: None,
            execution_environment_id: None,
        };
        let artifact = Artifact {
            id: Uuid::new_v4(),
            name: "out".into(),
            description: String::new(),
            artifact_type: Default::default(),
        };
        let edge = DagEdge {
            dag_id: Uuid::nil(),
            kind: crate::models::EdgeKind::OperatorToArtifact,
            from_id: operator.id,
            to_id: artifact.id,
            idx: 0,
        };

        let mut old_native = dag_for(wf_native.id, EngineConfig::Aqueduct {});
        old_native.created_at = Utc::now() - Duration::hours(2);
        let new_native = dag_for(wf_native.id, EngineConfig::Aqueduct {});
        let airflow = dag_for(
            wf_airflow.id,
            EngineConfig::Airflow {
                host: "http://airflow".into(),
                username: "a".into(),
                password: "b".into(),
                operator_metadata_prefix: "prefix".into(),
            },
        );

        for dag in [&old_native, &new_native, &airflow] {
            store
                .create_dag(&FullDag {
                    dag: (*dag).clone(),
                    operators: vec![operator.clone()],
                    artifacts: vec![artifact.clone()],
                    edges: vec![edge.clone()],
                })
                .await
                .unwrap();
        }

        let airflow_only = store
            .latest_dag_ids_by_org("org-1", Some("airflow"))
            .await
            .unwrap();
        assert_eq!(airflow_only, vec![airflow.id]);

        let mut all = store.latest_dag_ids_by_org("org-1", None).await.unwrap();
        all.sort_unstable();
        let mut expected = vec![new_native.id, airflow.id];
        expected.sort_unstable();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn retention_query_skips_newest_runs() {
        let store = MemoryStore::new();
        let user = seed_user(&store).await;
        let workflow = workflow_for(&user);
        store.create_workflow(&workflow).await.unwrap();
        let dag = dag_for(workflow.id, EngineConfig::Aqueduct {});
        store
            .create_dag(&FullDag {
                dag: dag.clone(),
                operators: vec![],
                artifacts: vec![],
                edges: vec![],
            })
            .await
            .unwrap();

        let mut ids = Vec::new();
        for age_hours in 0..4 {
            let result = DagResult {
                id: Uuid::new_v4(),
                dag_id: dag.id,
                exec_state: ExecutionState::registered(),
                created_at: Utc::now() - Duration::hours(age_hours),
            };
            store.create_dag_result(&result).await.unwrap();
            ids.push(result.id);
        }

        let expired = store
            .dag_results_by_workflow_after(workflow.id, 2)
            .await
            .unwrap();
        let expired_ids: Vec<Uuid> = expired.iter().map(|r| r.id).collect();
        // Newest two (hours 0 and 1) survive; hours 2 and 3 expire.
        assert_eq!(expired_ids, vec![ids[2], ids[3]]);
    }

    #[tokio::test]
    async fn workflow_delete_cascades_to_results() {
        let store = MemoryStore::new();
        let user = seed_user(&store).await;
        let workflow = workflow_for(&user);
        store.create_workflow(&workflow).await.unwrap();
        let dag = dag_for(workflow.id, EngineConfig::Aqueduct {});
        store
            .create_dag(&FullDag {
                dag: dag.clone(),
                operators: vec![],
                artifacts: vec![],
                edges: vec![],
            })
            .await
            .unwrap();
        let result = DagResult {
            id: Uuid::new_v4(),
            dag_id: dag.id,
            exec_state: ExecutionState::registered(),
            created_at: Utc::now(),
        };
        store.create_dag_result(&result).await.unwrap();

        store.delete_workflow(workflow.id).await.unwrap();

        assert!(matches!(
            store.get_dag(dag.id).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.get_dag_result(result.id).await,
            Err(StoreError::NotFound)
        ));
    }
}
