//! Postgres implementation of the metadata repositories.
//!
//! Raw sqlx queries throughout; JSON-valued columns round-trip through
//! `sqlx::types::Json`. Every mutation that touches more than one row runs
//! inside a transaction. Schema migrations are embedded via `sqlx::migrate!`,
//! whose bookkeeping table detects an interrupted migration on the next boot.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::models::{
    Artifact, ArtifactResult, ArtifactResultMetadata, Dag, DagEdge, DagResult,
    ExecutionEnvironment, ExecutionState, Notification, NotificationStatus, Operator,
    OperatorResult, Resource, StorageMigration, User, Workflow,
};

use super::{
    DagReader, DagWriter, EnvironmentReader, EnvironmentWriter, FullDag, NotificationReader,
    NotificationWriter, OperatorReader, ResourceReader, ResourceWriter, ResultReader,
    ResultWriter, StorageMigrationReader, StorageMigrationWriter, StoreError, StoreResult,
    UserReader, UserWriter, WorkflowReader, WorkflowStatusEntry, WorkflowUpdate, WorkflowWriter,
};

/// Value for one column in the generic update-by-id helper.
enum ColumnValue {
    Text(String),
    Jsonb(serde_json::Value),
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run the embedded migrations.
    pub async fn connect(dsn: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(dsn).await?;
        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|err| StoreError::Message(err.to_string()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Serialize a unit-variant enum to its tag string for TEXT columns.
    fn enum_to_text<T: Serialize>(value: &T) -> StoreResult<String> {
        match serde_json::to_value(value)? {
            serde_json::Value::String(s) => Ok(s),
            other => Err(StoreError::Message(format!(
                "expected string-serializable enum, got {other}"
            ))),
        }
    }

    fn enum_from_text<T: DeserializeOwned>(raw: &str) -> StoreResult<T> {
        Ok(serde_json::from_value(serde_json::Value::String(
            raw.to_string(),
        ))?)
    }

    /// Generic "update record by id with change-set" helper. All change-sets
    /// flow through here so JSON columns serialize uniformly.
    async fn update_by_id(
        &self,
        table: &str,
        id: Uuid,
        changes: Vec<(&'static str, ColumnValue)>,
    ) -> StoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!("UPDATE {table} SET "));
        let mut separated = builder.separated(", ");
        for (column, value) in changes {
            match value {
                ColumnValue::Text(text) => {
                    separated.push(format!("{column} = "));
                    separated.push_bind_unseparated(text);
                }
                ColumnValue::Jsonb(json) => {
                    separated.push(format!("{column} = "));
                    separated.push_bind_unseparated(Json(json));
                }
            }
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);
        let result = builder.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn dag_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<Dag> {
        Ok(Dag {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            created_at: row.try_get("created_at")?,
            storage_config: row.try_get::<Json<_>, _>("storage_config")?.0,
            engine_config: row.try_get::<Json<_>, _>("engine_config")?.0,
        })
    }

    fn operator_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<Operator> {
        let engine_config = row
            .try_get::<Option<Json<_>>, _>("engine_config")?
            .map(|json| json.0);
        Ok(Operator {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            spec: row.try_get::<Json<_>, _>("spec")?.0,
            engine_config,
            execution_environment_id: row.try_get("execution_environment_id")?,
        })
    }

    fn dag_result_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<DagResult> {
        Ok(DagResult {
            id: row.try_get("id")?,
            dag_id: row.try_get("dag_id")?,
            exec_state: row.try_get::<Json<_>, _>("exec_state")?.0,
            created_at: row.try_get("created_at")?,
        })
    }

    fn operator_result_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<OperatorResult> {
        Ok(OperatorResult {
            id: row.try_get("id")?,
            dag_result_id: row.try_get("dag_result_id")?,
            operator_id: row.try_get("operator_id")?,
            exec_state: row.try_get::<Json<_>, _>("exec_state")?.0,
        })
    }

    fn artifact_result_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<ArtifactResult> {
        Ok(ArtifactResult {
            id: row.try_get("id")?,
            dag_result_id: row.try_get("dag_result_id")?,
            artifact_id: row.try_get("artifact_id")?,
            content_path: row.try_get("content_path")?,
            exec_state: row.try_get::<Json<_>, _>("exec_state")?.0,
            metadata: row.try_get::<Json<ArtifactResultMetadata>, _>("metadata")?.0,
        })
    }
}

#[async_trait]
impl UserReader for PostgresStore {
    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(User {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            email: row.try_get("email")?,
            role: row.try_get("role")?,
            api_key: row.try_get("api_key")?,
            external_auth_id: row.try_get("external_auth_id")?,
        })
    }
}

#[async_trait]
impl UserWriter for PostgresStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (id, org_id, email, role, api_key, external_auth_id)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user.id)
        .bind(&user.org_id)
        .bind(&user.email)
        .bind(&user.role)
        .bind(&user.api_key)
        .bind(&user.external_auth_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceReader for PostgresStore {
    async fn get_resource(&self, id: Uuid) -> StoreResult<Resource> {
        let row = sqlx::query("SELECT * FROM resources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(Resource {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            user_id: row.try_get("user_id")?,
            service: row.try_get("service")?,
            name: row.try_get("name")?,
            config: row.try_get::<Json<_>, _>("config")?.0,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn resources_by_org(&self, org_id: &str) -> StoreResult<Vec<Resource>> {
        let rows = sqlx::query("SELECT * FROM resources WHERE org_id = $1 ORDER BY created_at")
            .bind(org_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Resource {
                    id: row.try_get("id")?,
                    org_id: row.try_get("org_id")?,
                    user_id: row.try_get("user_id")?,
                    service: row.try_get("service")?,
                    name: row.try_get("name")?,
                    config: row.try_get::<Json<_>, _>("config")?.0,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ResourceWriter for PostgresStore {
    async fn create_resource(&self, resource: &Resource) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO resources (id, org_id, user_id, service, name, config, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(resource.id)
        .bind(&resource.org_id)
        .bind(resource.user_id)
        .bind(&resource.service)
        .bind(&resource.name)
        .bind(Json(&resource.config))
        .bind(resource.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_resource(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkflowReader for PostgresStore {
    async fn get_workflow(&self, id: Uuid) -> StoreResult<Workflow> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(Workflow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            schedule: row.try_get::<Json<_>, _>("schedule")?.0,
            retention_policy: row.try_get::<Json<_>, _>("retention_policy")?.0,
            notification_settings: row.try_get::<Json<_>, _>("notification_settings")?.0,
        })
    }

    async fn workflow_latest_statuses(
        &self,
        org_id: &str,
    ) -> StoreResult<Vec<WorkflowStatusEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT w.id AS workflow_id,
                   w.name,
                   latest.exec_state,
                   latest.created_at
            FROM workflows w
            JOIN users u ON u.id = w.user_id
            LEFT JOIN LATERAL (
                SELECT dr.exec_state, dr.created_at
                FROM dag_results dr
                JOIN dags d ON d.id = dr.dag_id
                WHERE d.workflow_id = w.id
                ORDER BY dr.created_at DESC
                LIMIT 1
            ) latest ON TRUE
            WHERE u.org_id = $1
            ORDER BY w.name
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let state: Option<Json<ExecutionState>> = row.try_get("exec_state")?;
                Ok(WorkflowStatusEntry {
                    workflow_id: row.try_get("workflow_id")?,
                    name: row.try_get("name")?,
                    status: state.map(|json| json.0.status),
                    last_run_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl WorkflowWriter for PostgresStore {
    async fn create_workflow(&self, workflow: &Workflow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO workflows
                 (id, user_id, name, description, schedule, retention_policy, notification_settings)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(workflow.id)
        .bind(workflow.user_id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(Json(&workflow.schedule))
        .bind(Json(&workflow.retention_policy))
        .bind(Json(&workflow.notification_settings))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_workflow(&self, id: Uuid, update: WorkflowUpdate) -> StoreResult<()> {
        let mut changes = Vec::new();
        if let Some(name) = update.name {
            changes.push(("name", ColumnValue::Text(name)));
        }
        if let Some(description) = update.description {
            changes.push(("description", ColumnValue::Text(description)));
        }
        if let Some(schedule) = update.schedule {
            changes.push((
                "schedule",
                ColumnValue::Jsonb(serde_json::to_value(&schedule)?),
            ));
        }
        self.update_by_id("workflows", id, changes).await
    }

    async fn delete_workflow(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DagReader for PostgresStore {
    async fn get_dag(&self, id: Uuid) -> StoreResult<Dag> {
        let row = sqlx::query("SELECT * FROM dags WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Self::dag_from_row(&row)
    }

    async fn get_full_dag(&self, id: Uuid) -> StoreResult<FullDag> {
        let dag = self.get_dag(id).await?;

        let edge_rows = sqlx::query("SELECT * FROM dag_edges WHERE dag_id = $1 ORDER BY idx")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        let edges: Vec<DagEdge> = edge_rows
            .iter()
            .map(|row| {
                Ok(DagEdge {
                    dag_id: row.try_get("dag_id")?,
                    kind: Self::enum_from_text(row.try_get::<String, _>("kind")?.as_str())?,
                    from_id: row.try_get("from_id")?,
                    to_id: row.try_get("to_id")?,
                    idx: row.try_get("idx")?,
                })
            })
            .collect::<StoreResult<_>>()?;

        let operator_rows = sqlx::query(
            r#"
            SELECT DISTINCT o.* FROM operators o
            JOIN dag_edges e ON o.id IN (e.from_id, e.to_id)
            WHERE e.dag_id = $1
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let operators = operator_rows
            .iter()
            .map(Self::operator_from_row)
            .collect::<StoreResult<_>>()?;

        let artifact_rows = sqlx::query(
            r#"
            SELECT DISTINCT a.* FROM artifacts a
            JOIN dag_edges e ON a.id IN (e.from_id, e.to_id)
            WHERE e.dag_id = $1
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let artifacts = artifact_rows
            .iter()
            .map(|row| {
                Ok(Artifact {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    artifact_type: Self::enum_from_text(
                        row.try_get::<String, _>("artifact_type")?.as_str(),
                    )?,
                })
            })
            .collect::<StoreResult<_>>()?;

        Ok(FullDag {
            dag,
            operators,
            artifacts,
            edges,
        })
    }

    async fn latest_dag_by_workflow(&self, workflow_id: Uuid) -> StoreResult<Dag> {
        let row = sqlx::query(
            "SELECT * FROM dags WHERE workflow_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        Self::dag_from_row(&row)
    }

    async fn latest_dag_ids_by_org(
        &self,
        org_id: &str,
        engine_type: Option<&str>,
    ) -> StoreResult<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (d.workflow_id) d.id
            FROM dags d
            JOIN workflows w ON w.id = d.workflow_id
            JOIN users u ON u.id = w.user_id
            WHERE u.org_id = $1
              AND ($2::text IS NULL OR d.engine_config->>'type' = $2)
            ORDER BY d.workflow_id, d.created_at DESC
            "#,
        )
        .bind(org_id)
        .bind(engine_type)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("id")?))
            .collect()
    }

    async fn dags_referencing_operator(&self, operator_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT DISTINCT dag_id FROM dag_edges WHERE from_id = $1 OR to_id = $1",
        )
        .bind(operator_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("dag_id")?))
            .collect()
    }
}

#[async_trait]
impl DagWriter for PostgresStore {
    async fn create_dag(&self, full: &FullDag) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO dags (id, workflow_id, created_at, storage_config, engine_config)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(full.dag.id)
        .bind(full.dag.workflow_id)
        .bind(full.dag.created_at)
        .bind(Json(&full.dag.storage_config))
        .bind(Json(&full.dag.engine_config))
        .execute(&mut *tx)
        .await?;

        if !full.operators.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO operators
                     (id, name, description, spec, engine_config, execution_environment_id) ",
            );
            builder.push_values(full.operators.iter(), |mut b, op| {
                b.push_bind(op.id)
                    .push_bind(&op.name)
                    .push_bind(&op.description)
                    .push_bind(Json(&op.spec))
                    .push_bind(op.engine_config.as_ref().map(Json))
                    .push_bind(op.execution_environment_id);
            });
            // Unchanged nodes are shared with prior DAG revisions.
            builder.push(" ON CONFLICT (id) DO NOTHING");
            builder.build().execute(&mut *tx).await?;
        }

        if !full.artifacts.is_empty() {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO artifacts (id, name, description, artifact_type) ");
            let artifact_types: Vec<String> = full
                .artifacts
                .iter()
                .map(|a| Self::enum_to_text(&a.artifact_type))
                .collect::<StoreResult<_>>()?;
            builder.push_values(
                full.artifacts.iter().zip(artifact_types.iter()),
                |mut b, (artifact, kind)| {
                    b.push_bind(artifact.id)
                        .push_bind(&artifact.name)
                        .push_bind(&artifact.description)
                        .push_bind(kind);
                },
            );
            builder.push(" ON CONFLICT (id) DO NOTHING");
            builder.build().execute(&mut *tx).await?;
        }

        if !full.edges.is_empty() {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO dag_edges (dag_id, kind, from_id, to_id, idx) ");
            let kinds: Vec<String> = full
                .edges
                .iter()
                .map(|e| Self::enum_to_text(&e.kind))
                .collect::<StoreResult<_>>()?;
            builder.push_values(
                full.edges.iter().zip(kinds.iter()),
                |mut b, (edge, kind)| {
                    b.push_bind(full.dag.id)
                        .push_bind(kind)
                        .push_bind(edge.from_id)
                        .push_bind(edge.to_id)
                        .push_bind(edge.idx);
                },
            );
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OperatorReader for PostgresStore {
    async fn operators_by_resource(&self, resource_id: Uuid) -> StoreResult<Vec<Operator>> {
        let rows = sqlx::query("SELECT * FROM operators WHERE spec->>'resource_id' = $1")
            .bind(resource_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::operator_from_row).collect()
    }
}

#[async_trait]
impl ResultReader for PostgresStore {
    async fn get_dag_result(&self, id: Uuid) -> StoreResult<DagResult> {
        let row = sqlx::query("SELECT * FROM dag_results WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Self::dag_result_from_row(&row)
    }

    async fn dag_results_by_workflow(&self, workflow_id: Uuid) -> StoreResult<Vec<DagResult>> {
        let rows = sqlx::query(
            r#"
            SELECT dr.* FROM dag_results dr
            JOIN dags d ON d.id = dr.dag_id
            WHERE d.workflow_id = $1
            ORDER BY dr.created_at DESC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::dag_result_from_row).collect()
    }

    async fn dag_results_by_workflow_after(
        &self,
        workflow_id: Uuid,
        keep: i64,
    ) -> StoreResult<Vec<DagResult>> {
        let rows = sqlx::query(
            r#"
            SELECT dr.* FROM dag_results dr
            JOIN dags d ON d.id = dr.dag_id
            WHERE d.workflow_id = $1
            ORDER BY dr.created_at DESC
            OFFSET $2
            "#,
        )
        .bind(workflow_id)
        .bind(keep)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::dag_result_from_row).collect()
    }

    async fn operator_results_by_dag_result(
        &self,
        dag_result_id: Uuid,
    ) -> StoreResult<Vec<OperatorResult>> {
        let rows = sqlx::query("SELECT * FROM operator_results WHERE dag_result_id = $1")
            .bind(dag_result_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::operator_result_from_row).collect()
    }

    async fn artifact_results_by_artifact(
        &self,
        artifact_ids: &[Uuid],
    ) -> StoreResult<Vec<ArtifactResult>> {
        let rows = sqlx::query("SELECT * FROM artifact_results WHERE artifact_id = ANY($1)")
            .bind(artifact_ids)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::artifact_result_from_row).collect()
    }

    async fn artifact_results_by_dag_result(
        &self,
        dag_result_id: Uuid,
    ) -> StoreResult<Vec<ArtifactResult>> {
        let rows = sqlx::query("SELECT * FROM artifact_results WHERE dag_result_id = $1")
            .bind(dag_result_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::artifact_result_from_row).collect()
    }

    async fn check_results_by_upstream_artifact(
        &self,
        artifact_id: Uuid,
    ) -> StoreResult<Vec<OperatorResult>> {
        let rows = sqlx::query(
            r#"
            SELECT opr.* FROM operator_results opr
            JOIN operators o ON o.id = opr.operator_id
            JOIN dag_edges e ON e.to_id = o.id AND e.from_id = $1
            WHERE o.spec->>'type' = 'check'
            "#,
        )
        .bind(artifact_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::operator_result_from_row).collect()
    }
}

#[async_trait]
impl ResultWriter for PostgresStore {
    async fn create_dag_result(&self, result: &DagResult) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO dag_results (id, dag_id, exec_state, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(result.id)
        .bind(result.dag_id)
        .bind(Json(&result.exec_state))
        .bind(result.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_dag_result_state(&self, id: Uuid, state: &ExecutionState) -> StoreResult<()> {
        self.update_by_id(
            "dag_results",
            id,
            vec![("exec_state", ColumnValue::Jsonb(serde_json::to_value(state)?))],
        )
        .await
    }

    async fn create_operator_result(&self, result: &OperatorResult) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO operator_results (id, dag_result_id, operator_id, exec_state)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(result.id)
        .bind(result.dag_result_id)
        .bind(result.operator_id)
        .bind(Json(&result.exec_state))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_operator_result_state(
        &self,
        id: Uuid,
        state: &ExecutionState,
    ) -> StoreResult<()> {
        self.update_by_id(
            "operator_results",
            id,
            vec![("exec_state", ColumnValue::Jsonb(serde_json::to_value(state)?))],
        )
        .await
    }

    async fn create_artifact_result(&self, result: &ArtifactResult) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO artifact_results
                 (id, dag_result_id, artifact_id, content_path, exec_state, metadata)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(result.id)
        .bind(result.dag_result_id)
        .bind(result.artifact_id)
        .bind(&result.content_path)
        .bind(Json(&result.exec_state))
        .bind(Json(&result.metadata))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_artifact_result(&self, result: &ArtifactResult) -> StoreResult<()> {
        self.update_by_id(
            "artifact_results",
            result.id,
            vec![
                ("content_path", ColumnValue::Text(result.content_path.clone())),
                (
                    "exec_state",
                    ColumnValue::Jsonb(serde_json::to_value(&result.exec_state)?),
                ),
                (
                    "metadata",
                    ColumnValue::Jsonb(serde_json::to_value(&result.metadata)?),
                ),
            ],
        )
        .await
    }

    async fn delete_dag_result(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM dag_results WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_synced_run(
        &self,
        dag_result: &DagResult,
        operator_results: &[OperatorResult],
        artifact_results: &[ArtifactResult],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO dag_results (id, dag_id, exec_state, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(dag_result.id)
        .bind(dag_result.dag_id)
        .bind(Json(&dag_result.exec_state))
        .bind(dag_result.created_at)
        .execute(&mut *tx)
        .await?;

        if !operator_results.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO operator_results (id, dag_result_id, operator_id, exec_state) ",
            );
            builder.push_values(operator_results.iter(), |mut b, result| {
                b.push_bind(result.id)
                    .push_bind(result.dag_result_id)
                    .push_bind(result.operator_id)
                    .push_bind(Json(&result.exec_state));
            });
            builder.build().execute(&mut *tx).await?;
        }

        if !artifact_results.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO artifact_results
                     (id, dag_result_id, artifact_id, content_path, exec_state, metadata) ",
            );
            builder.push_values(artifact_results.iter(), |mut b, result| {
                b.push_bind(result.id)
                    .push_bind(result.dag_result_id)
                    .push_bind(result.artifact_id)
                    .push_bind(&result.content_path)
                    .push_bind(Json(&result.exec_state))
                    .push_bind(Json(&result.metadata));
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationReader for PostgresStore {
    async fn notifications_by_receiver(
        &self,
        receiver_id: Uuid,
        status: NotificationStatus,
    ) -> StoreResult<Vec<Notification>> {
        let rows = sqlx::query("SELECT * FROM notifications WHERE receiver_id = $1 AND status = $2")
            .bind(receiver_id)
            .bind(Self::enum_to_text(&status)?)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Notification {
                    id: row.try_get("id")?,
                    receiver_id: row.try_get("receiver_id")?,
                    content: row.try_get("content")?,
                    level: Self::enum_from_text(row.try_get::<String, _>("level")?.as_str())?,
                    status: Self::enum_from_text(row.try_get::<String, _>("status")?.as_str())?,
                    association: row.try_get::<Json<_>, _>("association")?.0,
                })
            })
            .collect()
    }
}

#[async_trait]
impl NotificationWriter for PostgresStore {
    async fn create_notification(&self, notification: &Notification) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO notifications (id, receiver_id, content, level, status, association)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(notification.id)
        .bind(notification.receiver_id)
        .bind(&notification.content)
        .bind(Self::enum_to_text(&notification.level)?)
        .bind(Self::enum_to_text(&notification.status)?)
        .bind(Json(&notification.association))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_notification_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
    ) -> StoreResult<()> {
        self.update_by_id(
            "notifications",
            id,
            vec![("status", ColumnValue::Text(Self::enum_to_text(&status)?))],
        )
        .await
    }
}

#[async_trait]
impl EnvironmentReader for PostgresStore {
    async fn environment_by_hash(
        &self,
        hash: Uuid,
    ) -> StoreResult<Option<ExecutionEnvironment>> {
        let row = sqlx::query("SELECT * FROM execution_environments WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(ExecutionEnvironment {
                id: row.try_get("id")?,
                python_version: row.try_get("python_version")?,
                dependencies: row.try_get::<Json<_>, _>("dependencies")?.0,
                hash: row.try_get("hash")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl EnvironmentWriter for PostgresStore {
    async fn create_environment(&self, env: &ExecutionEnvironment) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO execution_environments (id, python_version, dependencies, hash)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (hash) DO NOTHING",
        )
        .bind(env.id)
        .bind(&env.python_version)
        .bind(Json(&env.dependencies))
        .bind(env.hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_unreferenced_environments(&self) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM execution_environments
            WHERE id NOT IN (
                SELECT execution_environment_id FROM operators
                WHERE execution_environment_id IS NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StorageMigrationReader for PostgresStore {
    async fn current_storage_migration(&self) -> StoreResult<Option<StorageMigration>> {
        let row = sqlx::query("SELECT * FROM storage_migrations WHERE current")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(StorageMigration {
                id: row.try_get("id")?,
                dest_resource_id: row.try_get("dest_resource_id")?,
                exec_state: row.try_get::<Json<_>, _>("exec_state")?.0,
                current: row.try_get("current")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl StorageMigrationWriter for PostgresStore {
    async fn create_storage_migration(&self, migration: &StorageMigration) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO storage_migrations (id, dest_resource_id, exec_state, current, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(migration.id)
        .bind(migration.dest_resource_id)
        .bind(Json(&migration.exec_state))
        .bind(migration.current)
        .bind(migration.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_current_storage_migration(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE storage_migrations SET current = FALSE WHERE current")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE storage_migrations SET current = TRUE WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
