//! Shared fixtures for integration tests: a DAG builder over the in-memory
//! store and storage backends.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use aqueduct::dag::WorkflowDag;
use aqueduct::db::{DagWriter, FullDag, MemoryStore, MetadataStore, UserWriter, WorkflowWriter};
use aqueduct::models::{
    Artifact, ArtifactType, CheckSeverity, Dag, DagEdge, EdgeKind, EngineConfig, FunctionParams,
    LoadParams, NotificationSettings, Operator, OperatorSpec, RetentionPolicy, Schedule,
    StorageConfig, User, Workflow,
};

pub struct DagFixture {
    pub workflow_id: Uuid,
    pub dag_id: Uuid,
    pub engine_config: EngineConfig,
    pub storage_config: StorageConfig,
    operators: Vec<Operator>,
    artifacts: Vec<Artifact>,
    edges: Vec<DagEdge>,
}

impl DagFixture {
    pub fn new() -> Self {
        Self {
            workflow_id: Uuid::new_v4(),
            dag_id: Uuid::new_v4(),
            engine_config: EngineConfig::Aqueduct {},
            storage_config: StorageConfig::File {
                directory: "/tmp/aqueduct-test".to_string(),
            },
            operators: Vec::new(),
            artifacts: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_engine(mut self, engine_config: EngineConfig) -> Self {
        self.engine_config = engine_config;
        self
    }

    pub fn set_storage(&mut self, storage_config: StorageConfig) {
        self.storage_config = storage_config;
    }

    fn push_operator(&mut self, name: &str, spec: OperatorSpec) -> Uuid {
        let id = Uuid::new_v4();
        self.operators.push(Operator {
            id,
            name: name.to_string(),
            description: String::new(),
            spec,
            engine_config: None,
            execution_environment_id: None,
        });
        id
    }

    pub fn function(&mut self, name: &str) -> Uuid {
        self.push_operator(
            name,
            OperatorSpec::Function(FunctionParams {
                storage_path: format!("function-{name}"),
                entry_point: None,
                language: "python".to_string(),
            }),
        )
    }

    pub fn param(&mut self, name: &str, value: serde_json::Value) -> Uuid {
        self.push_operator(
            name,
            OperatorSpec::Param {
                value,
                serialization_type: "json".to_string(),
            },
        )
    }

    pub fn check(&mut self, name: &str, severity: CheckSeverity) -> Uuid {
        self.push_operator(
            name,
            OperatorSpec::Check {
                function: FunctionParams {
                    storage_path: format!("function-{name}"),
                    entry_point: None,
                    language: "python".to_string(),
                },
                severity,
            },
        )
    }

    pub fn load(&mut self, name: &str, resource_id: Uuid) -> Uuid {
        self.push_operator(
            name,
            OperatorSpec::Load(LoadParams {
                resource_id,
                table: "output".to_string(),
                update_mode: "replace".to_string(),
            }),
        )
    }

    pub fn artifact(&mut self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.artifacts.push(Artifact {
            id,
            name: name.to_string(),
            description: String::new(),
            artifact_type: ArtifactType::Untyped,
        });
        id
    }

    /// Wire `operator --(idx)--> artifact`.
    pub fn produces(&mut self, operator_id: Uuid, artifact_id: Uuid, idx: i16) {
        self.edges.push(DagEdge {
            dag_id: self.dag_id,
            kind: EdgeKind::OperatorToArtifact,
            from_id: operator_id,
            to_id: artifact_id,
            idx,
        });
    }

    /// Wire `artifact --(idx)--> operator`.
    pub fn consumes(&mut self, artifact_id: Uuid, operator_id: Uuid, idx: i16) {
        self.edges.push(DagEdge {
            dag_id: self.dag_id,
            kind: EdgeKind::ArtifactToOperator,
            from_id: artifact_id,
            to_id: operator_id,
            idx,
        });
    }

    /// `op --> new artifact` shorthand; returns the artifact id.
    pub fn output_of(&mut self, operator_id: Uuid, name: &str) -> Uuid {
        let artifact_id = self.artifact(name);
        self.produces(operator_id, artifact_id, 0);
        artifact_id
    }

    pub fn meta(&self) -> Dag {
        Dag {
            id: self.dag_id,
            workflow_id: self.workflow_id,
            created_at: Utc::now(),
            storage_config: self.storage_config.clone(),
            engine_config: self.engine_config.clone(),
        }
    }

    pub fn build(&self) -> WorkflowDag {
        WorkflowDag::new(
            self.meta(),
            self.operators.clone(),
            self.artifacts.clone(),
            self.edges.clone(),
        )
        .expect("fixture DAG must validate")
    }

    /// Persist the owning user, workflow, and DAG revision.
    pub async fn seed(&self, store: &MemoryStore) -> Workflow {
        let user = User {
            id: Uuid::new_v4(),
            org_id: "test-org".to_string(),
            email: "owner@example.com".to_string(),
            role: "admin".to_string(),
            api_key: "key".to_string(),
            external_auth_id: None,
        };
        store.create_user(&user).await.unwrap();

        let workflow = Workflow {
            id: self.workflow_id,
            user_id: user.id,
            name: "test-workflow".to_string(),
            description: String::new(),
            schedule: Schedule::manual(),
            retention_policy: RetentionPolicy::default(),
            notification_settings: NotificationSettings::default(),
        };
        store.create_workflow(&workflow).await.unwrap();

        store
            .create_dag(&FullDag {
                dag: self.meta(),
                operators: self.operators.clone(),
                artifacts: self.artifacts.clone(),
                edges: self.edges.clone(),
            })
            .await
            .unwrap();
        workflow
    }
}

pub fn engine(store: &Arc<MemoryStore>) -> aqueduct::Engine {
    let timeouts = aqueduct::EngineTimeouts {
        exec_timeout: std::time::Duration::from_secs(30),
        cleanup_timeout: std::time::Duration::from_secs(5),
        poll_interval: std::time::Duration::from_millis(5),
    };
    aqueduct::Engine::new(
        Arc::clone(store) as Arc<dyn MetadataStore>,
        Arc::new(aqueduct::engine::PreviewCache::new()),
        timeouts,
    )
}
