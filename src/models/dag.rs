//! DAG row, edges, and the engine/storage config unions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a DAG's blobs live. Chosen at registration and immutable for the
/// lifetime of the DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    File {
        directory: String,
    },
    S3 {
        region: String,
        bucket: String,
        /// Optional key prefix inside the bucket.
        #[serde(default)]
        root_dir: String,
        /// Injected at job launch so workers can reach the bucket without a
        /// separate credential exchange.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_key_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_access_key: Option<String>,
    },
    Gcs {
        bucket: String,
        /// OAuth bearer token for the JSON API.
        access_token: String,
    },
}

/// Which backend runs operators. A DAG carries one of these; an operator may
/// override it. Backend-specific fields live here and nowhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineConfig {
    /// The built-in process pool.
    Aqueduct {},
    /// External workflow scheduler; the engine only reconciles state.
    Airflow {
        host: String,
        username: String,
        password: String,
        /// Storage path prefix recorded for each artifact; the remote run id
        /// is appended at read time.
        #[serde(default)]
        operator_metadata_prefix: String,
    },
    Kubernetes {
        kubeconfig_path: String,
        cluster_name: String,
        #[serde(default)]
        use_same_cluster: bool,
    },
    Lambda {
        role_arn: String,
        region: String,
    },
    Databricks {
        workspace_url: String,
        access_token: String,
        s3_instance_profile_arn: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instance_pool_id: Option<String>,
    },
    Spark {
        livy_server_url: String,
    },
}

impl EngineConfig {
    /// Engines that own their own scheduling; the local engine never drives
    /// execution for these.
    pub fn is_self_orchestrated(&self) -> bool {
        matches!(self, EngineConfig::Airflow { .. })
    }

    /// Stable name used for engine-type filters in persistence queries.
    pub fn engine_type(&self) -> &'static str {
        match self {
            EngineConfig::Aqueduct {} => "aqueduct",
            EngineConfig::Airflow { .. } => "airflow",
            EngineConfig::Kubernetes { .. } => "k8s",
            EngineConfig::Lambda { .. } => "lambda",
            EngineConfig::Databricks { .. } => "databricks",
            EngineConfig::Spark { .. } => "spark",
        }
    }
}

/// Which direction a DAG edge points. The graph is bipartite: operators only
/// connect to artifacts and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    OperatorToArtifact,
    ArtifactToOperator,
}

/// An edge within a committed DAG. `idx` is the argument position for
/// artifact-to-operator edges and the output position otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagEdge {
    pub dag_id: Uuid,
    pub kind: EdgeKind,
    pub from_id: Uuid,
    pub to_id: Uuid,
    pub idx: i16,
}

/// A committed, immutable DAG revision. Workflow edits create a new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub storage_config: StorageConfig,
    pub engine_config: EngineConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_tags() {
        let config = EngineConfig::Airflow {
            host: "http://airflow:8080".to_string(),
            username: "svc".to_string(),
            password: "secret".to_string(),
            operator_metadata_prefix: String::new(),
        };
        assert!(config.is_self_orchestrated());
        assert_eq!(config.engine_type(), "airflow");
        let raw = serde_json::to_value(&config).unwrap();
        assert_eq!(raw["type"], "airflow");
    }

    #[test]
    fn process_engine_is_not_self_orchestrated() {
        assert!(!EngineConfig::Aqueduct {}.is_self_orchestrated());
    }
}
