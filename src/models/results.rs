//! Per-run result rows and the worker-written metadata blob formats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::artifact::ArtifactType;
use super::execution_state::ExecutionState;

/// One run of a DAG. Created per invocation, mutated as the run progresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagResult {
    pub id: Uuid,
    pub dag_id: Uuid,
    pub exec_state: ExecutionState,
    pub created_at: DateTime<Utc>,
}

/// Terminal record for one operator within a DAG run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorResult {
    pub id: Uuid,
    pub dag_result_id: Uuid,
    pub operator_id: Uuid,
    pub exec_state: ExecutionState,
}

/// How the worker serialized an artifact payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationType {
    String,
    Json,
    Table,
    Bytes,
    Image,
    Pickle,
}

/// Schema and system metrics the worker attaches to an artifact result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactResultMetadata {
    /// Column name -> column type, for table artifacts.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub schema: BTreeMap<String, String>,
    /// Runtime/memory measurements captured by the worker.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub system_metrics: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serialization_type: Option<SerializationType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<ArtifactType>,
}

/// Record for one artifact produced within a DAG run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactResult {
    pub id: Uuid,
    pub dag_result_id: Uuid,
    pub artifact_id: Uuid,
    /// Storage path of the payload blob.
    pub content_path: String,
    pub exec_state: ExecutionState,
    #[serde(default)]
    pub metadata: ArtifactResultMetadata,
}

/// Blob the worker writes at the operator metadata path when it terminates.
/// Its stored execution state overrides whatever the job manager reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorResultMetadata {
    pub exec_state: ExecutionState,
    /// Per-output artifact metadata, keyed by artifact id.
    #[serde(default)]
    pub artifact_metadata: BTreeMap<Uuid, ArtifactResultMetadata>,
}
