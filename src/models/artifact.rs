//! Artifact node value objects.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared type of the value flowing through an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Untyped,
    String,
    Bool,
    Numeric,
    Dict,
    Tuple,
    List,
    Table,
    Json,
    Image,
    Bytes,
    Picklable,
}

impl Default for ArtifactType {
    fn default() -> Self {
        ArtifactType::Untyped
    }
}

/// An artifact node within a DAG. Immutable once the DAG is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub artifact_type: ArtifactType,
}
