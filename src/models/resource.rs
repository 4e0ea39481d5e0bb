//! Registered external-system resources (databases, buckets, compute).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Credentials to a single external system, owned by an org and optionally
/// scoped to one user. The config map is opaque to the engine; connector
/// code interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub org_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Service kind, e.g. "postgres", "s3", "airflow".
    pub service: String,
    pub name: String,
    pub config: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}
