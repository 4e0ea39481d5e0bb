//! User account rows.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub org_id: String,
    pub email: String,
    pub role: String,
    pub api_key: String,
    /// Identity in the external auth provider, if federated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_auth_id: Option<String>,
}
