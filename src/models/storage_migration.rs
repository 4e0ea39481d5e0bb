//! Records for org-wide storage migrations. At most one row is `current`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::execution_state::ExecutionState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageMigration {
    pub id: Uuid,
    /// Resource describing the destination store. None when migrating back
    /// to the built-in local store.
    pub dest_resource_id: Option<Uuid>,
    pub exec_state: ExecutionState,
    pub current: bool,
    pub created_at: DateTime<Utc>,
}
