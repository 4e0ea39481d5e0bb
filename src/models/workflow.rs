//! Workflow row plus its schedule, retention, and notification settings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::notification::NotificationLevel;

/// How runs of a workflow are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateTrigger {
    Manual,
    Periodic,
}

/// Workflow schedule. An empty cron expression with manual trigger is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub trigger: UpdateTrigger,
    #[serde(default)]
    pub cron_schedule: String,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub disable_manual_trigger: bool,
}

impl Schedule {
    pub fn manual() -> Self {
        Self {
            trigger: UpdateTrigger::Manual,
            cron_schedule: String::new(),
            paused: false,
            disable_manual_trigger: false,
        }
    }
}

/// How many DAG results to keep around. None keeps everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kept_latest_runs: Option<i64>,
}

/// Minimum severity at which run outcomes produce notifications.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_level: Option<NotificationLevel>,
}

/// A user-defined workflow. Owns its DAG revisions exclusively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub schedule: Schedule,
    #[serde(default)]
    pub retention_policy: RetentionPolicy,
    #[serde(default)]
    pub notification_settings: NotificationSettings,
}
