//! Spark backend over an Apache Livy gateway.
//!
//! A single pyspark session is created lazily on first launch; each job then
//! submits one statement whose body is the executor template filled with the
//! base64-encoded spec. Polling reads the statement state.

use std::collections::HashMap;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;

use crate::models::ExecutionStatus;

use super::spec::JobSpec;
use super::{JobError, JobManager, JobResult};

/// Statement body submitted per job. The worker module decodes the spec and
/// runs the operator inside the session.
fn statement_code(encoded_spec: &str) -> String {
    format!(
        "from aqueduct_executor.operators.spark import entry\nentry.run(\"{encoded_spec}\")\n"
    )
}

pub struct SparkJobManager {
    client: reqwest::Client,
    livy_server_url: String,
    /// Created once, shared by every statement.
    session_id: Mutex<Option<i64>>,
    /// Job name -> statement id.
    statements: Mutex<HashMap<String, i64>>,
}

impl SparkJobManager {
    pub fn new(livy_server_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            livy_server_url: livy_server_url.trim_end_matches('/').to_string(),
            session_id: Mutex::new(None),
            statements: Mutex::new(HashMap::new()),
        }
    }

    async fn ensure_session(&self) -> JobResult<i64> {
        let mut session = self.session_id.lock().await;
        if let Some(id) = *session {
            return Ok(id);
        }
        let response = self
            .client
            .post(format!("{}/sessions", self.livy_server_url))
            .json(&json!({ "kind": "pyspark" }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(JobError::System(format!(
                "livy session creation returned {}",
                response.status()
            )));
        }
        let body: Value = response.json().await?;
        let id = body["id"]
            .as_i64()
            .ok_or_else(|| JobError::System("livy session response had no id".to_string()))?;
        info!(session = id, "created livy pyspark session");
        *session = Some(id);
        Ok(id)
    }
}

#[async_trait::async_trait]
impl JobManager for SparkJobManager {
    async fn launch(&self, spec: &JobSpec) -> JobResult<()> {
        let session = self.ensure_session().await?;
        let encoded = spec
            .encode()
            .map_err(|err| JobError::System(format!("failed to serialize job spec: {err}")))?;
        let response = self
            .client
            .post(format!(
                "{}/sessions/{session}/statements",
                self.livy_server_url
            ))
            .json(&json!({ "code": statement_code(&encoded) }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(JobError::System(format!(
                "livy statement submission returned {}",
                response.status()
            )));
        }
        let body: Value = response.json().await?;
        let statement_id = body["id"]
            .as_i64()
            .ok_or_else(|| JobError::System("livy statement response had no id".to_string()))?;
        self.statements
            .lock()
            .await
            .insert(spec.name().to_string(), statement_id);
        info!(job = spec.name(), statement = statement_id, "submitted spark statement");
        Ok(())
    }

    async fn poll(&self, name: &str) -> JobResult<ExecutionStatus> {
        let statement_id = {
            let statements = self.statements.lock().await;
            *statements
                .get(name)
                .ok_or_else(|| JobError::JobMissing(name.to_string()))?
        };
        let session = self.ensure_session().await?;
        let response = self
            .client
            .get(format!(
                "{}/sessions/{session}/statements/{statement_id}",
                self.livy_server_url
            ))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(JobError::System(format!(
                "livy statement status returned {}",
                response.status()
            )));
        }
        let body: Value = response.json().await?;
        match body["state"].as_str().unwrap_or("") {
            "waiting" | "running" => Ok(ExecutionStatus::Pending),
            "available" => {
                if body["output"]["status"].as_str() == Some("ok") {
                    Ok(ExecutionStatus::Succeeded)
                } else {
                    Ok(ExecutionStatus::Failed)
                }
            }
            "error" | "cancelling" | "cancelled" => Ok(ExecutionStatus::Failed),
            other => Err(JobError::System(format!(
                "unexpected livy statement state: {other}"
            ))),
        }
    }

    async fn deploy_cron(&self, _name: &str, _cron_expr: &str, _spec: JobSpec) -> JobResult<()> {
        Err(JobError::Noop)
    }

    async fn cron_exists(&self, _name: &str) -> bool {
        false
    }

    async fn edit_cron(&self, _name: &str, _cron_expr: &str) -> JobResult<()> {
        Err(JobError::Noop)
    }

    async fn delete_cron(&self, _name: &str) -> JobResult<()> {
        Err(JobError::Noop)
    }
}
