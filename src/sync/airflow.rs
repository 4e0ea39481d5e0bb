//! Airflow REST client (stable API v1) used by the reconciliation loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::ExecutionStatus;

use super::{RemoteDagRun, RemoteRunState, RemoteScheduler, SyncError};

pub struct AirflowClient {
    client: reqwest::Client,
    host: String,
    username: String,
    password: String,
}

impl AirflowClient {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        let response = self
            .client
            .get(format!("{}/api/v1/{path}", self.host))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|err| SyncError::Remote(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SyncError::Remote(format!(
                "airflow returned {} for {path}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| SyncError::Remote(err.to_string()))
    }
}

#[derive(Deserialize)]
struct DagRunsResponse {
    dag_runs: Vec<DagRunEntry>,
}

#[derive(Deserialize)]
struct DagRunEntry {
    dag_run_id: String,
    state: String,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct TaskInstanceResponse {
    state: Option<String>,
}

#[async_trait]
impl RemoteScheduler for AirflowClient {
    async fn dag_runs_since(
        &self,
        remote_dag_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteDagRun>, SyncError> {
        let response: DagRunsResponse = self
            .get_json(&format!(
                "dags/{remote_dag_id}/dagRuns?start_date_gte={}",
                since.to_rfc3339()
            ))
            .await?;
        Ok(response
            .dag_runs
            .into_iter()
            .map(|entry| RemoteDagRun {
                state: match entry.state.as_str() {
                    "success" => RemoteRunState::Succeeded,
                    "failed" => RemoteRunState::Failed,
                    _ => RemoteRunState::Running,
                },
                started_at: entry.start_date.unwrap_or_else(Utc::now),
                finished_at: entry.end_date,
                run_id: entry.dag_run_id,
            })
            .collect())
    }

    async fn task_status(
        &self,
        remote_dag_id: &str,
        run_id: &str,
        task_id: &str,
    ) -> Result<ExecutionStatus, SyncError> {
        let response: TaskInstanceResponse = self
            .get_json(&format!(
                "dags/{remote_dag_id}/dagRuns/{run_id}/taskInstances/{task_id}"
            ))
            .await?;
        Ok(match response.state.as_deref() {
            Some("success") => ExecutionStatus::Succeeded,
            Some("failed") | Some("upstream_failed") => ExecutionStatus::Failed,
            Some("skipped") | Some("removed") => ExecutionStatus::Canceled,
            Some("running") => ExecutionStatus::Running,
            Some("queued") | Some("scheduled") => ExecutionStatus::Pending,
            _ => ExecutionStatus::Unknown,
        })
    }
}
