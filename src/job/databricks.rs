//! Databricks backend.
//!
//! Each launch creates a Jobs API 2.1 job and immediately runs it, keeping
//! the returned run-id keyed by job name for polling. Whole DAGs can also be
//! shipped as one multi-task job whose `depends_on` edges mirror the DAG's
//! operator-parent relation, delegating intra-DAG scheduling to the cluster.

use std::collections::HashMap;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;

use crate::models::ExecutionStatus;

use super::spec::{JobSpec, JOB_SPEC_ENV};
use super::{JobError, JobManager, JobResult};

const WORKER_SCRIPT: &str = "dbfs:/aqueduct/operator_entry.py";

/// One task inside a multi-task launch: a spec plus the names of the tasks
/// it depends on.
#[derive(Debug, Clone)]
pub struct DatabricksTask {
    pub spec: JobSpec,
    pub depends_on: Vec<String>,
}

pub struct DatabricksJobManager {
    client: reqwest::Client,
    workspace_url: String,
    access_token: String,
    s3_instance_profile_arn: String,
    instance_pool_id: Option<String>,
    /// Job name -> active run id.
    run_ids: Mutex<HashMap<String, i64>>,
}

impl DatabricksJobManager {
    pub fn new(
        workspace_url: String,
        access_token: String,
        s3_instance_profile_arn: String,
        instance_pool_id: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            workspace_url: workspace_url.trim_end_matches('/').to_string(),
            access_token,
            s3_instance_profile_arn,
            instance_pool_id,
            run_ids: Mutex::new(HashMap::new()),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/2.1/jobs/{path}", self.workspace_url)
    }

    fn cluster_settings(&self) -> Value {
        match &self.instance_pool_id {
            Some(pool) => json!({
                "instance_pool_id": pool,
                "spark_version": "11.3.x-scala2.12",
                "num_workers": 1,
            }),
            None => json!({
                "spark_version": "11.3.x-scala2.12",
                "node_type_id": "i3.xlarge",
                "num_workers": 1,
                "aws_attributes": {
                    "instance_profile_arn": self.s3_instance_profile_arn,
                },
            }),
        }
    }

    /// Task entry for the job settings payload. The worker script decodes
    /// the spec from its single positional parameter.
    fn task_settings(&self, spec: &JobSpec, depends_on: &[String]) -> JobResult<Value> {
        let encoded = spec
            .encode()
            .map_err(|err| JobError::System(format!("failed to serialize job spec: {err}")))?;
        let mut task = json!({
            "task_key": spec.name(),
            "spark_python_task": {
                "python_file": WORKER_SCRIPT,
                "parameters": [encoded],
            },
            "new_cluster": self.cluster_settings(),
            "spark_env_vars": { JOB_SPEC_ENV: encoded },
        });
        if !depends_on.is_empty() {
            task["depends_on"] = depends_on
                .iter()
                .map(|key| json!({ "task_key": key }))
                .collect();
        }
        Ok(task)
    }

    async fn create_and_run(&self, name: &str, tasks: Vec<Value>) -> JobResult<()> {
        let settings = json!({ "name": name, "tasks": tasks });
        let response = self
            .client
            .post(self.api("create"))
            .bearer_auth(&self.access_token)
            .json(&settings)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::System(format!(
                "databricks job creation returned {status}: {body}"
            )));
        }
        let body: Value = response.json().await?;
        let job_id = body["job_id"]
            .as_i64()
            .ok_or_else(|| JobError::System("job creation response had no job_id".to_string()))?;

        let response = self
            .client
            .post(self.api("run-now"))
            .bearer_auth(&self.access_token)
            .json(&json!({ "job_id": job_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(JobError::System(format!(
                "databricks run-now returned {}",
                response.status()
            )));
        }
        let body: Value = response.json().await?;
        let run_id = body["run_id"]
            .as_i64()
            .ok_or_else(|| JobError::System("run-now response had no run_id".to_string()))?;

        self.run_ids.lock().await.insert(name.to_string(), run_id);
        info!(job = name, run_id, "started databricks run");
        Ok(())
    }

    /// Ship a whole DAG as one multi-task job.
    pub async fn launch_multi_task(&self, name: &str, tasks: &[DatabricksTask]) -> JobResult<()> {
        let settings = tasks
            .iter()
            .map(|task| self.task_settings(&task.spec, &task.depends_on))
            .collect::<JobResult<Vec<_>>>()?;
        self.create_and_run(name, settings).await
    }
}

#[async_trait::async_trait]
impl JobManager for DatabricksJobManager {
    async fn launch(&self, spec: &JobSpec) -> JobResult<()> {
        let task = self.task_settings(spec, &[])?;
        self.create_and_run(spec.name(), vec![task]).await
    }

    async fn poll(&self, name: &str) -> JobResult<ExecutionStatus> {
        let run_id = {
            let run_ids = self.run_ids.lock().await;
            *run_ids
                .get(name)
                .ok_or_else(|| JobError::JobMissing(name.to_string()))?
        };
        let response = self
            .client
            .get(self.api(&format!("runs/get?run_id={run_id}")))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(JobError::System(format!(
                "databricks run status returned {}",
                response.status()
            )));
        }
        let body: Value = response.json().await?;
        let life_cycle = body["state"]["life_cycle_state"].as_str().unwrap_or("");
        match life_cycle {
            "PENDING" | "RUNNING" | "TERMINATING" => Ok(ExecutionStatus::Pending),
            "TERMINATED" => {
                if body["state"]["result_state"].as_str() == Some("SUCCESS") {
                    Ok(ExecutionStatus::Succeeded)
                } else {
                    Ok(ExecutionStatus::Failed)
                }
            }
            _ => Ok(ExecutionStatus::Failed),
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

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::job::spec::{JobBase, ParamJobSpec};
    use crate::models::StorageConfig;

    fn spec(name: &str) -> JobSpec {
        JobSpec::Param(ParamJobSpec {
            base: JobBase {
                name: name.to_string(),
                storage_config: StorageConfig::File {
                    directory: "/tmp/content".to_string(),
                },
                metadata_path: format!("operator-metadata-{}", Uuid::new_v4()),
            },
            value: serde_json::json!(1),
            serialization_type: "json".to_string(),
            output_content_path: "content-a".to_string(),
            output_metadata_path: "metadata-a".to_string(),
        })
    }

    #[test]
    fn task_dependencies_become_depends_on_entries() {
        let manager = DatabricksJobManager::new(
            "https://dbc.example.com".to_string(),
            "token".to_string(),
            "arn:aws:iam::1:instance-profile/ap".to_string(),
            None,
        );
        let task = manager
            .task_settings(&spec("load-op"), &["extract-op".to_string()])
            .unwrap();
        assert_eq!(task["task_key"], "load-op");
        assert_eq!(task["depends_on"][0]["task_key"], "extract-op");

        let root = manager.task_settings(&spec("extract-op"), &[]).unwrap();
        assert!(root.get("depends_on").is_none());
    }

    #[test]
    fn pool_config_omits_instance_profile() {
        let pooled = DatabricksJobManager::new(
            "https://dbc.example.com/".to_string(),
            "token".to_string(),
            "arn".to_string(),
            Some("pool-1".to_string()),
        );
        let cluster = pooled.cluster_settings();
        assert_eq!(cluster["instance_pool_id"], "pool-1");
        assert!(cluster.get("aws_attributes").is_none());
    }
}
