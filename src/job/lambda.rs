//! AWS Lambda backend.
//!
//! Launch performs an asynchronous ("Event") invoke of the function mapped
//! to the spec kind, passing the encoded spec in the invocation payload.
//! Lambda gives us no job handle to poll afterwards, so `poll` returns
//! `Noop` and the engine falls back to reading the metadata blob the worker
//! writes.

use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::models::ExecutionStatus;
use crate::storage::sigv4::{self, AwsCredentials};

use super::spec::JobSpec;
use super::{JobError, JobManager, JobResult};

/// Lambda function per spec kind. Deployed alongside the engine under the
/// configured role.
fn function_for(spec: &JobSpec) -> &'static str {
    match spec {
        JobSpec::Workflow(_) | JobSpec::WorkflowRetention(_) => "aqueduct-executor",
        JobSpec::Function(_) | JobSpec::Param(_) | JobSpec::SystemMetric(_) => {
            "aqueduct-function"
        }
        JobSpec::Authenticate(_)
        | JobSpec::Extract(_)
        | JobSpec::Load(_)
        | JobSpec::LoadTable(_)
        | JobSpec::Discover(_) => "aqueduct-connector",
    }
}

pub struct LambdaJobManager {
    client: reqwest::Client,
    #[allow(dead_code)]
    role_arn: String,
    region: String,
}

impl LambdaJobManager {
    pub fn new(role_arn: String, region: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            role_arn,
            region,
        }
    }

    fn credentials(&self) -> JobResult<AwsCredentials> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| JobError::System("AWS_ACCESS_KEY_ID is not set".to_string()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| JobError::System("AWS_SECRET_ACCESS_KEY is not set".to_string()))?;
        Ok(AwsCredentials {
            access_key_id,
            secret_access_key,
        })
    }
}

#[async_trait::async_trait]
impl JobManager for LambdaJobManager {
    async fn launch(&self, spec: &JobSpec) -> JobResult<()> {
        let encoded = spec
            .encode()
            .map_err(|err| JobError::System(format!("failed to serialize job spec: {err}")))?;
        let payload = serde_json::to_vec(&json!({ "job_spec": encoded }))
            .map_err(|err| JobError::System(err.to_string()))?;

        let url = format!(
            "https://lambda.{}.amazonaws.com/2015-03-31/functions/{}/invocations",
            self.region,
            function_for(spec),
        );
        let url: reqwest::Url = url
            .parse()
            .map_err(|err| JobError::System(format!("invalid lambda url: {err}")))?;
        let credentials = self.credentials()?;
        let headers = sigv4::sign(
            "POST",
            &url,
            &self.region,
            "lambda",
            &payload,
            &credentials,
            Utc::now(),
        );

        let mut request = self
            .client
            .post(url)
            .header("X-Amz-Invocation-Type", "Event")
            .body(payload);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::System(format!(
                "lambda invoke returned {status}: {body}"
            )));
        }
        info!(job = spec.name(), "invoked lambda function");
        Ok(())
    }

    /// Fire-and-forget invokes cannot be introspected; outcome comes from
    /// the metadata blob.
    async fn poll(&self, _name: &str) -> JobResult<ExecutionStatus> {
        Err(JobError::Noop)
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
