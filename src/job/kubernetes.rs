//! Kubernetes backend.
//!
//! Each launch becomes a batch/v1 Job with a single pod whose container
//! receives the encoded spec through `JOB_SPEC`. AWS credentials from the
//! engine's environment are materialized once as a Secret and mounted into
//! every job so workers can reach S3-backed storage.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::ExecutionStatus;

use super::spec::{JobSpec, JOB_SPEC_ENV};
use super::{JobError, JobManager, JobResult};

const NAMESPACE: &str = "aqueduct";
const AWS_SECRET_NAME: &str = "aqueduct-aws-credentials";

const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Container image per spec kind.
fn image_for(spec: &JobSpec) -> &'static str {
    match spec {
        JobSpec::Workflow(_) | JobSpec::WorkflowRetention(_) => "aqueducthq/executor",
        JobSpec::Function(_) | JobSpec::Param(_) | JobSpec::SystemMetric(_) => {
            "aqueducthq/function"
        }
        JobSpec::Authenticate(_)
        | JobSpec::Extract(_)
        | JobSpec::Load(_)
        | JobSpec::LoadTable(_)
        | JobSpec::Discover(_) => "aqueducthq/connector",
    }
}

/// The subset of a kubeconfig we need. Kubeconfigs are accepted in their
/// JSON form; `kubectl config view -o json` produces one.
#[derive(Deserialize)]
struct KubeConfigFile {
    clusters: Vec<NamedCluster>,
    users: Vec<NamedUser>,
}

#[derive(Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEndpoint,
}

#[derive(Deserialize)]
struct ClusterEndpoint {
    server: String,
    #[serde(rename = "certificate-authority-data")]
    certificate_authority_data: Option<String>,
}

#[derive(Deserialize)]
struct NamedUser {
    user: UserCredentials,
}

#[derive(Deserialize)]
struct UserCredentials {
    token: Option<String>,
}

pub struct KubernetesJobManager {
    client: reqwest::Client,
    base_url: String,
    token: String,
    /// Set once the AWS credentials Secret has been applied.
    aws_secret_ready: Arc<Mutex<bool>>,
}

impl KubernetesJobManager {
    pub fn from_kubeconfig(
        kubeconfig_path: &str,
        cluster_name: &str,
        use_same_cluster: bool,
    ) -> JobResult<Self> {
        if use_same_cluster {
            return Self::in_cluster();
        }

        let raw = std::fs::read_to_string(kubeconfig_path).map_err(|err| {
            JobError::System(format!("failed to read kubeconfig {kubeconfig_path}: {err}"))
        })?;
        let config: KubeConfigFile = serde_json::from_str(&raw).map_err(|err| {
            JobError::System(format!("failed to parse kubeconfig {kubeconfig_path}: {err}"))
        })?;

        let cluster = config
            .clusters
            .into_iter()
            .find(|c| c.name == cluster_name)
            .ok_or_else(|| {
                JobError::System(format!("cluster {cluster_name} not found in kubeconfig"))
            })?;
        let token = config
            .users
            .into_iter()
            .find_map(|u| u.user.token)
            .ok_or_else(|| {
                JobError::System("kubeconfig carries no bearer token credential".to_string())
            })?;

        let mut builder = reqwest::Client::builder();
        if let Some(ca) = cluster.cluster.certificate_authority_data {
            use base64::Engine as _;
            let pem = base64::engine::general_purpose::STANDARD
                .decode(ca)
                .map_err(|err| JobError::System(format!("invalid kubeconfig CA data: {err}")))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|err| JobError::System(format!("invalid cluster CA cert: {err}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|err| JobError::System(err.to_string()))?;

        Ok(Self {
            client,
            base_url: cluster.cluster.server,
            token,
            aws_secret_ready: Arc::new(Mutex::new(false)),
        })
    }

    /// Credentials from the pod's mounted service account.
    fn in_cluster() -> JobResult<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| JobError::System("not running inside a cluster".to_string()))?;
        let port =
            std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let token = std::fs::read_to_string(SERVICE_ACCOUNT_TOKEN)
            .map_err(|err| JobError::System(format!("failed to read service token: {err}")))?;

        let mut builder = reqwest::Client::builder();
        if let Ok(pem) = std::fs::read(SERVICE_ACCOUNT_CA) {
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|err| JobError::System(format!("invalid cluster CA cert: {err}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|err| JobError::System(err.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("https://{host}:{port}"),
            token: token.trim().to_string(),
            aws_secret_ready: Arc::new(Mutex::new(false)),
        })
    }

    fn jobs_url(&self) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{NAMESPACE}/jobs",
            self.base_url
        )
    }

    /// Apply a Secret carrying `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`
    /// from the engine's environment, once per manager.
    async fn ensure_aws_secret(&self) -> JobResult<()> {
        let mut ready = self.aws_secret_ready.lock().await;
        if *ready {
            return Ok(());
        }
        let (Ok(key_id), Ok(secret)) = (
            std::env::var("AWS_ACCESS_KEY_ID"),
            std::env::var("AWS_SECRET_ACCESS_KEY"),
        ) else {
            *ready = true;
            return Ok(());
        };

        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": AWS_SECRET_NAME, "namespace": NAMESPACE },
            "type": "Opaque",
            "stringData": {
                "AWS_ACCESS_KEY_ID": key_id,
                "AWS_SECRET_ACCESS_KEY": secret,
            },
        });
        let response = self
            .client
            .post(format!(
                "{}/api/v1/namespaces/{NAMESPACE}/secrets",
                self.base_url
            ))
            .bearer_auth(&self.token)
            .json(&manifest)
            .send()
            .await?;
        // 409 means a previous manager already applied it.
        if !response.status().is_success() && response.status().as_u16() != 409 {
            return Err(JobError::System(format!(
                "failed to create AWS credentials secret: {}",
                response.status()
            )));
        }
        *ready = true;
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobManager for KubernetesJobManager {
    async fn launch(&self, spec: &JobSpec) -> JobResult<()> {
        self.ensure_aws_secret().await?;
        let encoded = spec
            .encode()
            .map_err(|err| JobError::System(format!("failed to serialize job spec: {err}")))?;

        let manifest = json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": spec.name(), "namespace": NAMESPACE },
            "spec": {
                "backoffLimit": 0,
                "template": {
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "worker",
                            "image": image_for(spec),
                            "env": [{ "name": JOB_SPEC_ENV, "value": encoded }],
                            "envFrom": [{ "secretRef": {
                                "name": AWS_SECRET_NAME, "optional": true,
                            }}],
                        }],
                    },
                },
            },
        });

        let response = self
            .client
            .post(self.jobs_url())
            .bearer_auth(&self.token)
            .json(&manifest)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::System(format!(
                "job creation returned {status}: {body}"
            )));
        }
        info!(job = spec.name(), "created kubernetes job");
        Ok(())
    }

    async fn poll(&self, name: &str) -> JobResult<ExecutionStatus> {
        let response = self
            .client
            .get(format!("{}/{name}", self.jobs_url()))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(JobError::JobMissing(name.to_string()));
        }
        if !response.status().is_success() {
            return Err(JobError::System(format!(
                "job status request returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response.json().await?;
        let succeeded = body["status"]["succeeded"].as_i64().unwrap_or(0);
        let failed = body["status"]["failed"].as_i64().unwrap_or(0);
        if succeeded >= 1 {
            Ok(ExecutionStatus::Succeeded)
        } else if failed >= 1 {
            Ok(ExecutionStatus::Failed)
        } else {
            Ok(ExecutionStatus::Pending)
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
