//! Typed job specs and the wire contract to workers.
//!
//! A spec is serialized to JSON, base64-encoded, and handed to the worker in
//! the `JOB_SPEC` environment variable (or as the single positional argument
//! on backends without env control). The worker writes its terminal execution
//! state to `metadata_path` and, per output artifact, a content blob and a
//! metadata blob at the paths carried in the spec.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{CheckSeverity, StorageConfig};

/// Environment variable carrying the encoded spec.
pub const JOB_SPEC_ENV: &str = "JOB_SPEC";

/// Fields shared by every spec variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobBase {
    /// Backend-unique job name.
    pub name: String,
    pub storage_config: StorageConfig,
    /// Where the worker writes its terminal execution state.
    pub metadata_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionJobSpec {
    #[serde(flatten)]
    pub base: JobBase,
    /// Storage path of the zipped user function.
    pub function_path: String,
    pub entry_point: Option<String>,
    pub input_content_paths: Vec<String>,
    pub input_metadata_paths: Vec<String>,
    pub output_content_paths: Vec<String>,
    pub output_metadata_paths: Vec<String>,
    /// Set for check operators; the worker downgrades failures to warnings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_severity: Option<CheckSeverity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamJobSpec {
    #[serde(flatten)]
    pub base: JobBase,
    pub value: Value,
    pub serialization_type: String,
    pub output_content_path: String,
    pub output_metadata_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricJobSpec {
    #[serde(flatten)]
    pub base: JobBase,
    pub metric_name: String,
    /// Metadata blobs of the upstream operators the metric is computed over.
    pub input_metadata_paths: Vec<String>,
    pub output_content_path: String,
    pub output_metadata_path: String,
}

/// Connector jobs share the resource credentials map; the worker-side
/// connector interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractJobSpec {
    #[serde(flatten)]
    pub base: JobBase,
    pub service: String,
    pub config: BTreeMap<String, String>,
    pub query: String,
    /// Parameters expanded into the query, in arg order.
    pub input_param_names: Vec<String>,
    pub input_content_paths: Vec<String>,
    pub output_content_path: String,
    pub output_metadata_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadJobSpec {
    #[serde(flatten)]
    pub base: JobBase,
    pub service: String,
    pub config: BTreeMap<String, String>,
    pub table: String,
    pub update_mode: String,
    pub input_content_path: String,
    pub input_metadata_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTableJobSpec {
    #[serde(flatten)]
    pub base: JobBase,
    pub service: String,
    pub config: BTreeMap<String, String>,
    /// Local CSV to upload, used by demo-data seeding.
    pub csv_path: String,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverJobSpec {
    #[serde(flatten)]
    pub base: JobBase,
    pub service: String,
    pub config: BTreeMap<String, String>,
    pub output_content_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticateJobSpec {
    #[serde(flatten)]
    pub base: JobBase,
    pub service: String,
    pub config: BTreeMap<String, String>,
}

/// Legacy whole-DAG path: an executor binary drives the run end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowJobSpec {
    #[serde(flatten)]
    pub base: JobBase,
    pub workflow_id: Uuid,
    pub dag_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRetentionJobSpec {
    #[serde(flatten)]
    pub base: JobBase,
    pub workflow_id: Uuid,
    pub kept_latest_runs: i64,
}

/// Closed union of everything a backend can run. The tag rides in the
/// serialized form, so a worker can dispatch without out-of-band context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSpec {
    Workflow(WorkflowJobSpec),
    Function(FunctionJobSpec),
    Param(ParamJobSpec),
    SystemMetric(SystemMetricJobSpec),
    Authenticate(AuthenticateJobSpec),
    Extract(ExtractJobSpec),
    Load(LoadJobSpec),
    LoadTable(LoadTableJobSpec),
    Discover(DiscoverJobSpec),
    WorkflowRetention(WorkflowRetentionJobSpec),
}

impl JobSpec {
    pub fn base(&self) -> &JobBase {
        match self {
            JobSpec::Workflow(spec) => &spec.base,
            JobSpec::Function(spec) => &spec.base,
            JobSpec::Param(spec) => &spec.base,
            JobSpec::SystemMetric(spec) => &spec.base,
            JobSpec::Authenticate(spec) => &spec.base,
            JobSpec::Extract(spec) => &spec.base,
            JobSpec::Load(spec) => &spec.base,
            JobSpec::LoadTable(spec) => &spec.base,
            JobSpec::Discover(spec) => &spec.base,
            JobSpec::WorkflowRetention(spec) => &spec.base,
        }
    }

    fn base_mut(&mut self) -> &mut JobBase {
        match self {
            JobSpec::Workflow(spec) => &mut spec.base,
            JobSpec::Function(spec) => &mut spec.base,
            JobSpec::Param(spec) => &mut spec.base,
            JobSpec::SystemMetric(spec) => &mut spec.base,
            JobSpec::Authenticate(spec) => &mut spec.base,
            JobSpec::Extract(spec) => &mut spec.base,
            JobSpec::Load(spec) => &mut spec.base,
            JobSpec::LoadTable(spec) => &mut spec.base,
            JobSpec::Discover(spec) => &mut spec.base,
            JobSpec::WorkflowRetention(spec) => &mut spec.base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    /// Short tag used for image/module lookup tables.
    pub fn kind(&self) -> &'static str {
        match self {
            JobSpec::Workflow(_) => "workflow",
            JobSpec::Function(_) => "function",
            JobSpec::Param(_) => "param",
            JobSpec::SystemMetric(_) => "system_metric",
            JobSpec::Authenticate(_) => "authenticate",
            JobSpec::Extract(_) => "extract",
            JobSpec::Load(_) => "load",
            JobSpec::LoadTable(_) => "load_table",
            JobSpec::Discover(_) => "discover",
            JobSpec::WorkflowRetention(_) => "workflow_retention",
        }
    }

    /// Inject S3 access keys into the embedded storage config so the worker
    /// can reach its blobs without a separate credential exchange.
    pub fn inject_aws_credentials(&mut self, key_id: &str, secret: &str) {
        if let StorageConfig::S3 {
            access_key_id,
            secret_access_key,
            ..
        } = &mut self.base_mut().storage_config
        {
            *access_key_id = Some(key_id.to_string());
            *secret_access_key = Some(secret.to_string());
        }
    }

    /// Base64 over the JSON form, the shape workers expect in `JOB_SPEC`.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(encoded: &str) -> Result<Self, String> {
        let raw = BASE64
            .decode(encoded)
            .map_err(|err| format!("invalid base64 job spec: {err}"))?;
        serde_json::from_slice(&raw).map_err(|err| format!("invalid job spec json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param_spec() -> JobSpec {
        JobSpec::Param(ParamJobSpec {
            base: JobBase {
                name: "param-abc".to_string(),
                storage_config: StorageConfig::S3 {
                    region: "us-east-1".to_string(),
                    bucket: "blobs".to_string(),
                    root_dir: String::new(),
                    access_key_id: None,
                    secret_access_key: None,
                },
                metadata_path: "operator-metadata-abc".to_string(),
            },
            value: serde_json::json!(42),
            serialization_type: "json".to_string(),
            output_content_path: "content-abc".to_string(),
            output_metadata_path: "metadata-abc".to_string(),
        })
    }

    #[test]
    fn encode_decode_round_trip() {
        let spec = param_spec();
        let encoded = spec.encode().unwrap();
        let decoded = JobSpec::decode(&encoded).unwrap();
        assert_eq!(spec, decoded);
    }

    #[test]
    fn tag_rides_in_serialized_form() {
        let raw = serde_json::to_value(param_spec()).unwrap();
        assert_eq!(raw["type"], "param");
        assert_eq!(raw["name"], "param-abc");
    }

    #[test]
    fn aws_credentials_injected_into_s3_config() {
        let mut spec = param_spec();
        spec.inject_aws_credentials("AKID", "SECRET");
        match &spec.base().storage_config {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => {
                assert_eq!(access_key_id.as_deref(), Some("AKID"));
                assert_eq!(secret_access_key.as_deref(), Some("SECRET"));
            }
            other => panic!("unexpected storage config: {other:?}"),
        }
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(JobSpec::decode("not-base64!").is_err());
        let bogus = BASE64.encode(br#"{"type":"teleport"}"#);
        assert!(JobSpec::decode(&bogus).is_err());
    }
}
