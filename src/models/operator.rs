//! Operator node value objects and the typed operator spec union.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::dag::EngineConfig;

/// Severity of a check operator. Error-severity failures stop the DAG,
/// warning-severity failures surface as UserNonFatal and let it continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSeverity {
    Warning,
    Error,
}

/// Granularity for extract/load relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalParams {
    pub resource_id: Uuid,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadParams {
    pub resource_id: Uuid,
    pub table: String,
    pub update_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParams {
    /// Storage path of the zipped user function.
    pub storage_path: String,
    pub entry_point: Option<String>,
    pub language: String,
}

/// Typed spec for an operator node. Exactly one variant per operator; the
/// tag is carried in the serialized form so persisted specs stay
/// self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorSpec {
    Extract(RelationalParams),
    Load(LoadParams),
    Function(FunctionParams),
    Metric(FunctionParams),
    Check {
        #[serde(flatten)]
        function: FunctionParams,
        severity: CheckSeverity,
    },
    Param {
        value: Value,
        serialization_type: String,
    },
    SystemMetric {
        metric_name: String,
    },
}

impl OperatorSpec {
    pub fn is_check(&self) -> bool {
        matches!(self, OperatorSpec::Check { .. })
    }

    pub fn is_param(&self) -> bool {
        matches!(self, OperatorSpec::Param { .. })
    }

    pub fn check_severity(&self) -> Option<CheckSeverity> {
        match self {
            OperatorSpec::Check { severity, .. } => Some(*severity),
            _ => None,
        }
    }

    /// The resource this operator reads from or writes to, if any.
    pub fn resource_id(&self) -> Option<Uuid> {
        match self {
            OperatorSpec::Extract(params) => Some(params.resource_id),
            OperatorSpec::Load(params) => Some(params.resource_id),
            _ => None,
        }
    }

    /// Literal value for param operators, used in artifact signatures.
    pub fn param_value(&self) -> Option<&Value> {
        match self {
            OperatorSpec::Param { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// An operator node within a DAG. Immutable once the DAG is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub spec: OperatorSpec,
    /// Per-operator engine override; None means the DAG's engine applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_config: Option<EngineConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_environment_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_tag_round_trip() {
        let spec = OperatorSpec::Check {
            function: FunctionParams {
                storage_path: "function-abc".to_string(),
                entry_point: None,
                language: "python".to_string(),
            },
            severity: CheckSeverity::Warning,
        };
        let raw = serde_json::to_value(&spec).unwrap();
        assert_eq!(raw["type"], "check");
        let back: OperatorSpec = serde_json::from_value(raw).unwrap();
        assert_eq!(spec, back);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let raw = serde_json::json!({ "type": "teleport", "value": 1 });
        assert!(serde_json::from_value::<OperatorSpec>(raw).is_err());
    }
}
