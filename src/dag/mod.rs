//! Validated, in-memory view of a DAG with O(1) edge lookups.
//!
//! Construction runs the full validation pass (see [`validate`]) and computes
//! deterministic artifact signatures (see [`signature`]). Execution-time
//! queries never walk the raw edge list.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::models::{Artifact, Dag, DagEdge, EdgeKind, Operator};

pub mod signature;
pub mod validate;

pub use validate::DagValidationError;

/// A committed DAG hydrated with its nodes and edges, ready for execution.
#[derive(Debug, Clone)]
pub struct WorkflowDag {
    pub meta: Dag,
    pub operators: HashMap<Uuid, Operator>,
    pub artifacts: HashMap<Uuid, Artifact>,
    pub edges: Vec<DagEdge>,

    /// operator -> input artifacts, ordered by argument position.
    op_inputs: HashMap<Uuid, Vec<Uuid>>,
    /// operator -> output artifacts, ordered by output position.
    op_outputs: HashMap<Uuid, Vec<Uuid>>,
    /// artifact -> operators consuming it.
    artifact_consumers: HashMap<Uuid, Vec<Uuid>>,
    /// artifact -> the single operator producing it.
    artifact_producer: HashMap<Uuid, Uuid>,
    /// artifact -> deterministic signature (preview cache key).
    signatures: HashMap<Uuid, Uuid>,
}

impl WorkflowDag {
    pub fn new(
        meta: Dag,
        operators: Vec<Operator>,
        artifacts: Vec<Artifact>,
        edges: Vec<DagEdge>,
    ) -> Result<Self, DagValidationError> {
        let operators: HashMap<Uuid, Operator> =
            operators.into_iter().map(|op| (op.id, op)).collect();
        let artifacts: HashMap<Uuid, Artifact> =
            artifacts.into_iter().map(|a| (a.id, a)).collect();

        let mut op_inputs: HashMap<Uuid, Vec<(i16, Uuid)>> = HashMap::new();
        let mut op_outputs: HashMap<Uuid, Vec<(i16, Uuid)>> = HashMap::new();
        let mut artifact_consumers: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let mut artifact_producer: HashMap<Uuid, Uuid> = HashMap::new();

        for edge in &edges {
            match edge.kind {
                EdgeKind::OperatorToArtifact => {
                    if artifact_producer
                        .insert(edge.to_id, edge.from_id)
                        .is_some()
                    {
                        return Err(DagValidationError::MultipleArtifactParents(edge.to_id));
                    }
                    op_outputs
                        .entry(edge.from_id)
                        .or_default()
                        .push((edge.idx, edge.to_id));
                }
                EdgeKind::ArtifactToOperator => {
                    op_inputs
                        .entry(edge.to_id)
                        .or_default()
                        .push((edge.idx, edge.from_id));
                    artifact_consumers
                        .entry(edge.from_id)
                        .or_default()
                        .push(edge.to_id);
                }
            }
        }

        let sort_by_idx = |map: HashMap<Uuid, Vec<(i16, Uuid)>>| -> HashMap<Uuid, Vec<Uuid>> {
            map.into_iter()
                .map(|(op, mut entries)| {
                    entries.sort_by_key(|(idx, _)| *idx);
                    (op, entries.into_iter().map(|(_, id)| id).collect())
                })
                .collect()
        };

        let mut dag = Self {
            meta,
            operators,
            artifacts,
            edges,
            op_inputs: sort_by_idx(op_inputs),
            op_outputs: sort_by_idx(op_outputs),
            artifact_consumers,
            artifact_producer,
            signatures: HashMap::new(),
        };

        validate::validate(&dag)?;
        dag.signatures = signature::compute_signatures(&dag);
        Ok(dag)
    }

    pub fn operator_inputs(&self, operator_id: Uuid) -> &[Uuid] {
        self.op_inputs
            .get(&operator_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn operator_outputs(&self, operator_id: Uuid) -> &[Uuid] {
        self.op_outputs
            .get(&operator_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn artifact_consumers(&self, artifact_id: Uuid) -> &[Uuid] {
        self.artifact_consumers
            .get(&artifact_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn artifact_producer(&self, artifact_id: Uuid) -> Option<Uuid> {
        self.artifact_producer.get(&artifact_id).copied()
    }

    /// Deterministic signature used as the preview cache key.
    pub fn artifact_signature(&self, artifact_id: Uuid) -> Option<Uuid> {
        self.signatures.get(&artifact_id).copied()
    }

    /// Operator-level dependency graph: producer operator -> downstream
    /// operators, for every operator with at least one downstream consumer.
    /// This is the shape shipped to external schedulers at registration and
    /// reused for notebook-cluster multi-task jobs.
    pub fn task_dependencies(&self) -> HashMap<Uuid, HashSet<Uuid>> {
        let mut deps: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
        for (artifact_id, producer) in &self.artifact_producer {
            let consumers = self.artifact_consumers(*artifact_id);
            if consumers.is_empty() {
                continue;
            }
            deps.entry(*producer)
                .or_default()
                .extend(consumers.iter().copied());
        }
        deps
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::models::{
        ArtifactType, EngineConfig, FunctionParams, OperatorSpec, StorageConfig,
    };

    struct Builder {
        dag_id: Uuid,
        operators: Vec<Operator>,
        artifacts: Vec<Artifact>,
        edges: Vec<DagEdge>,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                dag_id: Uuid::new_v4(),
                operators: Vec::new(),
                artifacts: Vec::new(),
                edges: Vec::new(),
            }
        }

        fn operator(&mut self, name: &str, spec: OperatorSpec) -> Uuid {
            let id = Uuid::new_v4();
            self.operators.push(Operator {
                id,
                name: name.into(),
                description: String::new(),
                spec,
                engine_config: None,
                execution_environment_id: None,
            });
            id
        }

        fn function(&mut self, name: &str) -> Uuid {
            self.operator(
                name,
                OperatorSpec::Function(FunctionParams {
                    storage_path: format!("function-{name}"),
                    entry_point: None,
                    language: "python".into(),
                }),
            )
        }

        fn param(&mut self, name: &str, value: serde_json::Value) -> Uuid {
            self.operator(
                name,
                OperatorSpec::Param {
                    value,
                    serialization_type: "json".into(),
                },
            )
        }

        fn artifact(&mut self, name: &str) -> Uuid {
            let id = Uuid::new_v4();
            self.artifacts.push(Artifact {
                id,
                name: name.into(),
                description: String::new(),
                artifact_type: ArtifactType::Untyped,
            });
            id
        }

        fn edge(&mut self, kind: EdgeKind, from_id: Uuid, to_id: Uuid, idx: i16) {
            self.edges.push(DagEdge {
                dag_id: self.dag_id,
                kind,
                from_id,
                to_id,
                idx,
            });
        }

        fn build(&self) -> Result<WorkflowDag, DagValidationError> {
            let meta = Dag {
                id: self.dag_id,
                workflow_id: Uuid::new_v4(),
                created_at: Utc::now(),
                storage_config: StorageConfig::File {
                    directory: "/tmp/content".into(),
                },
                engine_config: EngineConfig::Aqueduct {},
            };
            WorkflowDag::new(
                meta,
                self.operators.clone(),
                self.artifacts.clone(),
                self.edges.clone(),
            )
        }
    }

    #[test]
    fn empty_dag_is_rejected() {
        assert_eq!(Builder::new().build().unwrap_err(), DagValidationError::NoOperator);
    }

    #[test]
    fn two_producers_for_one_artifact_are_rejected() {
        let mut b = Builder::new();
        let op_a = b.function("a");
        let op_b = b.function("b");
        let shared = b.artifact("shared");
        b.edge(EdgeKind::OperatorToArtifact, op_a, shared, 0);
        b.edge(EdgeKind::OperatorToArtifact, op_b, shared, 0);
        assert_eq!(
            b.build().unwrap_err(),
            DagValidationError::MultipleArtifactParents(shared)
        );
    }

    #[test]
    fn orphan_artifact_is_rejected() {
        let mut b = Builder::new();
        let op = b.function("a");
        let out = b.artifact("out");
        let orphan = b.artifact("orphan");
        b.edge(EdgeKind::OperatorToArtifact, op, out, 0);
        assert_eq!(
            b.build().unwrap_err(),
            DagValidationError::UnreachableArtifact(orphan)
        );
    }

    #[test]
    fn edge_to_unknown_artifact_is_rejected() {
        let mut b = Builder::new();
        let op = b.function("a");
        let ghost = Uuid::new_v4();
        b.edge(EdgeKind::OperatorToArtifact, op, ghost, 0);
        assert_eq!(
            b.build().unwrap_err(),
            DagValidationError::UndefinedArtifact(ghost)
        );
    }

    #[test]
    fn cycle_is_rejected() {
        let mut b = Builder::new();
        let op_a = b.function("a");
        let op_b = b.function("b");
        let a_out = b.artifact("a-out");
        let b_out = b.artifact("b-out");
        b.edge(EdgeKind::OperatorToArtifact, op_a, a_out, 0);
        b.edge(EdgeKind::ArtifactToOperator, a_out, op_b, 0);
        b.edge(EdgeKind::OperatorToArtifact, op_b, b_out, 0);
        b.edge(EdgeKind::ArtifactToOperator, b_out, op_a, 0);
        assert!(matches!(
            b.build().unwrap_err(),
            DagValidationError::UnexecutableOperator(_)
        ));
    }

    #[test]
    fn inputs_are_ordered_by_argument_position() {
        let mut b = Builder::new();
        let p1 = b.param("p1", json!(1));
        let p2 = b.param("p2", json!(2));
        let sink = b.function("sink");
        let out1 = b.artifact("out1");
        let out2 = b.artifact("out2");
        b.edge(EdgeKind::OperatorToArtifact, p1, out1, 0);
        b.edge(EdgeKind::OperatorToArtifact, p2, out2, 0);
        // Declare the edges out of argument order; idx wins.
        b.edge(EdgeKind::ArtifactToOperator, out2, sink, 1);
        b.edge(EdgeKind::ArtifactToOperator, out1, sink, 0);

        let dag = b.build().unwrap();
        assert_eq!(dag.operator_inputs(sink), &[out1, out2]);
    }

    #[test]
    fn signatures_track_param_values() {
        let build = |value: serde_json::Value| {
            let mut b = Builder::new();
            // Fixed node ids so only the param value varies between builds.
            b.dag_id = Uuid::nil();
            let p = b.param("p", value);
            let f = b.function("f");
            let p_out = b.artifact("p-out");
            let f_out = b.artifact("f-out");
            b.edge(EdgeKind::OperatorToArtifact, p, p_out, 0);
            b.edge(EdgeKind::ArtifactToOperator, p_out, f, 0);
            b.edge(EdgeKind::OperatorToArtifact, f, f_out, 0);
            (b, p_out, f_out)
        };

        let (b1, p_out, f_out) = build(json!(1));
        let (mut b2, ..) = build(json!(1));
        let (mut b3, ..) = build(json!(2));
        // Align node ids across the three builds.
        for b in [&mut b2, &mut b3] {
            for (ours, theirs) in b1.operators.iter().zip(b.operators.iter_mut()) {
                theirs.id = ours.id;
            }
            for (ours, theirs) in b1.artifacts.iter().zip(b.artifacts.iter_mut()) {
                theirs.id = ours.id;
            }
            for (ours, theirs) in b1.edges.iter().zip(b.edges.iter_mut()) {
                theirs.from_id = ours.from_id;
                theirs.to_id = ours.to_id;
            }
        }

        let d1 = b1.build().unwrap();
        let d2 = b2.build().unwrap();
        let d3 = b3.build().unwrap();

        assert_eq!(d1.artifact_signature(p_out), d2.artifact_signature(p_out));
        assert_eq!(d1.artifact_signature(f_out), d2.artifact_signature(f_out));
        // A different param value shifts every downstream signature.
        assert_ne!(d1.artifact_signature(p_out), d3.artifact_signature(p_out));
        assert_ne!(d1.artifact_signature(f_out), d3.artifact_signature(f_out));
    }
}
