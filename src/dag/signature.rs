//! Deterministic artifact signatures.
//!
//! The signature of an artifact is the UUIDv5 hash (OID namespace) of its
//! producer's input signatures in argument order, the producer's literal
//! value when it is a param operator, and the artifact's own id bytes.
//! Two artifacts share a signature exactly when the upstream sub-DAG and
//! parameter values that feed them are identical, which makes the signature
//! the cache key for preview-result reuse.

use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use super::WorkflowDag;

pub fn compute_signatures(dag: &WorkflowDag) -> HashMap<Uuid, Uuid> {
    let mut signatures: HashMap<Uuid, Uuid> = HashMap::new();

    // Walk operators in topological order; validation already guaranteed the
    // walk terminates with every operator scheduled.
    let mut remaining: HashMap<Uuid, usize> = dag
        .operators
        .keys()
        .map(|id| (*id, dag.operator_inputs(*id).len()))
        .collect();
    let mut frontier: VecDeque<Uuid> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    while let Some(operator_id) = frontier.pop_front() {
        let operator = &dag.operators[&operator_id];
        let mut seed: Vec<u8> = Vec::new();
        for input in dag.operator_inputs(operator_id) {
            if let Some(signature) = signatures.get(input) {
                seed.extend_from_slice(signature.as_bytes());
            }
        }
        if let Some(value) = operator.spec.param_value() {
            seed.extend_from_slice(value.to_string().as_bytes());
        }

        for artifact_id in dag.operator_outputs(operator_id) {
            let mut bytes = seed.clone();
            bytes.extend_from_slice(artifact_id.as_bytes());
            signatures.insert(*artifact_id, Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes));

            for consumer in dag.artifact_consumers(*artifact_id) {
                if let Some(count) = remaining.get_mut(consumer) {
                    *count -= 1;
                    if *count == 0 {
                        frontier.push_back(*consumer);
                    }
                }
            }
        }
    }

    signatures
}
