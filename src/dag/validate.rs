//! DAG validation: runs before any execution and rejects each defect with a
//! distinct error.

use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use super::WorkflowDag;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DagValidationError {
    #[error("dag contains no operators")]
    NoOperator,
    #[error("artifact {0} has more than one producer operator")]
    MultipleArtifactParents(Uuid),
    #[error("artifact {0} does not appear on any edge")]
    UnreachableArtifact(Uuid),
    #[error("edge references artifact {0} which is not in the artifact set")]
    UndefinedArtifact(Uuid),
    #[error("edge references operator {0} which is not in the operator set")]
    UndefinedOperator(Uuid),
    #[error("operator {0} can never be scheduled (cycle or unsatisfiable input)")]
    UnexecutableOperator(Uuid),
}

pub fn validate(dag: &WorkflowDag) -> Result<(), DagValidationError> {
    if dag.operators.is_empty() {
        return Err(DagValidationError::NoOperator);
    }

    // Every artifact on an edge must be defined, and vice versa. Multiple
    // producers were already rejected while building the lookup maps.
    for edge in &dag.edges {
        let (artifact_id, operator_id) = match edge.kind {
            crate::models::EdgeKind::OperatorToArtifact => (edge.to_id, edge.from_id),
            crate::models::EdgeKind::ArtifactToOperator => (edge.from_id, edge.to_id),
        };
        if !dag.artifacts.contains_key(&artifact_id) {
            return Err(DagValidationError::UndefinedArtifact(artifact_id));
        }
        if !dag.operators.contains_key(&operator_id) {
            return Err(DagValidationError::UndefinedOperator(operator_id));
        }
    }
    for artifact_id in dag.artifacts.keys() {
        let on_edge = dag.artifact_producer(*artifact_id).is_some()
            || !dag.artifact_consumers(*artifact_id).is_empty();
        if !on_edge {
            return Err(DagValidationError::UnreachableArtifact(*artifact_id));
        }
    }

    // Topological scheduling simulation. Operators whose input set is empty
    // seed the frontier; completing an operator decrements the remaining-input
    // counter of every downstream operator. Anything left with a non-zero
    // counter is unexecutable, which also catches cycles.
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
    let mut completed = 0usize;

    while let Some(operator_id) = frontier.pop_front() {
        completed += 1;
        for artifact_id in dag.operator_outputs(operator_id) {
            for consumer in dag.artifact_consumers(*artifact_id) {
                let count = remaining
                    .get_mut(consumer)
                    .ok_or(DagValidationError::UndefinedOperator(*consumer))?;
                *count -= 1;
                if *count == 0 {
                    frontier.push_back(*consumer);
                }
            }
        }
    }

    if completed != dag.operators.len() {
        let stuck = remaining
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, _)| *id)
            .min()
            .unwrap_or(Uuid::nil());
        return Err(DagValidationError::UnexecutableOperator(stuck));
    }

    Ok(())
}
