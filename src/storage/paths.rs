//! Path policy for blobs within a DAG's storage root.
//!
//! Paths are flat: `operator-metadata-{uuid}` for operator metadata,
//! `content-{uuid}` / `metadata-{uuid}` for artifact payloads and metadata,
//! `compile-{kind}-{uuid}` for compilation artifacts. Preview paths carry a
//! random suffix and are swept after the preview completes. Externally
//! scheduled DAGs suffix the scheduler's run id at read time so concurrent
//! remote runs never collide.

use uuid::Uuid;

pub fn operator_metadata_path(operator_id: Uuid) -> String {
    format!("operator-metadata-{operator_id}")
}

pub fn artifact_content_path(artifact_id: Uuid) -> String {
    format!("content-{artifact_id}")
}

pub fn artifact_metadata_path(artifact_id: Uuid) -> String {
    format!("metadata-{artifact_id}")
}

pub fn compile_path(kind: &str, id: Uuid) -> String {
    format!("compile-{kind}-{id}")
}

/// Preview paths get a random suffix so concurrent previews of the same node
/// never share blobs.
pub fn preview_path(base: &str) -> String {
    format!("{base}-preview-{}", Uuid::new_v4())
}

/// Content path for a run driven by an external scheduler.
pub fn with_remote_run_id(prefix: &str, run_id: &str) -> String {
    format!("{prefix}/{run_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_shapes() {
        let id = Uuid::nil();
        assert_eq!(
            operator_metadata_path(id),
            "operator-metadata-00000000-0000-0000-0000-000000000000"
        );
        assert!(artifact_content_path(id).starts_with("content-"));
        assert!(artifact_metadata_path(id).starts_with("metadata-"));
        assert_eq!(with_remote_run_id("content-abc", "run_7"), "content-abc/run_7");
    }

    #[test]
    fn preview_paths_are_unique() {
        assert_ne!(preview_path("content-x"), preview_path("content-x"));
    }
}
