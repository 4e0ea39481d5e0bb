//! Preview runs and the signature-keyed result cache.

mod common;

use std::sync::Arc;
use std::time::Duration;

use aqueduct::db::{MemoryStore, MetadataStore};
use aqueduct::engine::{Engine, EngineTimeouts, ExecutionMode, PreviewCache};
use aqueduct::models::ExecutionStatus;
use aqueduct::storage::MemoryStorage;
use aqueduct::test_support::ScriptedJobManager;

use common::DagFixture;

fn preview_engine(store: &Arc<MemoryStore>) -> Engine {
    Engine::new(
        Arc::clone(store) as Arc<dyn MetadataStore>,
        Arc::new(PreviewCache::new()),
        EngineTimeouts {
            exec_timeout: Duration::from_secs(30),
            cleanup_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(5),
        },
    )
}

#[tokio::test]
async fn second_preview_is_served_from_cache() {
    let mut fixture = DagFixture::new();
    let p = fixture.param("p", serde_json::json!(7));
    let f = fixture.function("f");
    let p_out = fixture.output_of(p, "p-out");
    fixture.consumes(p_out, f, 0);
    let f_out = fixture.output_of(f, "f-out");

    let store = Arc::new(MemoryStore::new());
    let engine = preview_engine(&store);
    let storage = Arc::new(MemoryStorage::new());
    let manager = Arc::new(ScriptedJobManager::new(storage.clone()));
    manager.set_content(f, b"computed-output".as_slice());

    let dag = fixture.build();
    let first = engine
        .run_with(
            &dag,
            ExecutionMode::Preview,
            storage.clone(),
            manager.clone(),
        )
        .await
        .unwrap();
    assert_eq!(first.status, ExecutionStatus::Succeeded);
    assert_eq!(first.dag_result_id, None);
    assert_eq!(first.preview_artifacts[&f_out].content, b"computed-output");
    assert_eq!(manager.launch_count(f), 1);

    // Rebuilding the same revision yields identical signatures, so the
    // second preview hits the cache and never launches a job.
    let rebuilt = fixture.build();
    assert_eq!(
        dag.artifact_signature(f_out),
        rebuilt.artifact_signature(f_out)
    );

    let second = engine
        .run_with(
            &rebuilt,
            ExecutionMode::Preview,
            storage.clone(),
            manager.clone(),
        )
        .await
        .unwrap();
    assert_eq!(second.status, ExecutionStatus::Succeeded);
    assert_eq!(manager.launch_count(f), 1);
    assert_eq!(manager.launch_count(p), 1);
    assert_eq!(second.preview_artifacts[&f_out].content, b"computed-output");
    assert_eq!(
        second.preview_artifacts[&f_out],
        first.preview_artifacts[&f_out]
    );
}

#[tokio::test]
async fn preview_blobs_are_swept() {
    let mut fixture = DagFixture::new();
    let f = fixture.function("f");
    fixture.output_of(f, "f-out");

    let store = Arc::new(MemoryStore::new());
    let engine = preview_engine(&store);
    let storage = Arc::new(MemoryStorage::new());
    let manager = Arc::new(ScriptedJobManager::new(storage.clone()));

    let outcome = engine
        .run_with(
            &fixture.build(),
            ExecutionMode::Preview,
            storage.clone(),
            manager,
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Succeeded);

    // Contents came back inline; the run-scoped blobs are gone.
    assert_eq!(outcome.preview_artifacts.len(), 1);
    assert!(storage.paths().await.is_empty());
}
