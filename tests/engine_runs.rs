//! Publish-mode engine runs against the in-memory store and a scripted
//! execution backend.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use aqueduct::db::{MemoryStore, MetadataStore, NotificationReader, ResourceWriter, ResultReader};
use aqueduct::engine::{EngineError, ExecutionMode};
use aqueduct::models::{
    CheckSeverity, ExecutionStatus, FailureType, NotificationLevel, NotificationStatus, Resource,
};
use aqueduct::storage::MemoryStorage;
use aqueduct::test_support::{ScriptedJobManager, ScriptedOutcome};

use common::DagFixture;

#[test]
fn diamond_task_dependencies() {
    let mut fixture = DagFixture::new();
    let a = fixture.function("a");
    let b = fixture.function("b");
    let c = fixture.function("c");
    let d = fixture.function("d");
    let e = fixture.function("e");
    let f = fixture.function("f");

    for (source, idx) in [(a, 0), (b, 1), (c, 2)] {
        let artifact = fixture.output_of(source, &format!("out-{idx}"));
        fixture.consumes(artifact, d, idx);
    }
    let d_out_1 = fixture.output_of(d, "d-out-1");
    let d_out_2 = fixture.artifact("d-out-2");
    fixture.produces(d, d_out_2, 1);
    fixture.consumes(d_out_1, e, 0);
    fixture.consumes(d_out_2, f, 0);

    let dag = fixture.build();
    let deps = dag.task_dependencies();

    let expected: HashMap<Uuid, Vec<Uuid>> =
        [(a, vec![d]), (b, vec![d]), (c, vec![d]), (d, vec![e, f])]
            .into_iter()
            .collect();
    assert_eq!(deps.len(), expected.len());
    for (producer, downstream) in expected {
        let got = deps.get(&producer).expect("missing producer entry");
        assert_eq!(
            got,
            &downstream.into_iter().collect::<std::collections::HashSet<_>>()
        );
    }
}

#[tokio::test]
async fn fan_in_publish_run_succeeds() {
    let mut fixture = DagFixture::new();
    let a = fixture.function("a");
    let b = fixture.function("b");
    let c = fixture.function("c");
    let d = fixture.function("d");
    for (source, idx) in [(a, 0), (b, 1), (c, 2)] {
        let artifact = fixture.output_of(source, &format!("out-{idx}"));
        fixture.consumes(artifact, d, idx);
    }
    fixture.output_of(d, "final");

    let store = Arc::new(MemoryStore::new());
    let workflow = fixture.seed(&store).await;
    let dag = fixture.build();

    let storage = Arc::new(MemoryStorage::new());
    let manager = Arc::new(ScriptedJobManager::new(storage.clone()));

    let outcome = common::engine(&store)
        .run_with(&dag, ExecutionMode::Publish, storage, manager.clone())
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Succeeded);
    assert_eq!(outcome.operator_states.len(), 4);
    assert!(outcome
        .operator_states
        .values()
        .all(|state| state.status == ExecutionStatus::Succeeded));
    // The sink launches only after all three sources complete.
    assert_eq!(*manager.launches().last().unwrap(), d);

    let results = store
        .dag_results_by_workflow(fixture.workflow_id)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].exec_state.status, ExecutionStatus::Succeeded);

    let operator_results = store
        .operator_results_by_dag_result(results[0].id)
        .await
        .unwrap();
    assert_eq!(operator_results.len(), 4);
    assert!(operator_results
        .iter()
        .all(|r| r.exec_state.status == ExecutionStatus::Succeeded));

    let notifications = store
        .notifications_by_receiver(workflow.user_id, NotificationStatus::Unread)
        .await
        .unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Success);
}

#[tokio::test]
async fn fatal_failure_cancels_downstream() {
    let store = Arc::new(MemoryStore::new());
    let resource_id = Uuid::new_v4();
    store
        .create_resource(&Resource {
            id: resource_id,
            org_id: "test-org".to_string(),
            user_id: None,
            service: "postgres".to_string(),
            name: "warehouse".to_string(),
            config: Default::default(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let mut fixture = DagFixture::new();
    let p = fixture.param("p", serde_json::json!(7));
    let f = fixture.function("f");
    let l = fixture.load("l", resource_id);
    let p_out = fixture.output_of(p, "p-out");
    fixture.consumes(p_out, f, 0);
    let f_out = fixture.output_of(f, "f-out");
    fixture.consumes(f_out, l, 0);

    fixture.seed(&store).await;
    let dag = fixture.build();

    let storage = Arc::new(MemoryStorage::new());
    let manager = Arc::new(ScriptedJobManager::new(storage.clone()));
    manager.script(f, ScriptedOutcome::Fail(FailureType::UserFatal));

    let err = common::engine(&store)
        .run_with(&dag, ExecutionMode::Publish, storage, manager.clone())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::OperatorFailed {
            failure_type: FailureType::UserFatal,
            ..
        }
    ));
    // The load operator never reached the backend.
    assert_eq!(manager.launch_count(l), 0);

    let results = store
        .dag_results_by_workflow(fixture.workflow_id)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].exec_state.status, ExecutionStatus::Failed);
    assert_eq!(
        results[0].exec_state.failure_type,
        Some(FailureType::UserFatal)
    );

    let operator_results = store
        .operator_results_by_dag_result(results[0].id)
        .await
        .unwrap();
    let by_operator: HashMap<Uuid, ExecutionStatus> = operator_results
        .iter()
        .map(|r| (r.operator_id, r.exec_state.status))
        .collect();
    assert_eq!(by_operator[&p], ExecutionStatus::Succeeded);
    assert_eq!(by_operator[&f], ExecutionStatus::Failed);
    assert_eq!(by_operator[&l], ExecutionStatus::Canceled);
}

#[tokio::test]
async fn warning_check_does_not_block_the_dag() {
    let store = Arc::new(MemoryStore::new());
    let resource_id = Uuid::new_v4();
    store
        .create_resource(&Resource {
            id: resource_id,
            org_id: "test-org".to_string(),
            user_id: None,
            service: "postgres".to_string(),
            name: "warehouse".to_string(),
            config: Default::default(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let mut fixture = DagFixture::new();
    let f = fixture.function("f");
    let c = fixture.check("c", CheckSeverity::Warning);
    let l = fixture.load("l", resource_id);
    let f_out = fixture.output_of(f, "f-out");
    fixture.consumes(f_out, c, 0);
    fixture.consumes(f_out, l, 0);
    fixture.output_of(c, "c-out");

    let workflow = fixture.seed(&store).await;
    let dag = fixture.build();

    let storage = Arc::new(MemoryStorage::new());
    let manager = Arc::new(ScriptedJobManager::new(storage.clone()));
    manager.script(c, ScriptedOutcome::Fail(FailureType::UserNonFatal));

    let outcome = common::engine(&store)
        .run_with(&dag, ExecutionMode::Publish, storage, manager.clone())
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert_eq!(outcome.failure_type, Some(FailureType::UserNonFatal));
    assert_eq!(
        outcome.operator_states[&f].status,
        ExecutionStatus::Succeeded
    );
    assert_eq!(outcome.operator_states[&c].status, ExecutionStatus::Failed);
    assert_eq!(
        outcome.operator_states[&c].failure_type,
        Some(FailureType::UserNonFatal)
    );
    // The load ran to completion despite the failed check.
    assert_eq!(
        outcome.operator_states[&l].status,
        ExecutionStatus::Succeeded
    );
    assert_eq!(manager.launch_count(l), 1);

    let notifications = store
        .notifications_by_receiver(workflow.user_id, NotificationStatus::Unread)
        .await
        .unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Warning);
}

#[tokio::test]
async fn refused_launch_is_persisted_as_failed() {
    let mut fixture = DagFixture::new();
    let f = fixture.function("f");
    let g = fixture.function("g");
    let f_out = fixture.output_of(f, "f-out");
    fixture.consumes(f_out, g, 0);
    fixture.output_of(g, "g-out");

    let store = Arc::new(MemoryStore::new());
    fixture.seed(&store).await;
    let dag = fixture.build();

    let storage = Arc::new(MemoryStorage::new());
    let manager = Arc::new(ScriptedJobManager::new(storage.clone()));
    manager.script(f, ScriptedOutcome::RefuseLaunch);

    let err = common::engine(&store)
        .run_with(&dag, ExecutionMode::Publish, storage, manager.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Launch { .. }));
    assert_eq!(manager.launch_count(g), 0);

    let results = store
        .dag_results_by_workflow(fixture.workflow_id)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].exec_state.status, ExecutionStatus::Failed);
    assert_eq!(results[0].exec_state.failure_type, Some(FailureType::System));

    // The operator whose launch was refused must not be left Pending in the
    // store; its row carries the system failure, and the downstream row is
    // cancelled.
    let operator_results = store
        .operator_results_by_dag_result(results[0].id)
        .await
        .unwrap();
    let by_operator: HashMap<Uuid, ExecutionStatus> = operator_results
        .iter()
        .map(|r| (r.operator_id, r.exec_state.status))
        .collect();
    assert_eq!(by_operator[&f], ExecutionStatus::Failed);
    assert_eq!(by_operator[&g], ExecutionStatus::Canceled);
    let failed = operator_results
        .iter()
        .find(|r| r.operator_id == f)
        .unwrap();
    assert_eq!(failed.exec_state.failure_type, Some(FailureType::System));
}

#[tokio::test]
async fn timed_out_run_cancels_outstanding_operators() {
    let mut fixture = DagFixture::new();
    let h = fixture.function("h");
    fixture.output_of(h, "h-out");

    let store = Arc::new(MemoryStore::new());
    fixture.seed(&store).await;
    let dag = fixture.build();

    let storage = Arc::new(MemoryStorage::new());
    let manager = Arc::new(ScriptedJobManager::new(storage.clone()));
    manager.script(h, ScriptedOutcome::Hang);

    let engine = aqueduct::Engine::new(
        Arc::clone(&store) as Arc<dyn MetadataStore>,
        Arc::new(aqueduct::engine::PreviewCache::new()),
        aqueduct::EngineTimeouts {
            exec_timeout: std::time::Duration::from_millis(50),
            cleanup_timeout: std::time::Duration::from_millis(30),
            poll_interval: std::time::Duration::from_millis(5),
        },
    );
    let err = engine
        .run_with(&dag, ExecutionMode::Publish, storage, manager)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout));

    let results = store
        .dag_results_by_workflow(fixture.workflow_id)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].exec_state.status, ExecutionStatus::Failed);
    assert_eq!(results[0].exec_state.failure_type, Some(FailureType::System));

    // Cleanup gave up within its own bound and cancelled the hung operator.
    let operator_results = store
        .operator_results_by_dag_result(results[0].id)
        .await
        .unwrap();
    assert_eq!(operator_results.len(), 1);
    assert_eq!(
        operator_results[0].exec_state.status,
        ExecutionStatus::Canceled
    );
}
