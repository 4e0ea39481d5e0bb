//! Reconciliation of externally scheduled DAG runs into local result rows.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use aqueduct::db::{MemoryStore, ResultReader};
use aqueduct::models::{
    ExecutionState, ExecutionStatus, FailureType, OperatorResultMetadata, StorageConfig,
};
use aqueduct::storage::{paths, FileStorage, Storage};
use aqueduct::sync::{
    remote_dag_id, RemoteDagRun, RemoteRunState, RemoteScheduler, SyncError, SyncService,
};

use common::DagFixture;

/// Plays the external scheduler: a fixed set of runs, every task succeeded.
struct ScriptedScheduler {
    expected_dag_id: String,
    runs: Vec<RemoteDagRun>,
}

#[async_trait]
impl RemoteScheduler for ScriptedScheduler {
    async fn dag_runs_since(
        &self,
        remote_dag_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteDagRun>, SyncError> {
        assert_eq!(remote_dag_id, self.expected_dag_id);
        Ok(self
            .runs
            .iter()
            .filter(|run| run.started_at > since)
            .cloned()
            .collect())
    }

    async fn task_status(
        &self,
        _remote_dag_id: &str,
        _run_id: &str,
        _task_id: &str,
    ) -> Result<ExecutionStatus, SyncError> {
        Ok(ExecutionStatus::Succeeded)
    }
}

fn remote_run(id: &str, state: RemoteRunState, hours_ago: i64) -> RemoteDagRun {
    let started_at = Utc::now() - Duration::hours(hours_ago);
    let finished_at = if state == RemoteRunState::Running {
        None
    } else {
        Some(started_at + Duration::minutes(5))
    };
    RemoteDagRun {
        run_id: id.to_string(),
        state,
        started_at,
        finished_at,
    }
}

#[tokio::test]
async fn completed_remote_runs_are_materialized() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fixture = DagFixture::new().with_engine(aqueduct::models::EngineConfig::Airflow {
        host: "http://airflow:8080".to_string(),
        username: "svc".to_string(),
        password: "secret".to_string(),
        operator_metadata_prefix: "airflow".to_string(),
    });
    fixture.set_storage(StorageConfig::File {
        directory: tmp.path().to_string_lossy().into_owned(),
    });

    let extract = fixture.function("extract");
    let transform = fixture.function("transform");
    let extract_out = fixture.output_of(extract, "rows");
    fixture.consumes(extract_out, transform, 0);
    let transform_out = fixture.output_of(transform, "clean-rows");

    let store = Arc::new(MemoryStore::new());
    fixture.seed(&store).await;

    // Worker blobs for the two completed runs, at prefix-and-run-suffixed
    // paths.
    let storage = FileStorage::new(tmp.path());
    for run_id in ["run_1", "run_2"] {
        for op_id in [extract, transform] {
            let mut exec_state = ExecutionState::pending();
            exec_state.succeeded();
            let blob = OperatorResultMetadata {
                exec_state,
                artifact_metadata: BTreeMap::new(),
            };
            let base = format!("airflow/{}", paths::operator_metadata_path(op_id));
            storage
                .put(
                    &paths::with_remote_run_id(&base, run_id),
                    &serde_json::to_vec(&blob).unwrap(),
                )
                .await
                .unwrap();
        }
    }

    let scheduler = ScriptedScheduler {
        expected_dag_id: remote_dag_id(fixture.dag_id),
        runs: vec![
            remote_run("run_1", RemoteRunState::Succeeded, 3),
            remote_run("run_2", RemoteRunState::Failed, 2),
            remote_run("run_3", RemoteRunState::Running, 1),
        ],
    };

    let service = SyncService::new(store.clone());
    let report = service.reconcile("test-org", &scheduler).await.unwrap();
    assert_eq!(report.runs_recorded, 2);
    assert_eq!(report.runs_skipped, 1);

    let results = store
        .dag_results_by_workflow(fixture.workflow_id)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    // Newest first: run_2 failed, run_1 succeeded.
    assert_eq!(results[0].exec_state.status, ExecutionStatus::Failed);
    assert_eq!(
        results[0].exec_state.failure_type,
        Some(FailureType::UserFatal)
    );
    assert_eq!(results[1].exec_state.status, ExecutionStatus::Succeeded);

    for result in &results {
        let operator_results = store
            .operator_results_by_dag_result(result.id)
            .await
            .unwrap();
        assert_eq!(operator_results.len(), 2);
        // The worker blobs reported success regardless of the run state.
        assert!(operator_results
            .iter()
            .all(|r| r.exec_state.status == ExecutionStatus::Succeeded));
    }

    // Artifact contents are addressed under the remote run id.
    let artifact_results = store
        .artifact_results_by_artifact(&[transform_out])
        .await
        .unwrap();
    assert_eq!(artifact_results.len(), 2);
    let expected: Vec<String> = ["run_1", "run_2"]
        .iter()
        .map(|run_id| {
            paths::with_remote_run_id(&paths::artifact_content_path(transform_out), run_id)
        })
        .collect();
    let mut got: Vec<String> = artifact_results
        .iter()
        .map(|r| r.content_path.clone())
        .collect();
    got.sort();
    assert_eq!(got, expected);

    // A second pass finds nothing newer than the recorded runs.
    let report = service.reconcile("test-org", &scheduler).await.unwrap();
    assert_eq!(report.runs_recorded, 0);
    assert_eq!(report.runs_skipped, 1);
}

#[tokio::test]
async fn missing_blob_falls_back_to_task_status() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fixture = DagFixture::new().with_engine(aqueduct::models::EngineConfig::Airflow {
        host: "http://airflow:8080".to_string(),
        username: "svc".to_string(),
        password: "secret".to_string(),
        operator_metadata_prefix: String::new(),
    });
    fixture.set_storage(StorageConfig::File {
        directory: tmp.path().to_string_lossy().into_owned(),
    });
    let only = fixture.function("only");
    fixture.output_of(only, "out");

    let store = Arc::new(MemoryStore::new());
    fixture.seed(&store).await;

    let scheduler = ScriptedScheduler {
        expected_dag_id: remote_dag_id(fixture.dag_id),
        runs: vec![remote_run("run_1", RemoteRunState::Succeeded, 1)],
    };

    let report = SyncService::new(store.clone())
        .reconcile("test-org", &scheduler)
        .await
        .unwrap();
    assert_eq!(report.runs_recorded, 1);

    let results = store
        .dag_results_by_workflow(fixture.workflow_id)
        .await
        .unwrap();
    let operator_results = store
        .operator_results_by_dag_result(results[0].id)
        .await
        .unwrap();
    assert_eq!(operator_results.len(), 1);
    assert_eq!(
        operator_results[0].exec_state.status,
        ExecutionStatus::Succeeded
    );
}
