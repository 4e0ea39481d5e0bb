//! Local process backend.
//!
//! Each launch spawns a child process carrying the encoded spec in the
//! `JOB_SPEC` environment variable. Stdout/stderr are captured into
//! in-memory buffers keyed by job name; a terminal poll logs them and
//! garbage-collects the entry. Cron jobs are scheduled in-process: a paused
//! job keeps its registry entry (spec included) but has no scheduler task,
//! so resuming re-registers from the stored spec.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::models::ExecutionStatus;

use super::spec::{JobSpec, JOB_SPEC_ENV};
use super::{cron, JobError, JobManager, JobResult};

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Directory holding the workflow executor binary.
    pub binary_dir: PathBuf,
    pub python_executable: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self {
            binary_dir: PathBuf::from(home).join(".aqueduct").join("bin"),
            python_executable: "python3".to_string(),
        }
    }
}

enum JobEntry {
    Running,
    Finished {
        success: bool,
        stdout: String,
        stderr: String,
    },
}

struct CronEntry {
    cron_expr: String,
    spec: JobSpec,
    /// None while paused.
    task: Option<JoinHandle<()>>,
}

struct Inner {
    config: ProcessConfig,
    jobs: Mutex<HashMap<String, JobEntry>>,
    crons: Mutex<HashMap<String, CronEntry>>,
}

#[derive(Clone)]
pub struct ProcessJobManager {
    inner: Arc<Inner>,
}

impl ProcessJobManager {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                jobs: Mutex::new(HashMap::new()),
                crons: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Inner {
    /// Map a spec to its concrete command. User-code specs run through the
    /// python executor modules; the legacy workflow path execs a binary.
    fn command_for(&self, spec: &JobSpec, encoded: &str) -> Command {
        let mut command = match spec {
            JobSpec::Workflow(_) => {
                let mut command = Command::new(self.config.binary_dir.join("executor"));
                command.arg(encoded);
                command
            }
            JobSpec::Function(_) => self.python_module("aqueduct_executor.operators.function_operator.main"),
            JobSpec::Param(_) => self.python_module("aqueduct_executor.operators.param_operator.main"),
            JobSpec::SystemMetric(_) => {
                self.python_module("aqueduct_executor.operators.system_metric_operator.main")
            }
            JobSpec::Authenticate(_)
            | JobSpec::Extract(_)
            | JobSpec::Load(_)
            | JobSpec::LoadTable(_)
            | JobSpec::Discover(_) => {
                self.python_module("aqueduct_executor.operators.connectors.main")
            }
            JobSpec::WorkflowRetention(_) => {
                self.python_module("aqueduct_executor.operators.workflow_retention.main")
            }
        };
        command.env(JOB_SPEC_ENV, encoded);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command
    }

    fn python_module(&self, module: &str) -> Command {
        let mut command = Command::new(&self.config.python_executable);
        command.arg("-m").arg(module);
        command
    }

    async fn launch(self: &Arc<Self>, spec: &JobSpec) -> JobResult<()> {
        let name = spec.name().to_string();
        {
            let mut jobs = self.jobs.lock().await;
            if matches!(jobs.get(&name), Some(JobEntry::Running)) {
                return Err(JobError::System(format!("job {name} is already running")));
            }
            jobs.insert(name.clone(), JobEntry::Running);
        }

        let encoded = spec
            .encode()
            .map_err(|err| JobError::System(format!("failed to serialize job spec: {err}")))?;
        let child = self
            .command_for(spec, &encoded)
            .spawn()
            .map_err(|err| JobError::System(format!("failed to spawn job {name}: {err}")))?;
        info!(job = %name, kind = spec.kind(), "launched process job");

        // Waiter task parks the outcome in the job table for the next poll.
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let entry = match child.wait_with_output().await {
                Ok(output) => JobEntry::Finished {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                },
                Err(err) => JobEntry::Finished {
                    success: false,
                    stdout: String::new(),
                    stderr: format!("failed to await job: {err}"),
                },
            };
            inner.jobs.lock().await.insert(name, entry);
        });

        Ok(())
    }
}

#[async_trait::async_trait]
impl JobManager for ProcessJobManager {
    async fn launch(&self, spec: &JobSpec) -> JobResult<()> {
        self.inner.launch(spec).await
    }

    async fn poll(&self, name: &str) -> JobResult<ExecutionStatus> {
        let mut jobs = self.inner.jobs.lock().await;
        match jobs.get(name) {
            None => Err(JobError::JobMissing(name.to_string())),
            Some(JobEntry::Running) => Ok(ExecutionStatus::Pending),
            Some(JobEntry::Finished { .. }) => {
                // First terminal poll logs the buffers and drops the entry.
                let Some(JobEntry::Finished {
                    success,
                    stdout,
                    stderr,
                }) = jobs.remove(name)
                else {
                    unreachable!("entry checked above");
                };
                if success {
                    info!(job = %name, stdout = %stdout, "process job succeeded");
                    Ok(ExecutionStatus::Succeeded)
                } else {
                    error!(job = %name, stdout = %stdout, stderr = %stderr, "process job failed");
                    Ok(ExecutionStatus::Failed)
                }
            }
        }
    }

    async fn deploy_cron(&self, name: &str, cron_expr: &str, spec: JobSpec) -> JobResult<()> {
        let task = if cron_expr.is_empty() {
            None
        } else {
            cron::validate(cron_expr).map_err(JobError::System)?;
            Some(spawn_cron_task(
                Arc::clone(&self.inner),
                name.to_string(),
                cron_expr.to_string(),
                spec.clone(),
            ))
        };
        let mut crons = self.inner.crons.lock().await;
        if let Some(previous) = crons.insert(
            name.to_string(),
            CronEntry {
                cron_expr: cron_expr.to_string(),
                spec,
                task,
            },
        ) {
            if let Some(task) = previous.task {
                task.abort();
            }
        }
        Ok(())
    }

    async fn cron_exists(&self, name: &str) -> bool {
        self.inner.crons.lock().await.contains_key(name)
    }

    async fn edit_cron(&self, name: &str, cron_expr: &str) -> JobResult<()> {
        let mut crons = self.inner.crons.lock().await;
        let entry = crons
            .get_mut(name)
            .ok_or_else(|| JobError::JobMissing(name.to_string()))?;
        if let Some(task) = entry.task.take() {
            task.abort();
        }
        entry.cron_expr = cron_expr.to_string();
        if cron_expr.is_empty() {
            // Paused: keep the entry so resume can re-register the spec.
            return Ok(());
        }
        cron::validate(cron_expr).map_err(JobError::System)?;
        entry.task = Some(spawn_cron_task(
            Arc::clone(&self.inner),
            name.to_string(),
            cron_expr.to_string(),
            entry.spec.clone(),
        ));
        Ok(())
    }

    async fn delete_cron(&self, name: &str) -> JobResult<()> {
        let mut crons = self.inner.crons.lock().await;
        let entry = crons
            .remove(name)
            .ok_or_else(|| JobError::JobMissing(name.to_string()))?;
        if let Some(task) = entry.task {
            task.abort();
        }
        Ok(())
    }
}

/// Fire the stored spec at each cron occurrence. Launch outcomes are logged
/// at info on success and error on failure so scheduled runs leave a trail
/// either way.
fn spawn_cron_task(
    inner: Arc<Inner>,
    name: String,
    cron_expr: String,
    spec: JobSpec,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = match cron::next_run(&cron_expr) {
                Ok(next) => next,
                Err(err) => {
                    error!(job = %name, error = %err, "cron schedule became unusable");
                    return;
                }
            };
            let wait = (next - chrono::Utc::now())
                .to_std()
                .unwrap_or_default();
            tokio::time::sleep(wait).await;

            match inner.launch(&spec).await {
                Ok(()) => info!(job = %name, "cron fire launched job"),
                Err(err) => error!(job = %name, error = %err, "cron fire failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::job::spec::{JobBase, WorkflowJobSpec};
    use crate::models::StorageConfig;

    fn workflow_spec(name: &str) -> JobSpec {
        JobSpec::Workflow(WorkflowJobSpec {
            base: JobBase {
                name: name.to_string(),
                storage_config: StorageConfig::File {
                    directory: "/tmp/content".to_string(),
                },
                metadata_path: format!("operator-metadata-{}", Uuid::new_v4()),
            },
            workflow_id: Uuid::new_v4(),
            dag_id: Uuid::new_v4(),
        })
    }

    /// Drop a fake executor script into a temp binary dir.
    fn fake_executor(exit_code: i32) -> (tempfile::TempDir, ProcessConfig) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("executor");
        std::fs::write(&path, format!("#!/bin/sh\necho ran\nexit {exit_code}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let config = ProcessConfig {
            binary_dir: dir.path().to_path_buf(),
            python_executable: "python3".to_string(),
        };
        (dir, config)
    }

    async fn poll_until_terminal(manager: &ProcessJobManager, name: &str) -> ExecutionStatus {
        for _ in 0..100 {
            match manager.poll(name).await.unwrap() {
                ExecutionStatus::Pending => tokio::time::sleep(Duration::from_millis(20)).await,
                terminal => return terminal,
            }
        }
        panic!("job {name} never terminated");
    }

    #[tokio::test]
    async fn launch_and_poll_success() {
        let (_dir, config) = fake_executor(0);
        let manager = ProcessJobManager::new(config);
        manager.launch(&workflow_spec("job-ok")).await.unwrap();
        assert_eq!(
            poll_until_terminal(&manager, "job-ok").await,
            ExecutionStatus::Succeeded
        );
        // Entry is garbage-collected after the terminal poll.
        assert!(matches!(
            manager.poll("job-ok").await,
            Err(JobError::JobMissing(_))
        ));
    }

    #[tokio::test]
    async fn nonzero_exit_maps_to_failed() {
        let (_dir, config) = fake_executor(3);
        let manager = ProcessJobManager::new(config);
        manager.launch(&workflow_spec("job-bad")).await.unwrap();
        assert_eq!(
            poll_until_terminal(&manager, "job-bad").await,
            ExecutionStatus::Failed
        );
    }

    #[tokio::test]
    async fn unknown_job_is_missing() {
        let manager = ProcessJobManager::new(ProcessConfig::default());
        assert!(matches!(
            manager.poll("never-launched").await,
            Err(JobError::JobMissing(_))
        ));
    }

    #[tokio::test]
    async fn paused_cron_keeps_its_entry() {
        let manager = ProcessJobManager::new(ProcessConfig::default());
        // Yearly schedule; never fires during the test.
        manager
            .deploy_cron("nightly", "0 0 1 1 *", workflow_spec("nightly"))
            .await
            .unwrap();
        assert!(manager.cron_exists("nightly").await);

        manager.edit_cron("nightly", "").await.unwrap();
        assert!(manager.cron_exists("nightly").await);

        // Resume re-registers from the stored spec.
        manager.edit_cron("nightly", "0 0 1 1 *").await.unwrap();
        assert!(manager.cron_exists("nightly").await);

        manager.delete_cron("nightly").await.unwrap();
        assert!(!manager.cron_exists("nightly").await);
        assert!(matches!(
            manager.delete_cron("nightly").await,
            Err(JobError::JobMissing(_))
        ));
    }

    #[tokio::test]
    async fn deploying_with_empty_expression_starts_paused() {
        let manager = ProcessJobManager::new(ProcessConfig::default());
        manager
            .deploy_cron("paused", "", workflow_spec("paused"))
            .await
            .unwrap();
        assert!(manager.cron_exists("paused").await);
    }
}
