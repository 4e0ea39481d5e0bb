//! Aqueduct: a workflow orchestrator for data DAGs.
//!
//! A workflow is a DAG of operators (functions, parameters, checks, metrics,
//! extracts, loads) joined by the artifacts flowing between them. The
//! [`engine`] drives a DAG revision to completion against pluggable blob
//! [`storage`] and [`job`] execution backends, persisting results through the
//! [`db`] metadata store. DAGs scheduled on an external system are not
//! executed locally; [`sync`] reconciles their remote runs into the same
//! result rows.

pub mod config;
pub mod dag;
pub mod db;
pub mod engine;
pub mod job;
pub mod models;
pub mod observability;
pub mod storage;
pub mod sync;
pub mod test_support;

pub use config::Config;
pub use dag::WorkflowDag;
pub use db::{MemoryStore, MetadataStore, PostgresStore};
pub use engine::{Engine, EngineTimeouts, ExecutionMode, RunOutcome};
pub use job::{JobManager, JobSpec};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use sync::{AirflowClient, RemoteScheduler, SyncService};
