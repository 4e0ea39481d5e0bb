//! Value objects for the persisted data model.
//!
//! Everything here round-trips through serde: polymorphic fields (execution
//! state, specs, engine/storage configs, schedules) are tagged unions stored
//! as JSON blobs in their owning rows. Equality over those blobs is value
//! equality after deserialization, never byte equality.

pub mod artifact;
pub mod dag;
pub mod environment;
pub mod execution_state;
pub mod notification;
pub mod operator;
pub mod resource;
pub mod results;
pub mod storage_migration;
pub mod user;
pub mod workflow;

pub use artifact::{Artifact, ArtifactType};
pub use dag::{Dag, DagEdge, EdgeKind, EngineConfig, StorageConfig};
pub use environment::ExecutionEnvironment;
pub use execution_state::{
    ExecError, ExecutionState, ExecutionStatus, ExecutionTimestamps, FailureType,
};
pub use notification::{
    Notification, NotificationAssociation, NotificationLevel, NotificationStatus,
};
pub use operator::{
    CheckSeverity, FunctionParams, LoadParams, Operator, OperatorSpec, RelationalParams,
};
pub use resource::Resource;
pub use results::{
    ArtifactResult, ArtifactResultMetadata, DagResult, OperatorResult, OperatorResultMetadata,
    SerializationType,
};
pub use storage_migration::StorageMigration;
pub use user::User;
pub use workflow::{NotificationSettings, RetentionPolicy, Schedule, UpdateTrigger, Workflow};
