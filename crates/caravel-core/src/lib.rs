//! The Caravel release engine.
//!
//! Given a release specification (which services, which image changes,
//! plan or execute), this crate determines the concrete set of
//! per-workload manifest edits, filters them against policies and live
//! cluster state, and either returns the computed result (plan) or
//! commits the edits to the repository and applies them to the cluster
//! (execute). It also owns the per-instance job queue that serializes
//! those operations.

pub mod context;
pub mod deadline;
pub mod exec;
pub mod filters;
pub mod jobs;
pub mod plan;
pub mod policies;
pub mod update;

pub use context::ReleaseContext;
pub use deadline::Deadline;
pub use exec::{execute_release, ProvenanceNote};
pub use filters::{ExcludeFilter, Filter, IgnoreFilter, LockedFilter, SpecFilter};
pub use jobs::{validate_transition, JobOutcome, JobQueue, JobSink};
pub use plan::{plan_release, release};
pub use policies::execute_policy_update;
pub use update::ControllerUpdate;

use caravel_schema::ResourceId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] caravel_schema::SchemaError),
    #[error("repository error: {0}")]
    Repo(#[from] caravel_repo::RepoError),
    #[error("registry error: {0}")]
    Registry(#[from] caravel_registry::RegistryError),
    #[error("cluster error: {0}")]
    Cluster(#[from] caravel_cluster::ClusterError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("multiple manifests for resource {id}: {paths}")]
    MultipleManifests { id: ResourceId, paths: String },
    #[error("unknown service: {0}")]
    UnknownService(ResourceId),
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("cancelled")]
    Cancelled,
}

impl CoreError {
    /// Whether the underlying failure is a daemon transport loss.
    pub fn is_daemon_fatal(&self) -> bool {
        matches!(self, CoreError::Cluster(e) if e.is_fatal())
    }
}
