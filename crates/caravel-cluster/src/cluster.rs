//! The live-cluster interface the control plane calls through the daemon.

use crate::ClusterError;
use caravel_schema::{ImageRef, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A container within a running workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: ImageRef,
}

/// Snapshot of one workload as the cluster runs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    pub id: ResourceId,
    #[serde(default)]
    pub containers: Vec<Container>,
    /// Free-form rollout status as reported by the cluster.
    #[serde(default)]
    pub status: String,
}

/// One manifest to apply, addressed by the workload it declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOp {
    pub id: ResourceId,
    /// Manifest file contents (UTF-8).
    pub manifest: String,
}

/// Per-workload apply errors; empty means everything landed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    #[serde(default)]
    pub errors: BTreeMap<ResourceId, String>,
}

/// Operations the control plane invokes on the in-cluster daemon.
///
/// A transport failure surfaces as [`ClusterError::Fatal`] on whatever call
/// was in flight; the job queue treats that as "daemon disconnected".
pub trait Cluster: Send + Sync {
    /// Every workload running in the cluster, optionally limited to one
    /// namespace.
    fn all_controllers(&self, namespace: Option<&str>) -> Result<Vec<Controller>, ClusterError>;

    /// The subset of `ids` that is actually running.
    fn some_controllers(&self, ids: &[ResourceId]) -> Result<Vec<Controller>, ClusterError>;

    fn ping(&self) -> Result<(), ClusterError>;

    fn apply(&self, ops: &[ApplyOp]) -> Result<ApplyResult, ClusterError>;

    /// Edge-triggered "reconcile now" notification.
    fn sync(&self) -> Result<(), ClusterError>;

    /// Dump the live cluster config.
    fn export(&self) -> Result<Vec<u8>, ClusterError>;

    fn version(&self) -> Result<String, ClusterError>;
}
