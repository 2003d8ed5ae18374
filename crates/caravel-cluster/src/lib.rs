//! The two cluster-facing views of the release engine: the *Manifests*
//! view (structured read and mutate operations over workload manifest
//! files in the repository checkout) and the *Cluster* trait (a snapshot
//! of what is actually running, served by the in-cluster daemon).

pub mod cluster;
pub mod manifests;
pub mod mock;

pub use cluster::{ApplyOp, ApplyResult, Cluster, Container, Controller};
pub use manifests::{Manifests, Workload};
pub use mock::MockCluster;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("schema error: {0}")]
    Schema(#[from] caravel_schema::SchemaError),
    #[error("invalid manifest {path}: {message}")]
    InvalidManifest { path: String, message: String },
    #[error("no daemon connected")]
    NoDaemon,
    #[error("daemon RPC failed: {0}")]
    Rpc(String),
    /// Transport-level failure: the daemon session is gone.
    #[error("daemon connection lost: {0}")]
    Fatal(String),
}

impl ClusterError {
    /// Whether this error means the daemon session itself is dead.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClusterError::Fatal(_))
    }
}
