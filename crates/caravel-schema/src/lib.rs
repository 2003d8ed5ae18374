//! Identity schemes, spec grammar and result model for the Caravel
//! continuous-delivery control plane.
//!
//! This crate defines the value types shared by every other crate: workload
//! identifiers, image references, release specifications, policies, release
//! results and jobs. All of them serialize as plain strings or small JSON
//! documents so they can travel the HTTP API and the instance database
//! unchanged.

pub mod image;
pub mod job;
pub mod policy;
pub mod release;
pub mod resource;
pub mod spec;
pub mod types;

pub use image::ImageRef;
pub use job::{Job, JobSpec, JobStatus};
pub use policy::{PolicyChange, PolicySet, PolicyUpdates};
pub use release::{ContainerUpdate, ControllerResult, ReleaseResult, ReleaseStatus};
pub use resource::{ResourceId, ResourceKind, DEFAULT_NAMESPACE};
pub use spec::{
    Cause, ImageSpec, ReleaseKind, ReleaseSpec, ResourceSpec, IMAGE_SPEC_LATEST, RESOURCE_SPEC_ALL,
};
pub use types::{derive_job_id, InstanceId, JobId, Revision};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid resource id: {0}")]
    InvalidResourceId(String),
    #[error("unknown resource kind: {0}")]
    UnknownKind(String),
    #[error("invalid image reference: {0}")]
    InvalidImageRef(String),
    #[error("image spec must carry a tag: {0}")]
    ImageSpecWithoutTag(String),
    #[error("invalid release kind: {0}")]
    InvalidReleaseKind(String),
    #[error("release spec names no services")]
    EmptyServiceSpecs,
    #[error("'<all>' cannot be combined with specific services")]
    MixedAllSpec,
}

/// Name of the HTTP header carrying the instance ID on every request.
pub const INSTANCE_ID_HEADER: &str = "X-Scope-OrgID";

/// The four abstract error classes surfaced by the HTTP API.
///
/// `User` maps to 4xx, `Missing` to 404, `Server` to 5xx, `Fatal` (a
/// transport-level daemon failure) to 502.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    User,
    Missing,
    Server,
    Fatal,
}

/// The JSON error envelope every failing API route returns:
/// `{"type": "...", "message": "...", "help": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help: String,
}

impl ErrorKind {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::User => 400,
            ErrorKind::Missing => 404,
            ErrorKind::Server => 500,
            ErrorKind::Fatal => 502,
        }
    }
}
