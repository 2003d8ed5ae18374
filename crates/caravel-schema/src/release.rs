//! Per-workload release outcomes and the result map returned by a release.

use crate::image::ImageRef;
use crate::resource::ResourceId;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

pub mod reason {
    //! Well-known verdict reasons, stable on the wire.
    pub const NOT_IN_CLUSTER: &str = "not in cluster";
    pub const EXCLUDED: &str = "excluded";
    pub const NOT_IN_SPEC: &str = "not in spec";
    pub const LOCKED: &str = "locked";
    pub const IGNORED_BY_POLICY: &str = "ignored by policy";
    pub const NO_CONTAINERS: &str = "no containers";
    pub const UP_TO_DATE: &str = "up to date";
    pub const NO_IMAGE_FOR_PATTERN: &str = "no image satisfies pattern";
}

/// Outcome class for one workload within a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    Success,
    Skipped,
    Ignored,
    Failed,
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReleaseStatus::Success => "success",
            ReleaseStatus::Skipped => "skipped",
            ReleaseStatus::Ignored => "ignored",
            ReleaseStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One planned (or applied) container image change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerUpdate {
    pub container: String,
    pub current: ImageRef,
    pub target: ImageRef,
}

/// The verdict recorded for one workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerResult {
    pub status: ReleaseStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<ContainerUpdate>,
}

impl ControllerResult {
    pub fn success(updates: Vec<ContainerUpdate>) -> Self {
        Self {
            status: ReleaseStatus::Success,
            reason: String::new(),
            updates,
        }
    }

    pub fn skipped(reason: &str) -> Self {
        Self {
            status: ReleaseStatus::Skipped,
            reason: reason.to_owned(),
            updates: Vec::new(),
        }
    }

    pub fn ignored(reason: &str) -> Self {
        Self {
            status: ReleaseStatus::Ignored,
            reason: reason.to_owned(),
            updates: Vec::new(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ReleaseStatus::Failed,
            reason: reason.into(),
            updates: Vec::new(),
        }
    }
}

/// Map from workload to verdict, iterated in canonical ID order so results
/// are deterministic and byte-identical for identical inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseResult(BTreeMap<ResourceId, ControllerResult>);

impl ReleaseResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ResourceId, result: ControllerResult) {
        self.0.insert(id, result);
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<ControllerResult> {
        self.0.remove(id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ControllerResult> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.0.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, ResourceId, ControllerResult> {
        self.0.iter()
    }

    /// IDs of workloads with a SUCCESS verdict, in canonical order.
    pub fn successes(&self) -> Vec<&ResourceId> {
        self.0
            .iter()
            .filter(|(_, r)| r.status == ReleaseStatus::Success)
            .map(|(id, _)| id)
            .collect()
    }

    /// Replace a SUCCESS verdict with FAILED, keeping the planned updates
    /// so the record still shows what was attempted.
    pub fn downgrade_to_failed(&mut self, id: &ResourceId, reason: impl Into<String>) {
        if let Some(entry) = self.0.get_mut(id) {
            entry.status = ReleaseStatus::Failed;
            entry.reason = reason.into();
        }
    }
}

impl<'a> IntoIterator for &'a ReleaseResult {
    type Item = (&'a ResourceId, &'a ControllerResult);
    type IntoIter = btree_map::Iter<'a, ResourceId, ControllerResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
