//! Workload policies, read from manifest annotations and mutated by
//! policy-update jobs.

use crate::resource::ResourceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key prefix for per-container tag patterns: `tag-pattern.<container>`.
pub const TAG_PATTERN_PREFIX: &str = "tag-pattern.";

pub const POLICY_LOCKED: &str = "locked";
pub const POLICY_IGNORE: &str = "ignore";
pub const POLICY_AUTOMATED: &str = "automated";

/// The policies attached to one workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub ignore: bool,
    #[serde(default)]
    pub automated: bool,
    /// Per-container glob constraining which tags are eligible for
    /// "latest" resolution.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tag_patterns: BTreeMap<String, String>,
}

impl PolicySet {
    pub fn tag_pattern(&self, container: &str) -> Option<&str> {
        self.tag_patterns.get(container).map(String::as_str)
    }
}

/// One requested policy change: keys to set (with values) and keys to clear.
///
/// Boolean policies use the value `"true"`; tag patterns use the glob text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyChange {
    #[serde(default)]
    pub add: BTreeMap<String, String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

/// Policy changes keyed by the workload they apply to.
pub type PolicyUpdates = BTreeMap<ResourceId, PolicyChange>;
