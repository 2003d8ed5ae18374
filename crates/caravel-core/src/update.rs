//! Per-workload working state inside one release.

use crate::filters::Filter;
use caravel_cluster::{Controller, Workload};
use caravel_schema::{ContainerUpdate, ControllerResult, ReleaseStatus, ResourceId};
use std::path::PathBuf;

/// One workload as the release engine works on it: the declared manifest,
/// the live snapshot once correlated with the cluster, and the container
/// updates the planner has decided on.
#[derive(Debug, Clone)]
pub struct ControllerUpdate {
    pub resource_id: ResourceId,
    pub manifest_path: PathBuf,
    pub manifest_bytes: Vec<u8>,
    /// Structured view of the manifest (policies, declared containers).
    pub workload: Workload,
    /// Live snapshot, attached only after correlation with the cluster.
    pub controller: Option<Controller>,
    /// Planned container updates; empty until the planner has resolved
    /// target images.
    pub updates: Vec<ContainerUpdate>,
}

impl ControllerUpdate {
    pub fn new(
        resource_id: ResourceId,
        manifest_path: PathBuf,
        manifest_bytes: Vec<u8>,
        workload: Workload,
    ) -> Self {
        Self {
            resource_id,
            manifest_path,
            manifest_bytes,
            workload,
            controller: None,
            updates: Vec::new(),
        }
    }

    /// Run the filter pipeline: the first non-success verdict wins. A full
    /// pass yields SUCCESS carrying the planned updates.
    pub fn filter(&self, filters: &[&dyn Filter]) -> ControllerResult {
        for filter in filters {
            let verdict = filter.filter(self);
            if verdict.status != ReleaseStatus::Success {
                return verdict;
            }
        }
        ControllerResult::success(self.updates.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_schema::release::reason;
    use caravel_schema::PolicySet;

    struct Always(ControllerResult);
    impl Filter for Always {
        fn filter(&self, _update: &ControllerUpdate) -> ControllerResult {
            self.0.clone()
        }
    }

    fn update() -> ControllerUpdate {
        let id: ResourceId = "default:deployment/web".parse().unwrap();
        ControllerUpdate::new(
            id.clone(),
            PathBuf::from("web.toml"),
            Vec::new(),
            Workload {
                id,
                policies: PolicySet::default(),
                containers: Vec::new(),
            },
        )
    }

    #[test]
    fn first_non_success_verdict_wins() {
        let pass = Always(ControllerResult::success(vec![]));
        let skip = Always(ControllerResult::skipped(reason::LOCKED));
        let ignore = Always(ControllerResult::ignored(reason::EXCLUDED));

        let verdict = update().filter(&[&pass, &skip, &ignore]);
        assert_eq!(verdict.status, ReleaseStatus::Skipped);
        assert_eq!(verdict.reason, reason::LOCKED);
    }

    #[test]
    fn all_pass_yields_success() {
        let pass = Always(ControllerResult::success(vec![]));
        let verdict = update().filter(&[&pass, &pass]);
        assert_eq!(verdict.status, ReleaseStatus::Success);
    }

    #[test]
    fn empty_pipeline_is_success() {
        let verdict = update().filter(&[]);
        assert_eq!(verdict.status, ReleaseStatus::Success);
    }
}
