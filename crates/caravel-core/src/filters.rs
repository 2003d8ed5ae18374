//! The layered per-workload filter pipeline.
//!
//! Filters are pure predicates over a [`ControllerUpdate`]. The pipeline
//! applies them in the order given; the first non-success verdict wins
//! (see [`ControllerUpdate::filter`]). Which filters are active for a
//! release is decided by the planner from the release spec.

use crate::update::ControllerUpdate;
use caravel_schema::release::reason;
use caravel_schema::{ControllerResult, ReleaseStatus, ResourceId, ResourceSpec};

/// A per-workload predicate producing a status + reason.
pub trait Filter {
    fn filter(&self, update: &ControllerUpdate) -> ControllerResult;
}

fn pass() -> ControllerResult {
    ControllerResult {
        status: ReleaseStatus::Success,
        reason: String::new(),
        updates: Vec::new(),
    }
}

/// Drops workloads named on the release's exclude list.
pub struct ExcludeFilter {
    excludes: Vec<ResourceId>,
}

impl ExcludeFilter {
    pub fn new(excludes: &[ResourceId]) -> Self {
        Self {
            excludes: excludes.to_vec(),
        }
    }
}

impl Filter for ExcludeFilter {
    fn filter(&self, update: &ControllerUpdate) -> ControllerResult {
        if self.excludes.contains(&update.resource_id) {
            return ControllerResult::ignored(reason::EXCLUDED);
        }
        pass()
    }
}

/// Drops workloads the release spec does not name.
pub struct SpecFilter {
    specs: Vec<ResourceSpec>,
}

impl SpecFilter {
    pub fn new(specs: &[ResourceSpec]) -> Self {
        Self {
            specs: specs.to_vec(),
        }
    }

    fn matches(&self, id: &ResourceId) -> bool {
        self.specs.iter().any(|spec| match spec {
            ResourceSpec::All => true,
            ResourceSpec::Id(want) => want == id,
        })
    }
}

impl Filter for SpecFilter {
    fn filter(&self, update: &ControllerUpdate) -> ControllerResult {
        if !self.matches(&update.resource_id) {
            return ControllerResult::ignored(reason::NOT_IN_SPEC);
        }
        pass()
    }
}

/// Skips workloads carrying the `locked` policy.
pub struct LockedFilter;

impl Filter for LockedFilter {
    fn filter(&self, update: &ControllerUpdate) -> ControllerResult {
        if update.workload.policies.locked {
            return ControllerResult::skipped(reason::LOCKED);
        }
        pass()
    }
}

/// Drops workloads carrying the `ignore` policy.
pub struct IgnoreFilter;

impl Filter for IgnoreFilter {
    fn filter(&self, update: &ControllerUpdate) -> ControllerResult {
        if update.workload.policies.ignore {
            return ControllerResult::ignored(reason::IGNORED_BY_POLICY);
        }
        pass()
    }
}

/// Skips workloads whose live snapshot reports no containers.
pub struct NoContainersFilter;

impl Filter for NoContainersFilter {
    fn filter(&self, update: &ControllerUpdate) -> ControllerResult {
        let empty = update
            .controller
            .as_ref()
            .map_or(true, |c| c.containers.is_empty());
        if empty {
            return ControllerResult::skipped(reason::NO_CONTAINERS);
        }
        pass()
    }
}

/// Skips workloads whose every targeted container is already at the target
/// image. Meaningful only after the planner has resolved targets.
pub struct UpToDateFilter;

impl Filter for UpToDateFilter {
    fn filter(&self, update: &ControllerUpdate) -> ControllerResult {
        if update.updates.is_empty() {
            return ControllerResult::skipped(reason::UP_TO_DATE);
        }
        pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_cluster::{Container, Controller, Workload};
    use caravel_schema::PolicySet;
    use std::path::PathBuf;

    fn update(id: &str) -> ControllerUpdate {
        let id: ResourceId = id.parse().unwrap();
        ControllerUpdate::new(
            id.clone(),
            PathBuf::from("m.toml"),
            Vec::new(),
            Workload {
                id,
                policies: PolicySet::default(),
                containers: Vec::new(),
            },
        )
    }

    #[test]
    fn exclude_filter_ignores_listed_ids() {
        let filter = ExcludeFilter::new(&["default:deployment/e".parse().unwrap()]);
        let verdict = filter.filter(&update("default:deployment/e"));
        assert_eq!(verdict.status, ReleaseStatus::Ignored);
        assert_eq!(verdict.reason, reason::EXCLUDED);
        assert_eq!(
            filter.filter(&update("default:deployment/x")).status,
            ReleaseStatus::Success
        );
    }

    #[test]
    fn spec_filter_ignores_unnamed_ids() {
        let filter = SpecFilter::new(&["default:deployment/web".parse().unwrap()]);
        assert_eq!(
            filter.filter(&update("default:deployment/web")).status,
            ReleaseStatus::Success
        );
        let verdict = filter.filter(&update("default:deployment/api"));
        assert_eq!(verdict.status, ReleaseStatus::Ignored);
        assert_eq!(verdict.reason, reason::NOT_IN_SPEC);
    }

    #[test]
    fn spec_filter_all_passes_everything() {
        let filter = SpecFilter::new(&[ResourceSpec::All]);
        assert_eq!(
            filter.filter(&update("prod:cronjob/backup")).status,
            ReleaseStatus::Success
        );
    }

    #[test]
    fn locked_filter_skips_locked_workloads() {
        let mut u = update("default:deployment/web");
        u.workload.policies.locked = true;
        let verdict = LockedFilter.filter(&u);
        assert_eq!(verdict.status, ReleaseStatus::Skipped);
        assert_eq!(verdict.reason, reason::LOCKED);
    }

    #[test]
    fn ignore_filter_drops_ignored_workloads() {
        let mut u = update("default:deployment/web");
        u.workload.policies.ignore = true;
        let verdict = IgnoreFilter.filter(&u);
        assert_eq!(verdict.status, ReleaseStatus::Ignored);
        assert_eq!(verdict.reason, reason::IGNORED_BY_POLICY);
    }

    #[test]
    fn no_containers_filter_uses_live_snapshot() {
        let mut u = update("default:deployment/web");
        assert_eq!(
            NoContainersFilter.filter(&u).status,
            ReleaseStatus::Skipped
        );

        u.controller = Some(Controller {
            id: u.resource_id.clone(),
            containers: vec![Container {
                name: "main".to_owned(),
                image: "acme/web:1".parse().unwrap(),
            }],
            status: String::new(),
        });
        assert_eq!(NoContainersFilter.filter(&u).status, ReleaseStatus::Success);
    }

    #[test]
    fn up_to_date_filter_skips_empty_plans() {
        let mut u = update("default:deployment/web");
        let verdict = UpToDateFilter.filter(&u);
        assert_eq!(verdict.status, ReleaseStatus::Skipped);
        assert_eq!(verdict.reason, reason::UP_TO_DATE);

        u.updates.push(caravel_schema::ContainerUpdate {
            container: "main".to_owned(),
            current: "acme/web:1".parse().unwrap(),
            target: "acme/web:2".parse().unwrap(),
        });
        assert_eq!(UpToDateFilter.filter(&u).status, ReleaseStatus::Success);
    }
}
