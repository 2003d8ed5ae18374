//! The per-release capability bundle.
//!
//! A `ReleaseContext` binds one cluster view, one manifests view, one
//! registry view and one repository checkout for the lifetime of a single
//! release computation, and is destroyed afterward.

use crate::filters::Filter;
use crate::update::ControllerUpdate;
use crate::CoreError;
use caravel_cluster::{Cluster, Manifests};
use caravel_registry::Registry;
use caravel_repo::Checkout;
use caravel_schema::release::reason;
use caravel_schema::{ControllerResult, ReleaseResult, ReleaseStatus, ResourceId};
use std::collections::BTreeMap;
use tracing::debug;

pub struct ReleaseContext<'a> {
    cluster: &'a dyn Cluster,
    manifests: Manifests,
    registry: &'a dyn Registry,
    checkout: &'a Checkout,
}

impl<'a> ReleaseContext<'a> {
    pub fn new(
        cluster: &'a dyn Cluster,
        manifests: Manifests,
        registry: &'a dyn Registry,
        checkout: &'a Checkout,
    ) -> Self {
        Self {
            cluster,
            manifests,
            registry,
            checkout,
        }
    }

    pub fn cluster(&self) -> &dyn Cluster {
        self.cluster
    }

    pub fn manifests(&self) -> &Manifests {
        &self.manifests
    }

    pub fn registry(&self) -> &dyn Registry {
        self.registry
    }

    pub fn checkout(&self) -> &Checkout {
        self.checkout
    }

    /// Enumerate every workload declared in the checkout, holding the
    /// shared lock for the whole read. More than one manifest path for the
    /// same resource fails the release: that is a user error in the
    /// repository, not a warning.
    pub fn find_defined_services(&self) -> Result<Vec<ControllerUpdate>, CoreError> {
        self.checkout
            .with_read(|tree| -> Result<Vec<ControllerUpdate>, CoreError> {
                let defined = self.manifests.find_defined(tree.manifest_dir())?;
                let mut services = Vec::with_capacity(defined.len());
                for (id, paths) in defined {
                    match paths.as_slice() {
                        [path] => {
                            let bytes = tree.read_file(path)?;
                            let workload = self.manifests.parse(path, &bytes)?;
                            services.push(ControllerUpdate::new(
                                id,
                                path.clone(),
                                bytes,
                                workload,
                            ));
                        }
                        paths => {
                            return Err(CoreError::MultipleManifests {
                                id,
                                paths: paths
                                    .iter()
                                    .map(|p| p.display().to_string())
                                    .collect::<Vec<_>>()
                                    .join(", "),
                            });
                        }
                    }
                }
                Ok(services)
            })
    }

    /// Find the services that exist both in the definition files and the
    /// running cluster, applying `filters` to each. Earlier filters have
    /// higher priority. Verdicts land in `result`; the returned updates are
    /// the survivors, in canonical ID order.
    pub fn select_services(
        &self,
        result: &mut ReleaseResult,
        filters: &[&dyn Filter],
    ) -> Result<Vec<ControllerUpdate>, CoreError> {
        let defined = self.find_defined_services()?;

        let ids: Vec<ResourceId> = defined.iter().map(|u| u.resource_id.clone()).collect();
        let mut defined_map: BTreeMap<ResourceId, ControllerUpdate> = defined
            .into_iter()
            .map(|u| (u.resource_id.clone(), u))
            .collect();

        // Correlate with workloads in the running cluster.
        let running = self.cluster.some_controllers(&ids)?;
        debug!("{} defined, {} running", ids.len(), running.len());

        let mut selected = Vec::new();
        for controller in running {
            // Running but not defined: out of release scope.
            let Some(mut update) = defined_map.remove(&controller.id) else {
                continue;
            };
            update.controller = Some(controller);
            let verdict = update.filter(filters);
            let passed = verdict.status == ReleaseStatus::Success;
            result.insert(update.resource_id.clone(), verdict);
            if passed {
                selected.push(update);
            }
        }

        // Defined but not running: filtered verdicts stand, anything left
        // over is skipped as not in the cluster.
        for (id, update) in defined_map {
            let verdict = update.filter(filters);
            if verdict.status == ReleaseStatus::Ignored {
                result.insert(id, verdict);
            } else {
                result.insert(id, ControllerResult::skipped(reason::NOT_IN_CLUSTER));
            }
        }

        selected.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(selected)
    }

    /// Overwrite each update's manifest file with its rewritten bytes,
    /// holding the exclusive lock across all files. Atomicity is per file;
    /// cross-file atomicity comes from the surrounding commit.
    pub fn write_updates(&self, updates: &[ControllerUpdate]) -> Result<(), CoreError> {
        self.checkout.with_write(|tree| -> Result<(), CoreError> {
            for update in updates {
                tree.write_file(&update.manifest_path, &update.manifest_bytes)?;
            }
            Ok(())
        })
    }
}
