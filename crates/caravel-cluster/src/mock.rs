//! An in-memory cluster for tests: seedable controllers, recorded applies,
//! injectable failures.

use crate::cluster::{ApplyOp, ApplyResult, Cluster, Container, Controller};
use crate::ClusterError;
use caravel_schema::ResourceId;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockCluster {
    controllers: Mutex<BTreeMap<ResourceId, Controller>>,
    applied: Mutex<Vec<ApplyOp>>,
    apply_errors: Mutex<BTreeMap<ResourceId, String>>,
    sync_count: AtomicUsize,
    disconnected: AtomicBool,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a workload as running with the given containers.
    pub fn run(&self, id: &ResourceId, containers: &[(&str, &str)]) {
        let controller = Controller {
            id: id.clone(),
            containers: containers
                .iter()
                .map(|(name, image)| Container {
                    name: (*name).to_owned(),
                    image: image.parse().expect("valid image in test"),
                })
                .collect(),
            status: "ready".to_owned(),
        };
        self.controllers
            .lock()
            .expect("mock lock poisoned")
            .insert(id.clone(), controller);
    }

    /// Make `apply` report a per-workload error for `id`.
    pub fn fail_apply(&self, id: &ResourceId, message: &str) {
        self.apply_errors
            .lock()
            .expect("mock lock poisoned")
            .insert(id.clone(), message.to_owned());
    }

    /// Simulate a dropped daemon session: every call turns fatal.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<ApplyOp> {
        self.applied.lock().expect("mock lock poisoned").clone()
    }

    pub fn sync_count(&self) -> usize {
        self.sync_count.load(Ordering::SeqCst)
    }

    fn check_connected(&self) -> Result<(), ClusterError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(ClusterError::Fatal("connection closed".to_owned()));
        }
        Ok(())
    }
}

impl Cluster for MockCluster {
    fn all_controllers(&self, namespace: Option<&str>) -> Result<Vec<Controller>, ClusterError> {
        self.check_connected()?;
        let controllers = self.controllers.lock().expect("mock lock poisoned");
        Ok(controllers
            .values()
            .filter(|c| namespace.map_or(true, |ns| c.id.namespace() == ns))
            .cloned()
            .collect())
    }

    fn some_controllers(&self, ids: &[ResourceId]) -> Result<Vec<Controller>, ClusterError> {
        self.check_connected()?;
        let controllers = self.controllers.lock().expect("mock lock poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| controllers.get(id).cloned())
            .collect())
    }

    fn ping(&self) -> Result<(), ClusterError> {
        self.check_connected()
    }

    fn apply(&self, ops: &[ApplyOp]) -> Result<ApplyResult, ClusterError> {
        self.check_connected()?;
        self.applied
            .lock()
            .expect("mock lock poisoned")
            .extend(ops.iter().cloned());

        let injected = self.apply_errors.lock().expect("mock lock poisoned");
        let mut result = ApplyResult::default();
        for op in ops {
            if let Some(message) = injected.get(&op.id) {
                result.errors.insert(op.id.clone(), message.clone());
            }
        }
        Ok(result)
    }

    fn sync(&self) -> Result<(), ClusterError> {
        self.check_connected()?;
        self.sync_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn export(&self) -> Result<Vec<u8>, ClusterError> {
        self.check_connected()?;
        let controllers = self.controllers.lock().expect("mock lock poisoned");
        let ids: Vec<String> = controllers.keys().map(ToString::to_string).collect();
        serde_json::to_vec(&ids).map_err(|e| ClusterError::Rpc(e.to_string()))
    }

    fn version(&self) -> Result<String, ClusterError> {
        self.check_connected()?;
        Ok("mock".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[test]
    fn some_controllers_returns_only_running_subset() {
        let mock = MockCluster::new();
        mock.run(&id("default:deployment/a"), &[("main", "acme/a:1")]);

        let found = mock
            .some_controllers(&[id("default:deployment/a"), id("default:deployment/b")])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id("default:deployment/a"));
    }

    #[test]
    fn apply_records_ops_and_reports_injected_errors() {
        let mock = MockCluster::new();
        mock.fail_apply(&id("default:deployment/bad"), "rejected");

        let ops = vec![
            ApplyOp {
                id: id("default:deployment/good"),
                manifest: "kind = \"deployment\"".to_owned(),
            },
            ApplyOp {
                id: id("default:deployment/bad"),
                manifest: "kind = \"deployment\"".to_owned(),
            },
        ];
        let result = mock.apply(&ops).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(mock.applied().len(), 2);
    }

    #[test]
    fn disconnect_turns_calls_fatal() {
        let mock = MockCluster::new();
        mock.disconnect();
        let err = mock.ping().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn all_controllers_filters_by_namespace() {
        let mock = MockCluster::new();
        mock.run(&id("default:deployment/a"), &[]);
        mock.run(&id("prod:deployment/b"), &[]);

        assert_eq!(mock.all_controllers(None).unwrap().len(), 2);
        assert_eq!(mock.all_controllers(Some("prod")).unwrap().len(), 1);
    }
}
