//! Instances: one tenant = one repository, one cluster, one daemon
//! session, one job queue.

use crate::bridge::Platform;
use crate::db::Database;
use crate::error::ApiError;
use crate::events::{derive_event_id, Event, EventKind, EventMetadata};
use caravel_cluster::{ApplyOp, ApplyResult, Cluster, ClusterError, Controller, Manifests};
use caravel_core::{
    execute_policy_update, release, Deadline, JobOutcome, JobQueue, JobSink, ReleaseContext,
};
use caravel_registry::Catalog;
use caravel_repo::{Checkout, CheckoutConfig};
use caravel_schema::{
    InstanceId, Job, JobSpec, ReleaseKind, ReleaseResult, ResourceId, Revision,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

fn default_branch() -> String {
    "main".to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Clone URL of the manifest repository.
    pub git_url: String,
    #[serde(default = "default_branch")]
    pub git_branch: String,
    /// Subdirectory of the repository holding the manifests.
    #[serde(default)]
    pub git_path: Option<String>,
    /// Path to the image catalog JSON file; an empty catalog when absent.
    #[serde(default)]
    pub registry_catalog: Option<String>,
    /// Fallback deploy key when the daemon cannot provide one.
    #[serde(default)]
    pub public_ssh_key: Option<String>,
}

/// Partial config update; only fields that do not require a fresh clone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    #[serde(default)]
    pub registry_catalog: Option<String>,
    #[serde(default)]
    pub public_ssh_key: Option<String>,
}

/// State shared between the HTTP handlers, the job runner and the daemon
/// bridge. The job queue deliberately lives outside this struct: the
/// runner closure holds the shared state, never the queue, so lifetimes
/// stay nested.
pub struct InstanceShared {
    pub id: InstanceId,
    config: Mutex<InstanceConfig>,
    pub checkout: Arc<Checkout>,
    pub registry: Arc<Catalog>,
    daemon: RwLock<Option<Arc<Platform>>>,
    db: Arc<Database>,
    event_seq: AtomicU64,
}

impl InstanceShared {
    pub fn config(&self) -> InstanceConfig {
        self.config.lock().expect("config lock poisoned").clone()
    }

    pub fn patch_config(&self, patch: ConfigPatch) -> InstanceConfig {
        let mut config = self.config.lock().expect("config lock poisoned");
        if let Some(catalog) = patch.registry_catalog {
            config.registry_catalog = Some(catalog);
        }
        if let Some(key) = patch.public_ssh_key {
            config.public_ssh_key = Some(key);
        }
        config.clone()
    }

    /// The live daemon session, if one is registered and alive.
    pub fn daemon(&self) -> Result<Arc<Platform>, ClusterError> {
        let daemon = self.daemon.read().expect("daemon lock poisoned");
        match daemon.as_ref() {
            Some(platform) if platform.is_alive() => Ok(Arc::clone(platform)),
            _ => Err(ClusterError::NoDaemon),
        }
    }

    /// Register a new daemon session, closing any previous one.
    pub fn set_daemon(&self, platform: Arc<Platform>) {
        let mut daemon = self.daemon.write().expect("daemon lock poisoned");
        if let Some(old) = daemon.replace(platform) {
            old.close();
        }
        info!("instance {}: daemon registered", self.id);
    }

    pub fn disconnect_daemon(&self) {
        let mut daemon = self.daemon.write().expect("daemon lock poisoned");
        if let Some(old) = daemon.take() {
            old.close();
            warn!("instance {}: daemon disconnected", self.id);
        }
    }

    fn log_event(
        &self,
        job: &Job,
        resource_ids: Vec<ResourceId>,
        result: Option<&ReleaseResult>,
        revision: Option<&Revision>,
        kind: EventKind,
        started_at: chrono::DateTime<Utc>,
    ) {
        let ended_at = Utc::now();
        let seq = self.event_seq.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id: derive_event_id(&self.id, ended_at, seq),
            message: if job.cause.message.is_empty() {
                format!("{}: {} workloads", kind.as_str(), resource_ids.len())
            } else {
                job.cause.message.clone()
            },
            resource_ids,
            kind,
            started_at,
            ended_at,
            metadata: Some(EventMetadata {
                cause: job.cause.clone(),
                result: result.cloned(),
                revision: revision.cloned(),
            }),
        };
        if let Err(e) = self.db.log_event(&self.id, &event) {
            warn!("instance {}: failed to record event: {e}", self.id);
        }
    }
}

/// Cluster stand-in for jobs that never touch the cluster (policy
/// updates); any call is a missing-daemon error.
struct NoCluster;

impl Cluster for NoCluster {
    fn all_controllers(&self, _: Option<&str>) -> Result<Vec<Controller>, ClusterError> {
        Err(ClusterError::NoDaemon)
    }
    fn some_controllers(&self, _: &[ResourceId]) -> Result<Vec<Controller>, ClusterError> {
        Err(ClusterError::NoDaemon)
    }
    fn ping(&self) -> Result<(), ClusterError> {
        Err(ClusterError::NoDaemon)
    }
    fn apply(&self, _: &[ApplyOp]) -> Result<ApplyResult, ClusterError> {
        Err(ClusterError::NoDaemon)
    }
    fn sync(&self) -> Result<(), ClusterError> {
        Err(ClusterError::NoDaemon)
    }
    fn export(&self) -> Result<Vec<u8>, ClusterError> {
        Err(ClusterError::NoDaemon)
    }
    fn version(&self) -> Result<String, ClusterError> {
        Err(ClusterError::NoDaemon)
    }
}

struct DbSink {
    db: Arc<Database>,
}

impl JobSink for DbSink {
    fn record(&self, job: &Job) {
        if let Err(e) = self.db.upsert_job(job) {
            warn!("failed to persist job {}: {e}", job.id);
        }
    }
}

pub struct Instance {
    pub shared: Arc<InstanceShared>,
    pub queue: JobQueue,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.shared.id)
            .finish()
    }
}

impl Instance {
    /// Clone the instance's repository, load its catalog, and start its
    /// job worker.
    pub fn create(
        id: InstanceId,
        config: InstanceConfig,
        db: Arc<Database>,
        data_dir: &Path,
    ) -> Result<Self, ApiError> {
        let workdir = instance_workdir(data_dir, &id);
        let checkout_config = CheckoutConfig {
            url: config.git_url.clone(),
            branch: config.git_branch.clone(),
            path: config.git_path.clone(),
        };
        let checkout = if workdir.join(".git").exists() {
            Checkout::open(&workdir, &checkout_config.branch, checkout_config.path.as_deref())
        } else {
            Checkout::clone_from(&checkout_config, &workdir)
        };
        let checkout = checkout
            .map_err(|e| ApiError::user(format!("cannot check out {}: {e}", config.git_url)))?;

        let registry = match &config.registry_catalog {
            Some(path) => Catalog::load(Path::new(path)).unwrap_or_else(|e| {
                warn!("instance {id}: cannot load catalog {path}: {e}");
                Catalog::new()
            }),
            None => Catalog::new(),
        };

        let shared = Arc::new(InstanceShared {
            id: id.clone(),
            config: Mutex::new(config),
            checkout: Arc::new(checkout),
            registry: Arc::new(registry),
            daemon: RwLock::new(None),
            db: Arc::clone(&db),
            event_seq: AtomicU64::new(0),
        });

        let runner_shared = Arc::clone(&shared);
        let queue = JobQueue::new(
            id,
            move |job| run_job(&runner_shared, job),
            Some(Arc::new(DbSink { db })),
        );

        Ok(Self { shared, queue })
    }
}

/// Execute one job against the instance's views. Errors become the job's
/// error string; a daemon transport loss additionally tears the session
/// down so the instance reads as disconnected.
fn run_job(shared: &Arc<InstanceShared>, job: &Job) -> JobOutcome {
    let deadline = Deadline::for_queued_job();
    let started_at = Utc::now();

    match &job.spec {
        JobSpec::Release(spec) => {
            let daemon = match shared.daemon() {
                Ok(daemon) => daemon,
                Err(e) => {
                    return JobOutcome {
                        error: Some(e.to_string()),
                        ..JobOutcome::default()
                    }
                }
            };
            let ctx = ReleaseContext::new(
                daemon.as_ref(),
                Manifests::new(),
                shared.registry.as_ref(),
                &shared.checkout,
            );
            match release(spec, &ctx, &job.cause, &deadline) {
                Ok((result, revision)) => {
                    if spec.kind == ReleaseKind::Execute {
                        let released: Vec<ResourceId> =
                            result.successes().into_iter().cloned().collect();
                        shared.log_event(
                            job,
                            released,
                            Some(&result),
                            revision.as_ref(),
                            EventKind::Release,
                            started_at,
                        );
                    }
                    JobOutcome {
                        result: Some(result),
                        revision,
                        error: None,
                    }
                }
                Err(e) if e.is_daemon_fatal() => {
                    shared.disconnect_daemon();
                    JobOutcome {
                        error: Some(format!("daemon disconnected: {e}")),
                        ..JobOutcome::default()
                    }
                }
                Err(e) => JobOutcome {
                    error: Some(e.to_string()),
                    ..JobOutcome::default()
                },
            }
        }
        JobSpec::Policy(updates) => {
            let ctx = ReleaseContext::new(
                &NoCluster,
                Manifests::new(),
                shared.registry.as_ref(),
                &shared.checkout,
            );
            match execute_policy_update(&ctx, updates, &job.cause, &deadline) {
                Ok(revision) => {
                    shared.log_event(
                        job,
                        updates.keys().cloned().collect(),
                        None,
                        revision.as_ref(),
                        EventKind::PolicyUpdate,
                        started_at,
                    );
                    JobOutcome {
                        revision,
                        ..JobOutcome::default()
                    }
                }
                Err(e) => JobOutcome {
                    error: Some(e.to_string()),
                    ..JobOutcome::default()
                },
            }
        }
    }
}

fn instance_workdir(data_dir: &Path, id: &InstanceId) -> PathBuf {
    // Instance IDs are opaque and may not be filesystem-safe.
    let dir = blake3::hash(id.as_str().as_bytes()).to_hex().to_string();
    data_dir.join("instances").join(&dir[..16]).join("work")
}

/// All known instances, created on configuration and recreated from the
/// database on startup.
pub struct InstanceRegistry {
    db: Arc<Database>,
    data_dir: PathBuf,
    instances: RwLock<HashMap<InstanceId, Arc<Instance>>>,
}

impl InstanceRegistry {
    pub fn new(db: Arc<Database>, data_dir: PathBuf) -> Self {
        Self {
            db,
            data_dir,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &InstanceId) -> Option<Arc<Instance>> {
        self.instances
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Look up an instance or fail with the API's "not registered" error.
    pub fn require(&self, id: &InstanceId) -> Result<Arc<Instance>, ApiError> {
        self.get(id)
            .ok_or_else(|| ApiError::missing(format!("instance {id} is not registered")))
    }

    /// Create (or replace) an instance from a full configuration and
    /// persist the configuration.
    pub fn configure(
        &self,
        id: InstanceId,
        config: InstanceConfig,
    ) -> Result<Arc<Instance>, ApiError> {
        // Drop any previous incarnation first so its process lock and job
        // worker are gone before the fresh clone.
        self.instances
            .write()
            .expect("registry lock poisoned")
            .remove(&id);

        let instance = Arc::new(Instance::create(
            id.clone(),
            config.clone(),
            Arc::clone(&self.db),
            &self.data_dir,
        )?);
        self.db
            .set_config(&id, &config)
            .map_err(|e| ApiError::server(e.to_string()))?;
        self.instances
            .write()
            .expect("registry lock poisoned")
            .insert(id, Arc::clone(&instance));
        Ok(instance)
    }

    /// Recreate every instance recorded in the database (on startup).
    pub fn restore(&self) {
        let ids = match self.db.instance_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!("cannot enumerate persisted instances: {e}");
                return;
            }
        };
        for id in ids {
            match self.db.get_config(&id) {
                Ok(Some(config)) => {
                    if let Err(e) = self.configure(id.clone(), config) {
                        warn!("instance {id}: restore failed: {}", e.message);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("instance {id}: restore failed: {e}"),
            }
        }
    }
}
