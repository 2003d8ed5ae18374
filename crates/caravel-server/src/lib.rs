//! HTTP surface of the Caravel control plane.
//!
//! Serves the versioned public API (`/v6`, with deprecated `/v3`–`/v5`
//! aliases mapping to the same handlers), brokers release and policy jobs
//! into per-instance queues, and accepts inbound daemon registrations by
//! upgrading the HTTP connection into the bidirectional RPC session the
//! release engine calls the cluster through.
//!
//! The [`TestServer`] helper starts the whole stack on a random port for
//! integration testing.

pub mod bridge;
pub mod db;
pub mod error;
pub mod events;
pub mod github;
pub mod instance;
pub mod query;

pub use bridge::{Platform, ProtocolVersion};
pub use db::Database;
pub use error::ApiError;
pub use events::{Event, EventKind};
pub use instance::{ConfigPatch, Instance, InstanceConfig, InstanceRegistry};

use caravel_cluster::{Cluster, Container, Manifests};
use caravel_registry::{ImageInfo, Registry};
use caravel_schema::{
    Cause, ImageSpec, InstanceId, JobId, JobSpec, PolicySet, PolicyUpdates, ReleaseKind,
    ReleaseSpec, ResourceId, ResourceSpec, Revision,
};
use chrono::{DateTime, Utc};
use query::{form_value, form_values, parse_form, split_url};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, error, info};

pub use caravel_schema::{ErrorEnvelope, INSTANCE_ID_HEADER};

pub struct ApiServer {
    pub db: Arc<Database>,
    pub instances: InstanceRegistry,
}

impl ApiServer {
    /// Open (or create) the server state under `data_dir` and restore the
    /// instances persisted there.
    pub fn new(data_dir: PathBuf) -> Result<Self, db::DbError> {
        let db = Arc::new(Database::open(&data_dir.join("caravel.db"))?);
        let instances = InstanceRegistry::new(Arc::clone(&db), data_dir);
        let server = Self { db, instances };
        server.instances.restore();
        Ok(server)
    }
}

enum Reply {
    Json(serde_json::Value),
    Data(Vec<u8>, &'static str),
    Empty(u16),
}

// --- response shapes ---

#[derive(Serialize)]
struct ServiceStatus {
    id: ResourceId,
    containers: Vec<Container>,
    policies: PolicySet,
    status: String,
}

#[derive(Serialize)]
struct ContainerImages {
    name: String,
    current: String,
    available: Vec<ImageInfo>,
}

#[derive(Serialize)]
struct ImageStatus {
    id: ResourceId,
    containers: Vec<ContainerImages>,
}

#[derive(Serialize)]
struct DaemonStatus {
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    instance: InstanceId,
    daemon: DaemonStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    head_revision: Option<Revision>,
}

fn request_instance(req: &tiny_http::Request) -> InstanceId {
    req.headers()
        .iter()
        .find(|h| h.field.equiv(INSTANCE_ID_HEADER))
        .map(|h| InstanceId::new(h.value.as_str()))
        .unwrap_or_else(InstanceId::single_tenant)
}

fn read_body(req: &mut tiny_http::Request) -> Result<String, ApiError> {
    let mut body = String::new();
    req.as_reader()
        .read_to_string(&mut body)
        .map_err(|e| ApiError::user(format!("unreadable request body: {e}")))?;
    Ok(body)
}

fn respond(req: tiny_http::Request, reply: Reply) {
    let result = match reply {
        Reply::Json(value) => {
            let header =
                Header::from_bytes("Content-Type", "application/json").expect("valid header");
            let body = serde_json::to_vec(&value).unwrap_or_else(|_| b"null".to_vec());
            req.respond(Response::from_data(body).with_header(header))
        }
        Reply::Data(data, content_type) => {
            let header = Header::from_bytes("Content-Type", content_type).expect("valid header");
            req.respond(Response::from_data(data).with_header(header))
        }
        Reply::Empty(code) => req.respond(Response::empty(StatusCode(code))),
    };
    if let Err(e) = result {
        debug!("client went away before response: {e}");
    }
}

fn respond_error(req: tiny_http::Request, err: &ApiError) {
    let header = Header::from_bytes("Content-Type", "application/json").expect("valid header");
    let body = serde_json::to_vec(&err.envelope()).unwrap_or_else(|_| b"{}".to_vec());
    let _ = req.respond(
        Response::from_data(body)
            .with_header(header)
            .with_status_code(StatusCode(err.status())),
    );
}

/// Handle one request, including daemon registrations (which upgrade the
/// connection and never return a normal response).
pub fn handle_request(server: &ApiServer, mut req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    let (path, query) = split_url(&url);
    let instance_id = request_instance(&req);
    debug!("{method} {path} (instance {instance_id})");

    let segments: Vec<String> = path
        .trim_matches('/')
        .split('/')
        .map(str::to_owned)
        .collect();
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

    // Daemon registration upgrades the connection; it cannot go through
    // the normal respond path.
    if let [version, "daemon"] = segments.as_slice() {
        return register_daemon(server, req, &instance_id, version);
    }

    match dispatch(server, &mut req, &instance_id, &method, &segments, &query) {
        Ok(reply) => respond(req, reply),
        Err(err) => {
            if err.status() >= 500 {
                error!("{method} {path}: {err}");
            } else {
                debug!("{method} {path}: {err}");
            }
            respond_error(req, &err);
        }
    }
}

fn dispatch(
    server: &ApiServer,
    req: &mut tiny_http::Request,
    instance_id: &InstanceId,
    method: &Method,
    segments: &[&str],
    query: &[(String, String)],
) -> Result<Reply, ApiError> {
    match (method, segments) {
        (Method::Get, ["v3" | "v6", "services"]) => {
            list_services(server, instance_id)
        }
        (Method::Get, ["v3" | "v6", "images"]) => {
            list_images(server, instance_id, query)
        }
        (Method::Post, ["v6", "update-images"]) => {
            let body = read_body(req)?;
            update_images(server, instance_id, query, &body)
        }
        (Method::Patch, ["v4" | "v6", "policies"]) => {
            let body = read_body(req)?;
            update_policies(server, instance_id, query, &body)
        }
        (Method::Get, ["v6", "jobs", id]) => job_status(server, instance_id, id),
        (Method::Get, ["v3" | "v6", "history"]) => {
            history(server, instance_id, query)
        }
        (Method::Get, ["v3" | "v6", "status"]) => {
            status(server, instance_id)
        }
        (Method::Get, ["v4" | "v6", "config"]) => {
            let instance = server.instances.require(instance_id)?;
            Ok(Reply::Json(serde_json::to_value(instance.shared.config())?))
        }
        (Method::Post, ["v4" | "v6", "config"]) => {
            let body = read_body(req)?;
            let config: InstanceConfig = serde_json::from_str(&body)
                .map_err(|e| ApiError::user(format!("invalid config: {e}")))?;
            server.instances.configure(instance_id.clone(), config)?;
            Ok(Reply::Empty(200))
        }
        (Method::Patch, ["v4" | "v6", "config"]) => {
            let body = read_body(req)?;
            let patch: ConfigPatch = serde_json::from_str(&body)
                .map_err(|e| ApiError::user(format!("invalid config patch: {e}")))?;
            let instance = server.instances.require(instance_id)?;
            let updated = instance.shared.patch_config(patch);
            server
                .db
                .set_config(instance_id, &updated)
                .map_err(|e| ApiError::server(e.to_string()))?;
            Ok(Reply::Empty(200))
        }
        (Method::Head | Method::Get, ["v6", "ping"]) => ping(server, instance_id),
        (Method::Get, ["v6", "sync-status"]) => sync_status(server, instance_id, query),
        (Method::Post, ["v6", "sync"]) => {
            let instance = server.instances.require(instance_id)?;
            let daemon = instance.shared.daemon()?;
            match daemon.sync() {
                Ok(()) => Ok(Reply::Empty(202)),
                Err(e) if e.is_fatal() => {
                    instance.shared.disconnect_daemon();
                    Err(e.into())
                }
                Err(e) => Err(e.into()),
            }
        }
        (Method::Get | Method::Head, ["v5" | "v6", "export"]) => {
            let instance = server.instances.require(instance_id)?;
            let daemon = instance.shared.daemon()?;
            let dump = daemon.export()?;
            Ok(Reply::Data(dump, "application/octet-stream"))
        }
        (Method::Post, ["v5" | "v6", "integrations", "github"]) => {
            let token = req
                .headers()
                .iter()
                .find(|h| h.field.equiv("GithubToken"))
                .map(|h| h.value.as_str().to_owned());
            integrations_github(server, instance_id, query, token)
        }
        _ => Err(ApiError::not_found(&format!("/{}", segments.join("/")))),
    }
}

fn defined_workloads(
    instance: &Arc<Instance>,
) -> Result<Vec<(ResourceId, caravel_cluster::Workload)>, ApiError> {
    let manifests = Manifests::new();
    instance
        .shared
        .checkout
        .with_read(|tree| -> Result<_, ApiError> {
            let defined = manifests
                .find_defined(tree.manifest_dir())
                .map_err(ApiError::from)?;
            let mut workloads = Vec::with_capacity(defined.len());
            for (id, paths) in defined {
                // Listing tolerates duplicate manifests; releasing does not.
                let Some(path) = paths.first() else { continue };
                let bytes = tree
                    .read_file(path)
                    .map_err(|e| ApiError::server(e.to_string()))?;
                let workload = manifests.parse(path, &bytes).map_err(ApiError::from)?;
                workloads.push((id, workload));
            }
            Ok(workloads)
        })
}

fn list_services(server: &ApiServer, instance_id: &InstanceId) -> Result<Reply, ApiError> {
    let instance = server.instances.require(instance_id)?;
    let workloads = defined_workloads(&instance)?;

    let running: std::collections::BTreeMap<ResourceId, caravel_cluster::Controller> =
        match instance.shared.daemon() {
            Ok(daemon) => {
                let ids: Vec<ResourceId> = workloads.iter().map(|(id, _)| id.clone()).collect();
                daemon
                    .some_controllers(&ids)
                    .map_err(ApiError::from)?
                    .into_iter()
                    .map(|c| (c.id.clone(), c))
                    .collect()
            }
            Err(_) => Default::default(),
        };

    let services: Vec<ServiceStatus> = workloads
        .into_iter()
        .map(|(id, workload)| {
            let live = running.get(&id);
            ServiceStatus {
                containers: live
                    .map(|c| c.containers.clone())
                    .unwrap_or_else(|| workload.containers.clone()),
                status: live.map_or_else(|| "unknown".to_owned(), |c| c.status.clone()),
                policies: workload.policies,
                id,
            }
        })
        .collect();
    Ok(Reply::Json(serde_json::to_value(services)?))
}

fn sorted_images(registry: &dyn Registry, current: &caravel_schema::ImageRef) -> Vec<ImageInfo> {
    let mut available = registry.repository_images(current).unwrap_or_default();
    available.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.image.tag().cmp(&a.image.tag()))
    });
    available
}

fn list_images(
    server: &ApiServer,
    instance_id: &InstanceId,
    query: &[(String, String)],
) -> Result<Reply, ApiError> {
    let instance = server.instances.require(instance_id)?;
    let spec: ResourceSpec = form_value(query, "service")
        .unwrap_or(caravel_schema::RESOURCE_SPEC_ALL)
        .parse()?;

    let statuses: Vec<ImageStatus> = defined_workloads(&instance)?
        .into_iter()
        .filter(|(id, _)| match &spec {
            ResourceSpec::All => true,
            ResourceSpec::Id(want) => want == id,
        })
        .map(|(id, workload)| ImageStatus {
            id,
            containers: workload
                .containers
                .iter()
                .map(|container| ContainerImages {
                    name: container.name.clone(),
                    current: container.image.to_string(),
                    available: sorted_images(instance.shared.registry.as_ref(), &container.image),
                })
                .collect(),
        })
        .collect();
    Ok(Reply::Json(serde_json::to_value(statuses)?))
}

fn update_images(
    server: &ApiServer,
    instance_id: &InstanceId,
    query: &[(String, String)],
    body: &str,
) -> Result<Reply, ApiError> {
    let instance = server.instances.require(instance_id)?;
    let mut form = parse_form(body);
    form.extend(query.iter().cloned());

    let mut service_specs = Vec::new();
    for service in form_values(&form, "service") {
        let spec: ResourceSpec = service
            .parse()
            .map_err(|e| ApiError::user(format!("parsing service spec {service:?}: {e}")))?;
        service_specs.push(spec);
    }
    let image = form_value(&form, "image")
        .ok_or_else(|| ApiError::user("missing image parameter"))?;
    let image_spec: ImageSpec = image
        .parse()
        .map_err(|e| ApiError::user(format!("parsing image spec {image:?}: {e}")))?;
    let kind = form_value(&form, "kind").unwrap_or("plan");
    let kind: ReleaseKind = kind
        .parse()
        .map_err(|e| ApiError::user(format!("parsing release kind {kind:?}: {e}")))?;

    let mut excludes = Vec::new();
    for excluded in form_values(&form, "exclude") {
        let id: ResourceId = excluded
            .parse()
            .map_err(|e| ApiError::user(format!("parsing excluded service {excluded:?}: {e}")))?;
        excludes.push(id);
    }

    let spec = ReleaseSpec {
        service_specs,
        image_spec,
        kind,
        excludes,
    };
    spec.validate()?;

    let cause = Cause {
        user: form_value(&form, "user").unwrap_or_default().to_owned(),
        message: form_value(&form, "message").unwrap_or_default().to_owned(),
    };
    let job = instance.queue.submit(JobSpec::Release(spec), cause);
    info!("instance {instance_id}: release job {} queued", job.id);
    Ok(Reply::Json(serde_json::to_value(job.id)?))
}

fn update_policies(
    server: &ApiServer,
    instance_id: &InstanceId,
    query: &[(String, String)],
    body: &str,
) -> Result<Reply, ApiError> {
    let instance = server.instances.require(instance_id)?;
    let updates: PolicyUpdates = serde_json::from_str(body)
        .map_err(|e| ApiError::user(format!("invalid policy updates: {e}")))?;

    let cause = Cause {
        user: form_value(query, "user").unwrap_or_default().to_owned(),
        message: form_value(query, "message").unwrap_or_default().to_owned(),
    };
    let job = instance.queue.submit(JobSpec::Policy(updates), cause);
    info!("instance {instance_id}: policy job {} queued", job.id);
    Ok(Reply::Json(serde_json::to_value(job.id)?))
}

fn job_status(server: &ApiServer, instance_id: &InstanceId, id: &str) -> Result<Reply, ApiError> {
    let job_id = JobId::new(id);
    // The in-memory queue has the freshest view; fall back to the
    // database for jobs from a previous incarnation.
    let job = match server.instances.get(instance_id) {
        Some(instance) => instance.queue.status(&job_id),
        None => None,
    };
    let job = match job {
        Some(job) => Some(job),
        None => server
            .db
            .get_job(instance_id, &job_id)
            .map_err(|e| ApiError::server(e.to_string()))?,
    };
    match job {
        Some(job) => Ok(Reply::Json(serde_json::to_value(job)?)),
        None => Err(ApiError::missing(format!("no job {id}"))),
    }
}

fn history(
    server: &ApiServer,
    instance_id: &InstanceId,
    query: &[(String, String)],
) -> Result<Reply, ApiError> {
    let spec: ResourceSpec = form_value(query, "service")
        .unwrap_or(caravel_schema::RESOURCE_SPEC_ALL)
        .parse()?;
    let service = match spec {
        ResourceSpec::All => None,
        ResourceSpec::Id(id) => Some(id),
    };

    let before = match form_value(query, "before") {
        Some(value) => value
            .parse::<DateTime<Utc>>()
            .map_err(|e| ApiError::user(format!("invalid before timestamp: {e}")))?,
        None => Utc::now(),
    };
    let after = match form_value(query, "after") {
        Some(value) => value
            .parse::<DateTime<Utc>>()
            .map_err(|e| ApiError::user(format!("invalid after timestamp: {e}")))?,
        None => DateTime::<Utc>::UNIX_EPOCH,
    };
    let limit: i64 = match form_value(query, "limit") {
        Some(value) => value
            .parse()
            .map_err(|e| ApiError::user(format!("invalid limit: {e}")))?,
        None => -1,
    };
    let simple = form_value(query, "simple") == Some("true");

    let mut events = server
        .db
        .events(instance_id, service.as_ref(), before, after, limit)
        .map_err(|e| ApiError::server(e.to_string()))?;
    if simple {
        events = events.into_iter().map(Event::simplified).collect();
    }
    Ok(Reply::Json(serde_json::to_value(events)?))
}

fn status(server: &ApiServer, instance_id: &InstanceId) -> Result<Reply, ApiError> {
    let instance = server.instances.require(instance_id)?;
    let daemon = match instance.shared.daemon() {
        Ok(daemon) => DaemonStatus {
            connected: true,
            protocol: Some(daemon.protocol_version().as_str().to_owned()),
            version: daemon.version().ok(),
        },
        Err(_) => DaemonStatus {
            connected: false,
            protocol: None,
            version: None,
        },
    };
    let head_revision = instance.shared.checkout.head_revision().ok();
    Ok(Reply::Json(serde_json::to_value(StatusResponse {
        instance: instance_id.clone(),
        daemon,
        head_revision,
    })?))
}

fn ping(server: &ApiServer, instance_id: &InstanceId) -> Result<Reply, ApiError> {
    let instance = server.instances.require(instance_id)?;
    let daemon = instance.shared.daemon()?;
    match daemon.ping() {
        Ok(()) => Ok(Reply::Empty(200)),
        Err(e) if e.is_fatal() => {
            instance.shared.disconnect_daemon();
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn sync_status(
    server: &ApiServer,
    instance_id: &InstanceId,
    query: &[(String, String)],
) -> Result<Reply, ApiError> {
    let instance = server.instances.require(instance_id)?;
    let rev = form_value(query, "ref").ok_or_else(|| ApiError::user("missing ref parameter"))?;
    let rev = Revision::new(rev);

    let applied = instance
        .shared
        .checkout
        .with_read(|tree| -> Result<bool, ApiError> {
            let head = tree
                .head_revision()
                .map_err(|e| ApiError::server(e.to_string()))?;
            tree.is_ancestor(&rev, &head)
                .map_err(|e| ApiError::user(format!("unknown revision {rev}: {e}")))
        })?;
    Ok(Reply::Json(serde_json::json!({ "ref": rev, "applied": applied })))
}

fn integrations_github(
    server: &ApiServer,
    instance_id: &InstanceId,
    query: &[(String, String)],
    token: Option<String>,
) -> Result<Reply, ApiError> {
    let instance = server.instances.require(instance_id)?;
    let owner = form_value(query, "owner").unwrap_or_default();
    let repo = form_value(query, "repository").unwrap_or_default();
    let token = token.unwrap_or_default();
    if owner.is_empty() || repo.is_empty() || token.is_empty() {
        return Err(ApiError::user("owner, repository or token is empty"));
    }

    // The deploy key comes from the daemon when connected, otherwise from
    // the instance configuration.
    let key = match instance.shared.daemon() {
        Ok(daemon) => daemon.public_ssh_key().ok(),
        Err(_) => None,
    }
    .or_else(|| instance.shared.config().public_ssh_key);
    let Some(key) = key else {
        return Err(ApiError::missing("no public deploy key available"));
    };

    let client = github::GithubClient::new(token);
    client
        .insert_deploy_key(owner, repo, &key)
        .map_err(|e| match e {
            github::GithubError::Status { status, .. } if status < 500 => {
                ApiError::user(e.to_string())
            }
            _ => ApiError::server(e.to_string()),
        })?;
    Ok(Reply::Empty(200))
}

/// Upgrade an inbound daemon connection into an RPC session and register
/// it with the instance. The protocol version is fixed here, from the
/// path, for the lifetime of the session.
fn register_daemon(
    server: &ApiServer,
    req: tiny_http::Request,
    instance_id: &InstanceId,
    version: &str,
) {
    let parsed = ProtocolVersion::from_path_version(version);
    let Some(version) = parsed else {
        respond_error(req, &ApiError::not_found("/daemon"));
        return;
    };
    let instance = match server.instances.require(instance_id) {
        Ok(instance) => instance,
        Err(err) => {
            respond_error(req, &err);
            return;
        }
    };

    let response = Response::empty(StatusCode(101))
        .with_header(
            Header::from_bytes("Upgrade", version.upgrade_protocol()).expect("valid header"),
        )
        .with_header(Header::from_bytes("Connection", "Upgrade").expect("valid header"));
    let stream = req.upgrade(version.upgrade_protocol(), response);

    let platform = Arc::new(Platform::new(version, stream));
    instance.shared.set_daemon(platform);
    info!(
        "instance {instance_id}: daemon connected ({})",
        version.as_str()
    );
}

/// Accept connections until the server is unblocked. Call from several
/// threads for parallel request handling.
pub fn serve(server: &Arc<ApiServer>, http: &Arc<Server>) {
    while let Ok(request) = http.recv() {
        handle_request(server, request);
    }
}

/// Run the control plane on `addr`, blocking the current thread. Worker
/// threads handle requests in parallel; long-running release work happens
/// on the per-instance job workers, so handlers stay cheap.
pub fn run_server(server: Arc<ApiServer>, addr: &str, workers: usize) {
    let http = Arc::new(Server::http(addr).expect("failed to bind HTTP server"));
    info!("listening on {addr}");
    let mut handles = Vec::new();
    for _ in 0..workers.saturating_sub(1) {
        let server = Arc::clone(&server);
        let http = Arc::clone(&http);
        handles.push(std::thread::spawn(move || serve(&server, &http)));
    }
    serve(&server, &http);
    for handle in handles {
        let _ = handle.join();
    }
}

/// A control plane on a random port with a temporary data directory, for
/// integration tests. Drop stops the accept loops.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub api: Arc<ApiServer>,
    http: Arc<Server>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl TestServer {
    pub fn start(data_dir: PathBuf) -> Self {
        std::fs::create_dir_all(&data_dir).expect("failed to create test data dir");
        let api = Arc::new(ApiServer::new(data_dir).expect("failed to open server state"));
        let http = Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test server"));
        let port = http.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let mut handles = Vec::new();
        for _ in 0..2 {
            let api = Arc::clone(&api);
            let http = Arc::clone(&http);
            handles.push(std::thread::spawn(move || serve(&api, &http)));
        }

        Self {
            url,
            port,
            api,
            http,
            handles,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.http.unblock();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
