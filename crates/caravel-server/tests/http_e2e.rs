//! HTTP client ↔ control-plane E2E tests.
//!
//! These start a real `caravel-server` in-process on a random port, give
//! it a real git origin (tempdir + system git) and a catalog file, and
//! connect a fake daemon that upgrades `/v7/daemon` and serves the
//! JSON-line RPC protocol against a `MockCluster`. No internal shortcuts:
//! everything goes through the HTTP surface.

use caravel_cluster::{ApplyOp, Cluster, MockCluster};
use caravel_registry::Catalog;
use caravel_repo::fixture;
use caravel_schema::{Job, JobStatus, ReleaseStatus, ResourceId};
use caravel_server::{ErrorEnvelope, TestServer, INSTANCE_ID_HEADER};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

const WEB_MANIFEST: &str = "kind = \"deployment\"\nname = \"web\"\n\n[[containers]]\nname = \"main\"\nimage = \"acme/web:1\"\n";

fn id(s: &str) -> ResourceId {
    s.parse().unwrap()
}

struct Harness {
    server: TestServer,
    cluster: Arc<MockCluster>,
    agent: ureq::Agent,
    instance: String,
    _root: tempfile::TempDir,
    _daemon: std::thread::JoinHandle<()>,
}

fn agent() -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build();
    ureq::Agent::new_with_config(config)
}

fn get(h: &Harness, path: &str) -> (u16, String) {
    let mut resp = h
        .agent
        .get(format!("{}{path}", h.server.url))
        .header(INSTANCE_ID_HEADER, &h.instance)
        .call()
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.body_mut().read_to_string().unwrap();
    (status, body)
}

fn send(h: &Harness, method: &str, path: &str, content_type: &str, body: &str) -> (u16, String) {
    let url = format!("{}{path}", h.server.url);
    let req = match method {
        "POST" => h.agent.post(&url),
        "PATCH" => h.agent.patch(&url),
        other => panic!("unsupported method {other}"),
    };
    let mut resp = req
        .header(INSTANCE_ID_HEADER, &h.instance)
        .header("Content-Type", content_type)
        .send(body.as_bytes())
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.body_mut().read_to_string().unwrap();
    (status, body)
}

/// Dial the server as the in-cluster daemon: upgrade the connection, then
/// answer RPC requests from the control plane against `cluster`.
fn connect_daemon(
    port: u16,
    instance: &str,
    cluster: Arc<MockCluster>,
) -> std::thread::JoinHandle<()> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    write!(
        stream,
        "POST /v7/daemon HTTP/1.1\r\nHost: 127.0.0.1\r\n{INSTANCE_ID_HEADER}: {instance}\r\nUpgrade: caravel-rpc/7\r\nConnection: Upgrade\r\nContent-Length: 0\r\n\r\n"
    )
    .unwrap();

    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut status_line = String::new();
    reader.read_line(&mut status_line).unwrap();
    assert!(
        status_line.contains("101"),
        "expected upgrade, got {status_line}"
    );
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        if line.trim().is_empty() {
            break;
        }
    }

    std::thread::spawn(move || {
        let mut writer = stream;
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let request: serde_json::Value = match serde_json::from_str(line.trim()) {
                Ok(value) => value,
                Err(_) => break,
            };
            let rpc_id = request["id"].as_u64().unwrap_or(0);
            let method = request["method"].as_str().unwrap_or("").to_owned();
            let params = request["params"].clone();

            use caravel_cluster::ClusterError;
            let rpc_err = |e: serde_json::Error| ClusterError::Rpc(e.to_string());
            let result: Result<serde_json::Value, ClusterError> = match method.as_str() {
                "Ping" => cluster.ping().map(|()| serde_json::Value::Null),
                "Version" => Ok(serde_json::json!("fake-daemon-0.1")),
                "PublicSSHKey" => Ok(serde_json::json!("ssh-ed25519 AAAAfakekey")),
                "ListAllControllers" => {
                    let namespace = params["namespace"].as_str().map(str::to_owned);
                    cluster
                        .all_controllers(namespace.as_deref())
                        .map(|c| serde_json::to_value(c).unwrap())
                }
                "SomeControllers" => serde_json::from_value::<Vec<ResourceId>>(params)
                    .map_err(rpc_err)
                    .and_then(|ids| {
                        cluster
                            .some_controllers(&ids)
                            .map(|c| serde_json::to_value(c).unwrap())
                    }),
                "Apply" => serde_json::from_value::<Vec<ApplyOp>>(params)
                    .map_err(rpc_err)
                    .and_then(|ops| {
                        cluster.apply(&ops).map(|r| serde_json::to_value(r).unwrap())
                    }),
                "Sync" => cluster.sync().map(|()| serde_json::Value::Null),
                "Export" => cluster
                    .export()
                    .map(|bytes| serde_json::json!(String::from_utf8_lossy(&bytes))),
                other => Err(ClusterError::Rpc(format!("unknown method {other}"))),
            };

            let reply = match result {
                Ok(value) => serde_json::json!({ "id": rpc_id, "result": value }),
                // A fatal mock error stands in for losing the cluster:
                // drop the connection instead of replying.
                Err(e) if e.is_fatal() => break,
                Err(error) => serde_json::json!({ "id": rpc_id, "error": error.to_string() }),
            };
            if writer
                .write_all(format!("{reply}\n").as_bytes())
                .and_then(|()| writer.flush())
                .is_err()
            {
                break;
            }
        }
    })
}

/// Seed an origin + catalog, start the server, configure the instance and
/// connect the fake daemon.
fn harness() -> Harness {
    let root = tempfile::tempdir().unwrap();

    let seeded = fixture::seed(root.path(), &[("web.toml", WEB_MANIFEST)]).unwrap();
    drop(seeded);
    let origin = fixture::origin_dir(root.path());

    let catalog = Catalog::new();
    catalog.publish(
        &"acme/web:1".parse().unwrap(),
        "2025-01-01T00:00:00Z".parse().unwrap(),
    );
    catalog.publish(
        &"acme/web:2".parse().unwrap(),
        "2025-02-01T00:00:00Z".parse().unwrap(),
    );
    let catalog_path = root.path().join("catalog.json");
    catalog.save(&catalog_path).unwrap();

    let server = TestServer::start(root.path().join("server-data"));
    let instance = "acme".to_owned();
    let agent = agent();

    let cluster = Arc::new(MockCluster::new());
    cluster.run(&id("default:deployment/web"), &[("main", "acme/web:1")]);

    let config = serde_json::json!({
        "git_url": origin.to_string_lossy(),
        "git_branch": "main",
        "registry_catalog": catalog_path.to_string_lossy(),
    });
    let mut resp = agent
        .post(format!("{}/v6/config", server.url))
        .header(INSTANCE_ID_HEADER, &instance)
        .header("Content-Type", "application/json")
        .send(config.to_string().as_bytes())
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200, "{}", resp.body_mut().read_to_string().unwrap());

    let daemon = connect_daemon(server.port, &instance, Arc::clone(&cluster));
    // The registration runs on a server worker; wait for it to land.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut resp = agent
            .get(format!("{}/v6/ping", server.url))
            .header(INSTANCE_ID_HEADER, &instance)
            .call()
            .unwrap();
        let _ = resp.body_mut().read_to_string();
        if resp.status().as_u16() == 200 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "daemon never registered"
        );
        std::thread::sleep(Duration::from_millis(25));
    }

    Harness {
        server,
        cluster,
        agent,
        instance,
        _root: root,
        _daemon: daemon,
    }
}

fn wait_for_job(h: &Harness, job_id: &str) -> Job {
    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    loop {
        let (status, body) = get(h, &format!("/v6/jobs/{job_id}"));
        assert_eq!(status, 200, "{body}");
        let job: Job = serde_json::from_str(&body).unwrap();
        if job.status.is_terminal() {
            return job;
        }
        assert!(std::time::Instant::now() < deadline, "job never finished");
        std::thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn status_and_ping_report_connected_daemon() {
    let h = harness();

    let (status, body) = get(&h, "/v6/status");
    assert_eq!(status, 200);
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["daemon"]["connected"], serde_json::json!(true));
    assert_eq!(value["daemon"]["protocol"], serde_json::json!("v7"));
    assert_eq!(value["daemon"]["version"], serde_json::json!("fake-daemon-0.1"));
    assert!(value["head_revision"].is_string());
}

#[test]
fn list_services_and_images_reflect_repo_and_catalog() {
    let h = harness();

    let (status, body) = get(&h, "/v6/services");
    assert_eq!(status, 200);
    let services: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(services[0]["id"], serde_json::json!("default:deployment/web"));
    assert_eq!(services[0]["status"], serde_json::json!("ready"));

    let (status, body) = get(&h, "/v6/images?service=deployment%2Fweb");
    assert_eq!(status, 200);
    let images: serde_json::Value = serde_json::from_str(&body).unwrap();
    let available = images[0]["containers"][0]["available"].as_array().unwrap();
    // Newest first.
    assert_eq!(available[0]["image"], serde_json::json!("acme/web:2"));
    assert_eq!(available.len(), 2);
}

#[test]
fn execute_release_end_to_end() {
    let h = harness();

    let (status, body) = send(
        &h,
        "POST",
        "/v6/update-images",
        "application/x-www-form-urlencoded",
        "service=%3Call%3E&image=%3Call+latest%3E&kind=execute&user=ops&message=weekly+bump",
    );
    assert_eq!(status, 200, "{body}");
    let job_id: String = serde_json::from_str(&body).unwrap();

    let job = wait_for_job(&h, &job_id);
    assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.error);
    let revision = job.revision.clone().expect("release committed");
    let result = job.result.expect("release result recorded");
    let web = result.get(&id("default:deployment/web")).unwrap();
    assert_eq!(web.status, ReleaseStatus::Success);
    assert_eq!(web.updates[0].target.to_string(), "acme/web:2");

    // The daemon received the rewritten manifest.
    let applied = h.cluster.applied();
    assert_eq!(applied.len(), 1);
    assert!(applied[0].manifest.contains("acme/web:2"));

    // The commit is an ancestor of the instance head.
    let (status, body) = get(&h, &format!("/v6/sync-status?ref={revision}"));
    assert_eq!(status, 200);
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["applied"], serde_json::json!(true));

    // History records the release with its cause; simple=true strips it.
    let (status, body) = get(&h, "/v6/history?service=deployment%2Fweb");
    assert_eq!(status, 200);
    let events: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(events[0]["message"], serde_json::json!("weekly bump"));
    assert_eq!(
        events[0]["metadata"]["cause"]["user"],
        serde_json::json!("ops")
    );

    let (_, body) = get(&h, "/v6/history?service=deployment%2Fweb&simple=true");
    let simple: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(simple[0].get("metadata").is_none());
}

#[test]
fn plan_release_returns_result_without_commit() {
    let h = harness();

    let (status, body) = send(
        &h,
        "POST",
        "/v6/update-images",
        "application/x-www-form-urlencoded",
        "service=%3Call%3E&image=%3Call+latest%3E&kind=plan",
    );
    assert_eq!(status, 200, "{body}");
    let job_id: String = serde_json::from_str(&body).unwrap();

    let job = wait_for_job(&h, &job_id);
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.revision.is_none());
    assert!(h.cluster.applied().is_empty());

    let result = job.result.unwrap();
    assert_eq!(
        result.get(&id("default:deployment/web")).unwrap().status,
        ReleaseStatus::Success
    );
}

#[test]
fn policy_update_job_commits_policy_change() {
    let h = harness();

    let updates = serde_json::json!({
        "default:deployment/web": { "add": { "locked": "true" }, "remove": [] }
    });
    let (status, body) = send(
        &h,
        "PATCH",
        "/v6/policies?user=ops&message=lock+web",
        "application/json",
        &updates.to_string(),
    );
    assert_eq!(status, 200, "{body}");
    let job_id: String = serde_json::from_str(&body).unwrap();
    let job = wait_for_job(&h, &job_id);
    assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.error);
    assert!(job.revision.is_some());

    let (_, body) = get(&h, "/v6/services");
    let services: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        services[0]["policies"]["locked"],
        serde_json::json!(true)
    );
}

#[test]
fn bad_specs_and_unknown_routes_use_the_error_envelope() {
    let h = harness();

    let (status, body) = send(
        &h,
        "POST",
        "/v6/update-images",
        "application/x-www-form-urlencoded",
        "service=gadget%2Fweb&image=%3Call+latest%3E&kind=execute",
    );
    assert_eq!(status, 400);
    let envelope: ErrorEnvelope = serde_json::from_str(&body).unwrap();
    assert_eq!(envelope.kind, caravel_schema::ErrorKind::User);
    assert!(envelope.message.contains("gadget"));

    let (status, body) = get(&h, "/v6/nonsense");
    assert_eq!(status, 404);
    let envelope: ErrorEnvelope = serde_json::from_str(&body).unwrap();
    assert_eq!(envelope.kind, caravel_schema::ErrorKind::Missing);

    // Deprecated aliases still resolve.
    let (status, _) = get(&h, "/v3/services");
    assert_eq!(status, 200);
}

#[test]
fn unregistered_instance_is_missing() {
    let root = tempfile::tempdir().unwrap();
    let server = TestServer::start(root.path().join("server-data"));
    let agent = agent();

    let mut resp = agent
        .get(format!("{}/v6/status", server.url))
        .header(INSTANCE_ID_HEADER, "nobody")
        .call()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let envelope: ErrorEnvelope =
        serde_json::from_str(&resp.body_mut().read_to_string().unwrap()).unwrap();
    assert_eq!(envelope.kind, caravel_schema::ErrorKind::Missing);
}

#[test]
fn daemon_disconnect_fails_ping_then_reads_as_missing() {
    let h = harness();
    h.cluster.disconnect();

    // The first ping trips over the dead session: 502 fatal.
    let (status, body) = get(&h, "/v6/ping");
    assert_eq!(status, 502, "{body}");
    let envelope: ErrorEnvelope = serde_json::from_str(&body).unwrap();
    assert_eq!(envelope.kind, caravel_schema::ErrorKind::Fatal);

    // The session is torn down; from now on the daemon is just absent.
    let (status, _) = get(&h, "/v6/ping");
    assert_eq!(status, 404);

    let (_, body) = get(&h, "/v6/status");
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["daemon"]["connected"], serde_json::json!(false));
}
