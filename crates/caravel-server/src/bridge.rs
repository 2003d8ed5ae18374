//! The daemon bridge: a long-lived bidirectional session with the
//! in-cluster daemon.
//!
//! The daemon dials in over HTTP and the connection is upgraded to a raw
//! byte stream (`Upgrade: caravel-rpc/<n>`). From then on the control
//! plane is the *caller* of a line-delimited JSON request/reply protocol:
//!
//! ```text
//! -> {"id": 1, "method": "SomeControllers", "params": [...]}
//! <- {"id": 1, "result": [...]}
//! <- {"id": 2, "error": "no such namespace"}
//! ```
//!
//! The protocol version is fixed once at registration from the upgrade
//! path and never mixed. A transport error fails the in-flight request
//! with a FATAL error and marks the session dead.

use caravel_cluster::{ApplyOp, ApplyResult, Cluster, ClusterError, Controller};
use caravel_schema::ResourceId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// The protocol versions this control plane can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V6,
    V7,
    V8,
}

impl ProtocolVersion {
    pub fn from_path_version(version: &str) -> Option<Self> {
        match version {
            "v6" => Some(ProtocolVersion::V6),
            "v7" => Some(ProtocolVersion::V7),
            "v8" => Some(ProtocolVersion::V8),
            _ => None,
        }
    }

    pub fn upgrade_protocol(self) -> &'static str {
        match self {
            ProtocolVersion::V6 => "caravel-rpc/6",
            ProtocolVersion::V7 => "caravel-rpc/7",
            ProtocolVersion::V8 => "caravel-rpc/8",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVersion::V6 => "v6",
            ProtocolVersion::V7 => "v7",
            ProtocolVersion::V8 => "v8",
        }
    }
}

trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

#[derive(Serialize)]
struct RpcRequest<'a> {
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct RpcReply {
    id: u64,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// One request/reply client over an upgraded connection. Requests are
/// serialized behind a mutex: the protocol is strict request/reply, so
/// there is never more than one in flight.
pub struct RpcClient {
    stream: Mutex<BufReader<Box<dyn Transport>>>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl RpcClient {
    pub fn from_stream(stream: impl Read + Write + Send + 'static) -> Self {
        Self {
            stream: Mutex::new(BufReader::new(Box::new(stream))),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Mark the session dead; every later call fails fatally.
    pub fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn fatal(&self, message: impl Into<String>) -> ClusterError {
        self.close();
        ClusterError::Fatal(message.into())
    }

    fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ClusterError> {
        if !self.is_alive() {
            return Err(ClusterError::Fatal("connection closed".to_owned()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = serde_json::to_string(&RpcRequest { id, method, params })
            .map_err(|e| ClusterError::Rpc(e.to_string()))?;
        debug!("rpc -> {method} (id {id})");

        let mut stream = self.stream.lock().expect("rpc stream poisoned");
        let io_err = |e: std::io::Error| format!("{method}: {e}");

        let writer = stream.get_mut();
        writer
            .write_all(request.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush())
            .map_err(|e| self.fatal(io_err(e)))?;

        let mut line = String::new();
        let read = stream.read_line(&mut line).map_err(|e| self.fatal(io_err(e)))?;
        if read == 0 {
            return Err(self.fatal(format!("{method}: connection closed by daemon")));
        }

        let reply: RpcReply = serde_json::from_str(line.trim_end())
            .map_err(|e| self.fatal(format!("{method}: malformed reply: {e}")))?;
        if reply.id != id {
            return Err(self.fatal(format!(
                "{method}: reply id {} does not match request id {id}",
                reply.id
            )));
        }
        if let Some(error) = reply.error {
            return Err(ClusterError::Rpc(error));
        }

        let result = reply.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result).map_err(|e| ClusterError::Rpc(e.to_string()))
    }
}

/// The daemon session, tagged by the protocol version selected at
/// registration. Dispatch is on the tag; versions are never mixed.
pub enum Platform {
    V6(RpcClient),
    V7(RpcClient),
    V8(RpcClient),
}

impl Platform {
    pub fn new(version: ProtocolVersion, stream: impl Read + Write + Send + 'static) -> Self {
        let client = RpcClient::from_stream(stream);
        match version {
            ProtocolVersion::V6 => Platform::V6(client),
            ProtocolVersion::V7 => Platform::V7(client),
            ProtocolVersion::V8 => Platform::V8(client),
        }
    }

    fn client(&self) -> &RpcClient {
        match self {
            Platform::V6(c) | Platform::V7(c) | Platform::V8(c) => c,
        }
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        match self {
            Platform::V6(_) => ProtocolVersion::V6,
            Platform::V7(_) => ProtocolVersion::V7,
            Platform::V8(_) => ProtocolVersion::V8,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.client().is_alive()
    }

    pub fn close(&self) {
        self.client().close();
    }

    /// The daemon's public deploy key, for the code-hosting integration.
    pub fn public_ssh_key(&self) -> Result<String, ClusterError> {
        self.client()
            .call("PublicSSHKey", serde_json::Value::Null)
    }
}

impl Cluster for Platform {
    fn all_controllers(&self, namespace: Option<&str>) -> Result<Vec<Controller>, ClusterError> {
        self.client()
            .call("ListAllControllers", serde_json::json!({ "namespace": namespace }))
    }

    fn some_controllers(&self, ids: &[ResourceId]) -> Result<Vec<Controller>, ClusterError> {
        self.client()
            .call("SomeControllers", serde_json::to_value(ids).map_err(|e| {
                ClusterError::Rpc(e.to_string())
            })?)
    }

    fn ping(&self) -> Result<(), ClusterError> {
        let _: serde_json::Value = self.client().call("Ping", serde_json::Value::Null)?;
        Ok(())
    }

    fn apply(&self, ops: &[ApplyOp]) -> Result<ApplyResult, ClusterError> {
        self.client().call(
            "Apply",
            serde_json::to_value(ops).map_err(|e| ClusterError::Rpc(e.to_string()))?,
        )
    }

    fn sync(&self) -> Result<(), ClusterError> {
        // Sync arrived with protocol v7; older daemons reconcile on their
        // own schedule only.
        if matches!(self, Platform::V6(_)) {
            return Err(ClusterError::Rpc(
                "sync is not supported by protocol v6".to_owned(),
            ));
        }
        let _: serde_json::Value = self.client().call("Sync", serde_json::Value::Null)?;
        Ok(())
    }

    fn export(&self) -> Result<Vec<u8>, ClusterError> {
        let dump: String = self.client().call("Export", serde_json::Value::Null)?;
        Ok(dump.into_bytes())
    }

    fn version(&self) -> Result<String, ClusterError> {
        self.client().call("Version", serde_json::Value::Null)
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        if self.is_alive() {
            warn!("daemon session dropped while alive");
            self.close();
        }
    }
}
