//! The JSON error envelope every failing route returns.

use caravel_core::CoreError;
use caravel_schema::{ErrorEnvelope, ErrorKind};
use std::fmt;

#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub help: String,
}

impl ApiError {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::User,
            message: message.into(),
            help: "check the request parameters and retry".to_owned(),
        }
    }

    pub fn missing(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Missing,
            message: message.into(),
            help: String::new(),
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Server,
            message: message.into(),
            help: "this is a bug in the control plane; check the server logs".to_owned(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            message: message.into(),
            help: "the daemon connection is broken; it will retry automatically".to_owned(),
        }
    }

    pub fn not_found(path: &str) -> Self {
        Self {
            kind: ErrorKind::Missing,
            message: format!("no API route for {path}"),
            help: "the endpoint may have been deprecated; see the API docs".to_owned(),
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            kind: self.kind,
            message: self.message.clone(),
            help: self.help.clone(),
        }
    }

    pub fn status(&self) -> u16 {
        self.kind.http_status()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", serde_json::to_string(&self.kind).unwrap_or_default(), self.message)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match &err {
            CoreError::Schema(_)
            | CoreError::MultipleManifests { .. }
            | CoreError::UnknownService(_) => ApiError::user(err.to_string()),
            CoreError::Cluster(e) if e.is_fatal() => ApiError::fatal(err.to_string()),
            CoreError::Cluster(caravel_cluster::ClusterError::NoDaemon) => {
                ApiError::missing(err.to_string())
            }
            _ => ApiError::server(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::server(format!("serialization failed: {err}"))
    }
}

impl From<caravel_schema::SchemaError> for ApiError {
    fn from(err: caravel_schema::SchemaError) -> Self {
        ApiError::user(err.to_string())
    }
}

impl From<caravel_cluster::ClusterError> for ApiError {
    fn from(err: caravel_cluster::ClusterError) -> Self {
        match &err {
            caravel_cluster::ClusterError::Fatal(_) => ApiError::fatal(err.to_string()),
            caravel_cluster::ClusterError::NoDaemon => ApiError::missing(err.to_string()),
            _ => ApiError::server(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_type_field() {
        let err = ApiError::user("bad spec");
        let json = serde_json::to_string(&err.envelope()).unwrap();
        assert!(json.contains("\"type\":\"user\""));
        assert!(json.contains("\"message\":\"bad spec\""));
    }

    #[test]
    fn status_follows_kind() {
        assert_eq!(ApiError::user("x").status(), 400);
        assert_eq!(ApiError::missing("x").status(), 404);
        assert_eq!(ApiError::server("x").status(), 500);
        assert_eq!(ApiError::fatal("x").status(), 502);
    }

    #[test]
    fn core_errors_map_to_kinds() {
        let user: ApiError = CoreError::Schema(caravel_schema::SchemaError::EmptyServiceSpecs).into();
        assert_eq!(user.kind, ErrorKind::User);

        let fatal: ApiError =
            CoreError::Cluster(caravel_cluster::ClusterError::Fatal("gone".to_owned())).into();
        assert_eq!(fatal.kind, ErrorKind::Fatal);

        let missing: ApiError = CoreError::Cluster(caravel_cluster::ClusterError::NoDaemon).into();
        assert_eq!(missing.kind, ErrorKind::Missing);

        let server: ApiError = CoreError::Cancelled.into();
        assert_eq!(server.kind, ErrorKind::Server);
    }
}
