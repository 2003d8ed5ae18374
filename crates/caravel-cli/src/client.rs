//! HTTP client for the control-plane API.

use caravel_schema::{ErrorEnvelope, ErrorKind, Job, INSTANCE_ID_HEADER};
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot reach {url}: {message}")]
    Transport { url: String, message: String },
    #[error("{message}")]
    Api {
        kind: ErrorKind,
        message: String,
        help: String,
    },
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Encode form pairs as an `application/x-www-form-urlencoded` body.
pub fn encode(form: &[(String, String)]) -> String {
    form.iter()
        .map(|(key, value)| format!("{}={}", percent_encode(key), percent_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

pub struct ApiClient {
    base_url: String,
    instance: Option<String>,
    agent: ureq::Agent,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, instance: Option<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build();
        Self {
            base_url: base_url.into(),
            instance,
            agent: ureq::Agent::new_with_config(config),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn finish(
        &self,
        url: &str,
        resp: Result<ureq::http::Response<ureq::Body>, ureq::Error>,
    ) -> Result<Vec<u8>, ClientError> {
        let mut resp = resp.map_err(|e| ClientError::Transport {
            url: url.to_owned(),
            message: e.to_string(),
        })?;
        let status = resp.status().as_u16();
        let body = resp
            .body_mut()
            .read_to_vec()
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        if status >= 400 {
            return match serde_json::from_slice::<ErrorEnvelope>(&body) {
                Ok(envelope) => Err(ClientError::Api {
                    kind: envelope.kind,
                    message: envelope.message,
                    help: envelope.help,
                }),
                Err(_) => Err(ClientError::Api {
                    kind: ErrorKind::Server,
                    message: format!("HTTP {status} for {url}"),
                    help: String::new(),
                }),
            };
        }
        Ok(body)
    }

    fn get_raw(&self, path: &str) -> Result<Vec<u8>, ClientError> {
        let url = self.url(path);
        tracing::debug!("GET {url}");
        let mut req = self.agent.get(&url);
        if let Some(instance) = &self.instance {
            req = req.header(INSTANCE_ID_HEADER, instance);
        }
        self.finish(&url, req.call())
    }

    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let body = self.get_raw(path)?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub fn get_bytes(&self, path: &str) -> Result<Vec<u8>, ClientError> {
        self.get_raw(path)
    }

    fn send(
        &self,
        method: &str,
        path: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, ClientError> {
        let url = self.url(path);
        tracing::debug!("{method} {url}");
        let mut req = match method {
            "PATCH" => self.agent.patch(&url),
            _ => self.agent.post(&url),
        };
        if let Some(instance) = &self.instance {
            req = req.header(INSTANCE_ID_HEADER, instance);
        }
        self.finish(&url, req.header("Content-Type", content_type).send(body))
    }

    /// Submit a form-encoded request; the API answers with a JSON job ID.
    pub fn post_form(&self, path: &str, form: &str) -> Result<String, ClientError> {
        let body = self.send("POST", path, "application/x-www-form-urlencoded", form.as_bytes())?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub fn patch_json(&self, path: &str, body: &serde_json::Value) -> Result<String, ClientError> {
        let body = self.send("PATCH", path, "application/json", body.to_string().as_bytes())?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub fn post_empty(&self, path: &str) -> Result<(), ClientError> {
        self.send("POST", path, "application/json", b"").map(|_| ())
    }

    pub fn job(&self, id: &str) -> Result<Job, ClientError> {
        self.get_json(&format!("/v6/jobs/{id}"))
    }
}
