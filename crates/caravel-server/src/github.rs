//! Minimal GitHub API client for installing deploy keys.

use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("github API error: {0}")]
    Http(String),
    #[error("github API returned {status}: {message}")]
    Status { status: u16, message: String },
}

#[derive(Serialize)]
struct DeployKey<'a> {
    title: &'a str,
    key: &'a str,
    read_only: bool,
}

pub struct GithubClient {
    token: String,
    api_base: String,
    agent: ureq::Agent,
}

impl GithubClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base(token, DEFAULT_API_BASE)
    }

    pub fn with_base(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: api_base.into(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    /// Install `key` as a read/write deploy key on `owner/repo` so the
    /// control plane can push manifest updates.
    pub fn insert_deploy_key(
        &self,
        owner: &str,
        repo: &str,
        key: &str,
    ) -> Result<(), GithubError> {
        let url = format!("{}/repos/{owner}/{repo}/keys", self.api_base);
        let body = serde_json::to_string(&DeployKey {
            title: "caravel-deploy-key",
            key,
            read_only: false,
        })
        .map_err(|e| GithubError::Http(e.to_string()))?;

        let result = self
            .agent
            .post(&url)
            .header("Authorization", &format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "caravel")
            .send(body.as_bytes());

        match result {
            Ok(_) => Ok(()),
            Err(ureq::Error::StatusCode(status)) => Err(GithubError::Status {
                status,
                message: format!("POST {url}"),
            }),
            Err(e) => Err(GithubError::Http(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    /// One-shot HTTP server capturing the request it receives.
    fn capture_one(status_line: &'static str) -> (String, mpsc::Receiver<(String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();

            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                    break;
                }
                if let Some(value) = line.to_lowercase().strip_prefix("content-length: ") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
            let mut body = vec![0u8; content_length];
            if content_length > 0 {
                reader.read_exact(&mut body).unwrap();
            }
            tx.send((request_line, String::from_utf8_lossy(&body).into_owned()))
                .unwrap();

            let response = format!("{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).unwrap();
        });

        (addr, rx)
    }

    #[test]
    fn posts_key_to_repo_keys_endpoint() {
        let (addr, rx) = capture_one("HTTP/1.1 201 Created");
        let client = GithubClient::with_base("tok", addr);
        client
            .insert_deploy_key("acme", "manifests", "ssh-ed25519 AAAA...")
            .unwrap();

        let (request_line, body) = rx.recv().unwrap();
        assert!(request_line.starts_with("POST /repos/acme/manifests/keys"));
        assert!(body.contains("ssh-ed25519"));
        assert!(body.contains("\"read_only\":false"));
    }

    #[test]
    fn api_rejection_surfaces_status() {
        let (addr, _rx) = capture_one("HTTP/1.1 422 Unprocessable Entity");
        let client = GithubClient::with_base("tok", addr);
        let err = client
            .insert_deploy_key("acme", "manifests", "bad-key")
            .unwrap_err();
        assert!(matches!(err, GithubError::Status { status: 422, .. }));
    }
}
