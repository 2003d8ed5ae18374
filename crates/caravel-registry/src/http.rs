//! HTTP backend for a remote image catalog service.
//!
//! Expects a simple REST API:
//! - `GET /v1/repositories/<name>/images` — JSON array of
//!   `{"tag": "...", "created_at": "..."}` entries for the repository.

use crate::catalog::TagEntry;
use crate::{ImageInfo, Registry, RegistryError};
use caravel_schema::ImageRef;
use std::io::Read;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub url: String,
    pub auth_token: Option<String>,
}

pub struct HttpRegistry {
    config: RegistryConfig,
    agent: ureq::Agent,
}

impl HttpRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { config, agent }
    }

    fn do_get(&self, url: &str) -> Result<Vec<u8>, RegistryError> {
        let mut req = self.agent.get(url);
        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = match req.call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(RegistryError::UnknownRepository(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RegistryError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => {
                return Err(RegistryError::Http(e.to_string()));
            }
        };

        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| RegistryError::Http(e.to_string()))?;
        Ok(body)
    }
}

impl Registry for HttpRegistry {
    fn repository_images(&self, image: &ImageRef) -> Result<Vec<ImageInfo>, RegistryError> {
        let url = format!("{}/v1/repositories/{}/images", self.config.url, image.name());
        tracing::debug!("GET {url}");
        let body = self.do_get(&url)?;
        let entries: Vec<TagEntry> = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::Serialization(e.to_string()))?;
        Ok(entries
            .into_iter()
            .map(|entry| ImageInfo {
                image: image.with_tag(&entry.tag),
                created_at: entry.created_at,
            })
            .collect())
    }
}
