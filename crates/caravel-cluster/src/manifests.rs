//! Structured read and mutate operations over workload manifest files.
//!
//! A workload manifest is a TOML document:
//!
//! ```toml
//! namespace = "default"
//! kind = "deployment"
//! name = "helloworld"
//!
//! [policies]
//! locked = true
//! "tag-pattern.sidecar" = "v*"
//!
//! [[containers]]
//! name = "helloworld"
//! image = "quay.io/acmecorp/helloworld:master-a000001"
//! ```
//!
//! Reads go through `toml` + serde; mutations go through `toml_edit` so
//! comments, ordering and whitespace in user files survive a release.

use crate::cluster::Container;
use crate::ClusterError;
use caravel_schema::policy::{PolicyChange, TAG_PATTERN_PREFIX};
use caravel_schema::{ImageRef, PolicySet, ResourceId, ResourceKind, DEFAULT_NAMESPACE};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use toml_edit::DocumentMut;

const MANIFEST_EXTENSION: &str = "toml";
const BOOL_POLICIES: [&str; 3] = ["locked", "ignore", "automated"];

/// A workload as declared by one manifest file.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub id: ResourceId,
    pub policies: PolicySet,
    pub containers: Vec<Container>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    namespace: Option<String>,
    kind: String,
    name: String,
    #[serde(default)]
    policies: BTreeMap<String, toml::Value>,
    #[serde(default)]
    containers: Vec<RawContainer>,
}

#[derive(Debug, Deserialize)]
struct RawContainer {
    name: String,
    image: String,
}

/// The structured view over the manifest files in a checkout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manifests;

impl Manifests {
    pub fn new() -> Self {
        Self
    }

    fn invalid(path: &Path, message: impl Into<String>) -> ClusterError {
        ClusterError::InvalidManifest {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    /// Parse one manifest into its structured view.
    pub fn parse(&self, path: &Path, bytes: &[u8]) -> Result<Workload, ClusterError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Self::invalid(path, "manifest is not UTF-8"))?;
        let raw: RawManifest =
            toml::from_str(text).map_err(|e| Self::invalid(path, e.to_string()))?;

        let kind: ResourceKind = raw.kind.parse()?;
        let namespace = raw.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
        let id = ResourceId::new(namespace, kind, raw.name);

        let mut policies = PolicySet::default();
        for (key, value) in &raw.policies {
            if let Some(container) = key.strip_prefix(TAG_PATTERN_PREFIX) {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| Self::invalid(path, format!("policy {key} must be a string")))?;
                policies
                    .tag_patterns
                    .insert(container.to_owned(), pattern.to_owned());
                continue;
            }
            let enabled = match value {
                toml::Value::Boolean(b) => *b,
                toml::Value::String(s) => s == "true",
                _ => return Err(Self::invalid(path, format!("policy {key} must be a bool"))),
            };
            match key.as_str() {
                "locked" => policies.locked = enabled,
                "ignore" => policies.ignore = enabled,
                "automated" => policies.automated = enabled,
                // Unknown policies are preserved in the file but carry no
                // meaning here.
                _ => {}
            }
        }

        let mut containers = Vec::with_capacity(raw.containers.len());
        for c in raw.containers {
            let image: ImageRef = c
                .image
                .parse()
                .map_err(|e| Self::invalid(path, format!("container {}: {e}", c.name)))?;
            containers.push(Container {
                name: c.name,
                image,
            });
        }

        Ok(Workload {
            id,
            policies,
            containers,
        })
    }

    /// Enumerate every workload defined under `dir`, mapping each resource
    /// to the manifest path(s) declaring it. More than one path for the
    /// same resource is reported as-is; deciding that it is an error is the
    /// caller's business.
    pub fn find_defined(
        &self,
        dir: &Path,
    ) -> Result<BTreeMap<ResourceId, Vec<PathBuf>>, ClusterError> {
        let mut paths = Vec::new();
        collect_manifest_paths(dir, &mut paths)?;
        paths.sort();

        let mut defined: BTreeMap<ResourceId, Vec<PathBuf>> = BTreeMap::new();
        for path in paths {
            let bytes = std::fs::read(&path)?;
            let workload = self.parse(&path, &bytes)?;
            defined.entry(workload.id).or_default().push(path);
        }
        Ok(defined)
    }

    /// Rewrite the image reference of `container` inside a manifest,
    /// preserving formatting. Fails if the container is not declared.
    pub fn update_image(
        &self,
        path: &Path,
        bytes: &[u8],
        container: &str,
        target: &ImageRef,
    ) -> Result<Vec<u8>, ClusterError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Self::invalid(path, "manifest is not UTF-8"))?;
        let mut doc: DocumentMut = text
            .parse()
            .map_err(|e: toml_edit::TomlError| Self::invalid(path, e.to_string()))?;

        let mut found = false;
        if let Some(containers) = doc
            .get_mut("containers")
            .and_then(|item| item.as_array_of_tables_mut())
        {
            for table in containers.iter_mut() {
                if table.get("name").and_then(|item| item.as_str()) == Some(container) {
                    table["image"] = toml_edit::value(target.to_string());
                    found = true;
                }
            }
        }
        if !found {
            return Err(Self::invalid(
                path,
                format!("no container named {container}"),
            ));
        }
        Ok(doc.to_string().into_bytes())
    }

    /// Apply a policy change to a manifest's `[policies]` table, preserving
    /// formatting elsewhere in the file.
    pub fn update_policies(
        &self,
        path: &Path,
        bytes: &[u8],
        change: &PolicyChange,
    ) -> Result<Vec<u8>, ClusterError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Self::invalid(path, "manifest is not UTF-8"))?;
        let mut doc: DocumentMut = text
            .parse()
            .map_err(|e: toml_edit::TomlError| Self::invalid(path, e.to_string()))?;

        {
            let policies = doc
                .entry("policies")
                .or_insert(toml_edit::table())
                .as_table_mut()
                .ok_or_else(|| Self::invalid(path, "policies is not a table"))?;

            for (key, value) in &change.add {
                if BOOL_POLICIES.contains(&key.as_str()) {
                    policies.insert(key, toml_edit::value(value == "true"));
                } else {
                    policies.insert(key, toml_edit::value(value.as_str()));
                }
            }
            for key in &change.remove {
                policies.remove(key);
            }
        }

        if doc["policies"]
            .as_table()
            .is_some_and(toml_edit::Table::is_empty)
        {
            doc.remove("policies");
        }
        Ok(doc.to_string().into_bytes())
    }
}

fn collect_manifest_paths(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ClusterError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if entry.file_name() != ".git" {
                collect_manifest_paths(&path, out)?;
            }
        } else if path.extension().and_then(|e| e.to_str()) == Some(MANIFEST_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}
