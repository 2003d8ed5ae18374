//! File-backed image catalog: a JSON index mapping repository names to
//! their known tags and creation timestamps.

use crate::{Registry, RegistryError};
use caravel_schema::ImageRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

/// One catalog entry: a tagged image and when the registry saw it built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub image: ImageRef,
    pub created_at: DateTime<Utc>,
}

/// A tag within a repository, as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    pub tag: String,
    pub created_at: DateTime<Utc>,
}

/// The catalog index: maps the un-tagged repository name (`[host/]repo`)
/// to its known tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct Index {
    repositories: BTreeMap<String, Vec<TagEntry>>,
}

/// In-memory catalog, loadable from and serializable to a JSON file. The
/// control plane refreshes it out of band; the release engine only reads.
#[derive(Debug, Default)]
pub struct Catalog {
    index: RwLock<Index>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, RegistryError> {
        let index: Index = serde_json::from_slice(data)
            .map_err(|e| RegistryError::Serialization(format!("invalid catalog: {e}")))?;
        Ok(Self {
            index: RwLock::new(index),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RegistryError> {
        let index = self.index.read().expect("catalog lock poisoned");
        serde_json::to_vec_pretty(&*index).map_err(|e| RegistryError::Serialization(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Record a tag for a repository, replacing any entry with the same tag.
    pub fn publish(&self, image: &ImageRef, created_at: DateTime<Utc>) {
        let Some(tag) = image.tag() else { return };
        let mut index = self.index.write().expect("catalog lock poisoned");
        let tags = index.repositories.entry(image.name()).or_default();
        tags.retain(|entry| entry.tag != tag);
        tags.push(TagEntry {
            tag: tag.to_owned(),
            created_at,
        });
    }

    pub fn repositories(&self) -> Vec<String> {
        let index = self.index.read().expect("catalog lock poisoned");
        index.repositories.keys().cloned().collect()
    }
}

impl Registry for Catalog {
    fn repository_images(&self, image: &ImageRef) -> Result<Vec<ImageInfo>, RegistryError> {
        let index = self.index.read().expect("catalog lock poisoned");
        let tags = index
            .repositories
            .get(&image.name())
            .ok_or_else(|| RegistryError::UnknownRepository(image.name()))?;
        Ok(tags
            .iter()
            .map(|entry| ImageInfo {
                image: image.with_tag(&entry.tag),
                created_at: entry.created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn image(s: &str) -> ImageRef {
        s.parse().unwrap()
    }

    #[test]
    fn publish_and_read_back() {
        let catalog = Catalog::new();
        catalog.publish(&image("quay.io/acme/web:v1"), ts("2025-01-01T00:00:00Z"));
        catalog.publish(&image("quay.io/acme/web:v2"), ts("2025-02-01T00:00:00Z"));

        let images = catalog.repository_images(&image("quay.io/acme/web:v1")).unwrap();
        assert_eq!(images.len(), 2);
        assert!(images.iter().any(|i| i.image.tag() == Some("v2")));
    }

    #[test]
    fn tag_lookup_ignores_query_tag() {
        let catalog = Catalog::new();
        catalog.publish(&image("acme/web:v1"), ts("2025-01-01T00:00:00Z"));

        // Asking with a different (or absent) tag still finds the repository.
        let images = catalog.repository_images(&image("acme/web:whatever")).unwrap();
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn unknown_repository_is_an_error() {
        let catalog = Catalog::new();
        let err = catalog.repository_images(&image("acme/ghost:v1")).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownRepository(_)));
    }

    #[test]
    fn republish_replaces_same_tag() {
        let catalog = Catalog::new();
        catalog.publish(&image("acme/web:v1"), ts("2025-01-01T00:00:00Z"));
        catalog.publish(&image("acme/web:v1"), ts("2025-03-01T00:00:00Z"));

        let images = catalog.repository_images(&image("acme/web:v1")).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].created_at, ts("2025-03-01T00:00:00Z"));
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let catalog = Catalog::new();
        catalog.publish(&image("acme/web:v1"), ts("2025-01-01T00:00:00Z"));
        catalog.save(&path).unwrap();

        let loaded = Catalog::load(&path).unwrap();
        assert_eq!(loaded.repositories(), vec!["acme/web"]);
    }

    #[test]
    fn empty_catalog_roundtrip() {
        let catalog = Catalog::new();
        let bytes = catalog.to_bytes().unwrap();
        let loaded = Catalog::from_bytes(&bytes).unwrap();
        assert!(loaded.repositories().is_empty());
    }
}
