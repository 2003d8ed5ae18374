//! Read-only view of the container image catalog.
//!
//! The release engine consults the registry for two things: resolving the
//! `<all latest>` image spec per container, and checking that a concrete
//! image exists. This crate provides the [`Registry`] trait, a file-backed
//! [`Catalog`] implementation (also used as the test double), an HTTP
//! backend for a remote catalog service, and the "latest" resolution rules.

pub mod catalog;
pub mod http;
pub mod resolve;

pub use catalog::{Catalog, ImageInfo};
pub use http::{HttpRegistry, RegistryConfig};
pub use resolve::{eligible_tag, latest_image, TagFilter};

use caravel_schema::ImageRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("invalid catalog data: {0}")]
    Serialization(String),
    #[error("unknown repository: {0}")]
    UnknownRepository(String),
    #[error("invalid tag pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Read-only catalog of container images with creation timestamps.
pub trait Registry: Send + Sync {
    /// All known images in the repository `image` belongs to, tags and
    /// timestamps included. The tag of `image` itself is disregarded.
    fn repository_images(&self, image: &ImageRef) -> Result<Vec<ImageInfo>, RegistryError>;
}
