//! Container image references: `[host/]repository[:tag]`.

use crate::SchemaError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A reference to a container image. Equality is structural; an `ImageRef`
/// without a tag is legal only where "any tag" is meaningful (repository
/// matching).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageRef {
    host: Option<String>,
    repository: String,
    tag: Option<String>,
}

impl ImageRef {
    pub fn new(host: Option<String>, repository: impl Into<String>, tag: Option<String>) -> Self {
        Self {
            host,
            repository: repository.into(),
            tag,
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The reference without its tag: `[host/]repository`.
    pub fn name(&self) -> String {
        match &self.host {
            Some(host) => format!("{host}/{}", self.repository),
            None => self.repository.clone(),
        }
    }

    /// A copy of this reference carrying `tag`.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            host: self.host.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.into()),
        }
    }

    /// Whether two references point into the same repository (host and
    /// repository equal, tags disregarded).
    pub fn same_repository(&self, other: &ImageRef) -> bool {
        self.host == other.host && self.repository == other.repository
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host) = &self.host {
            write!(f, "{host}/")?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        Ok(())
    }
}

/// The first path segment names a registry host if it contains a dot or a
/// port, or is exactly `localhost`. This is the Docker reference heuristic.
fn segment_is_host(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

impl FromStr for ImageRef {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SchemaError::InvalidImageRef(s.to_owned()));
        }

        // The tag delimiter is a ':' after the last '/'; a ':' before that
        // belongs to a registry host port.
        let last_slash = s.rfind('/');
        let (name, tag) = match s.rfind(':') {
            Some(i) if last_slash.map_or(true, |sl| i > sl) => {
                (&s[..i], Some(s[i + 1..].to_owned()))
            }
            _ => (s, None),
        };
        if name.is_empty() || tag.as_deref() == Some("") {
            return Err(SchemaError::InvalidImageRef(s.to_owned()));
        }

        let (host, repository) = match name.split_once('/') {
            Some((first, rest)) if segment_is_host(first) => {
                (Some(first.to_owned()), rest.to_owned())
            }
            _ => (None, name.to_owned()),
        };
        if repository.is_empty() {
            return Err(SchemaError::InvalidImageRef(s.to_owned()));
        }

        Ok(ImageRef {
            host,
            repository,
            tag,
        })
    }
}

impl Serialize for ImageRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImageRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
