//! The grammar of release specifications as carried on the wire.

use crate::image::ImageRef;
use crate::resource::ResourceId;
use crate::SchemaError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Sentinel string selecting every defined workload.
pub const RESOURCE_SPEC_ALL: &str = "<all>";
/// Sentinel string selecting the newest eligible image per container.
pub const IMAGE_SPEC_LATEST: &str = "<all latest>";

/// Either every workload, or one specific workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceSpec {
    All,
    Id(ResourceId),
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceSpec::All => f.write_str(RESOURCE_SPEC_ALL),
            ResourceSpec::Id(id) => id.fmt(f),
        }
    }
}

impl FromStr for ResourceSpec {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == RESOURCE_SPEC_ALL {
            return Ok(ResourceSpec::All);
        }
        Ok(ResourceSpec::Id(s.parse()?))
    }
}

/// Which image to release: the newest per container, or one concrete ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSpec {
    Latest,
    Ref(ImageRef),
}

impl fmt::Display for ImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSpec::Latest => f.write_str(IMAGE_SPEC_LATEST),
            ImageSpec::Ref(image) => image.fmt(f),
        }
    }
}

impl FromStr for ImageSpec {
    type Err = SchemaError;

    /// A concrete image spec must carry a tag; "update to any tag of X"
    /// is not a meaningful release.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == IMAGE_SPEC_LATEST {
            return Ok(ImageSpec::Latest);
        }
        let image: ImageRef = s.parse()?;
        if image.tag().is_none() {
            return Err(SchemaError::ImageSpecWithoutTag(s.to_owned()));
        }
        Ok(ImageSpec::Ref(image))
    }
}

/// Whether to compute only (dry-run) or compute and apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    Plan,
    Execute,
}

impl ReleaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseKind::Plan => "plan",
            ReleaseKind::Execute => "execute",
        }
    }
}

impl fmt::Display for ReleaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(ReleaseKind::Plan),
            "execute" => Ok(ReleaseKind::Execute),
            other => Err(SchemaError::InvalidReleaseKind(other.to_owned())),
        }
    }
}

macro_rules! serde_as_string {
    ($name:ident) => {
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

serde_as_string!(ResourceSpec);
serde_as_string!(ImageSpec);
serde_as_string!(ReleaseKind);

/// A full release request: which workloads, which image change, plan or
/// execute, and which workloads to leave alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    pub service_specs: Vec<ResourceSpec>,
    pub image_spec: ImageSpec,
    pub kind: ReleaseKind,
    #[serde(default)]
    pub excludes: Vec<ResourceId>,
}

impl ReleaseSpec {
    /// Enforce the spec invariants: at least one service spec, and the ALL
    /// sentinel stands alone when present.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.service_specs.is_empty() {
            return Err(SchemaError::EmptyServiceSpecs);
        }
        if self.service_specs.contains(&ResourceSpec::All) && self.service_specs.len() > 1 {
            return Err(SchemaError::MixedAllSpec);
        }
        Ok(())
    }

    /// Whether the spec covers every defined workload.
    pub fn matches_all(&self) -> bool {
        self.service_specs.contains(&ResourceSpec::All)
    }

    /// Whether `id` is named by the service specs (always true for ALL).
    pub fn matches(&self, id: &ResourceId) -> bool {
        self.service_specs.iter().any(|spec| match spec {
            ResourceSpec::All => true,
            ResourceSpec::Id(want) => want == id,
        })
    }
}

/// Audit metadata attached to every job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cause {
    pub user: String,
    pub message: String,
}
