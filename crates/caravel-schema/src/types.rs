//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings for wire compatibility.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Opaque tenant identifier carried on every request (`X-Scope-OrgID`).
    InstanceId
);

string_newtype!(
    /// Opaque job identifier, unique within an instance.
    JobId
);

string_newtype!(
    /// A git revision (commit SHA or ref name).
    Revision
);

impl InstanceId {
    /// The instance used when a request does not carry an instance header.
    pub fn single_tenant() -> Self {
        Self("default-instance".to_owned())
    }
}

/// Derive a fresh job ID from the submitting instance, a per-queue counter
/// and the submission timestamp. 32 hex characters, unique per instance.
pub fn derive_job_id(instance: &InstanceId, counter: u64, submitted_at: &str) -> JobId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(instance.as_str().as_bytes());
    hasher.update(&counter.to_le_bytes());
    hasher.update(submitted_at.as_bytes());
    let hex = hasher.finalize().to_hex().to_string();
    JobId::new(&hex[..32])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_display_and_as_ref() {
        let id = InstanceId::new("acme");
        assert_eq!(id.to_string(), "acme");
        assert_eq!(id.as_str(), "acme");
        assert_eq!(AsRef::<str>::as_ref(&id), "acme");
    }

    #[test]
    fn job_id_serde_roundtrip() {
        let id = JobId::new("deadbeef");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"deadbeef\"");
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn derived_job_ids_are_unique_per_counter() {
        let inst = InstanceId::new("acme");
        let a = derive_job_id(&inst, 1, "2025-01-01T00:00:00Z");
        let b = derive_job_id(&inst, 2, "2025-01-01T00:00:00Z");
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn derived_job_ids_differ_across_instances() {
        let a = derive_job_id(&InstanceId::new("a"), 1, "t");
        let b = derive_job_id(&InstanceId::new("b"), 1, "t");
        assert_ne!(a, b);
    }

    #[test]
    fn revision_from_string() {
        let s = String::from("abc123");
        let rev: Revision = s.into();
        assert_eq!(rev.as_str(), "abc123");
    }
}
