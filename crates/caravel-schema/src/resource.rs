//! Workload identity: `(namespace, kind, name)` triples with the canonical
//! string form `<namespace>:<kind>/<name>`.

use crate::SchemaError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Namespace assumed when parsing an unqualified `<kind>/<name>` form.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The closed set of workload kinds the control plane understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    CronJob,
    DaemonSet,
    Deployment,
    StatefulSet,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::CronJob => "cronjob",
            ResourceKind::DaemonSet => "daemonset",
            ResourceKind::Deployment => "deployment",
            ResourceKind::StatefulSet => "statefulset",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cronjob" => Ok(ResourceKind::CronJob),
            "daemonset" => Ok(ResourceKind::DaemonSet),
            "deployment" => Ok(ResourceKind::Deployment),
            "statefulset" => Ok(ResourceKind::StatefulSet),
            other => Err(SchemaError::UnknownKind(other.to_owned())),
        }
    }
}

/// Canonical identity of a cluster workload. Ordering is lexical on the
/// canonical string form, which the release engine relies on for
/// deterministic results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    namespace: String,
    kind: ResourceKind,
    name: String,
}

// Field-wise ordering would diverge from canonical-string ordering when
// one namespace is a prefix of another (e.g. `app1` vs `app10`: the `:`
// separator compares above a digit), so compare the rendered form.
impl Ord for ResourceId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for ResourceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            name: name.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.namespace, self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = SchemaError;

    /// Parse `<namespace>:<kind>/<name>` or the unqualified `<kind>/<name>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SchemaError::InvalidResourceId(s.to_owned());

        let (namespace, rest) = match s.split_once(':') {
            Some((ns, rest)) => (ns, rest),
            None => (DEFAULT_NAMESPACE, s),
        };
        let (kind, name) = rest.split_once('/').ok_or_else(invalid)?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }
        let kind = kind.parse::<ResourceKind>()?;
        Ok(ResourceId::new(namespace, kind, name))
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_qualified_form() {
        let id: ResourceId = "kube-system:daemonset/fluentd".parse().unwrap();
        assert_eq!(id.namespace(), "kube-system");
        assert_eq!(id.kind(), ResourceKind::DaemonSet);
        assert_eq!(id.name(), "fluentd");
    }

    #[test]
    fn parse_defaults_namespace() {
        let id: ResourceId = "deployment/helloworld".parse().unwrap();
        assert_eq!(id.to_string(), "default:deployment/helloworld");
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let err = "default:gadget/x".parse::<ResourceId>().unwrap_err();
        assert!(matches!(err, SchemaError::UnknownKind(_)));
    }

    #[test]
    fn missing_name_is_an_error() {
        assert!("default:deployment/".parse::<ResourceId>().is_err());
        assert!("deployment".parse::<ResourceId>().is_err());
    }

    #[test]
    fn display_roundtrip() {
        let id: ResourceId = "prod:statefulset/db".parse().unwrap();
        let back: ResourceId = id.to_string().parse().unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn ordering_matches_canonical_string() {
        let mut ids: Vec<ResourceId> = [
            "default:deployment/b",
            "default:cronjob/z",
            "apps:statefulset/a",
            "default:deployment/a",
            // Prefix-colliding namespaces: the separator must take part
            // in the comparison.
            "app1:deployment/x",
            "app10:deployment/x",
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
        ids.sort();

        let strings: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let mut sorted = strings.clone();
        sorted.sort();
        assert_eq!(strings, sorted);
    }

    #[test]
    fn prefix_namespace_sorts_like_canonical_string() {
        // ':' (0x3A) compares above '0' (0x30), so "app10:..." sorts
        // before "app1:..." in canonical-string order.
        let short: ResourceId = "app1:deployment/x".parse().unwrap();
        let long: ResourceId = "app10:deployment/x".parse().unwrap();
        assert!(long < short);
        assert_eq!(
            long.cmp(&short),
            long.to_string().cmp(&short.to_string())
        );
    }

    #[test]
    fn serde_as_string() {
        let id: ResourceId = "default:deployment/web".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"default:deployment/web\"");
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
