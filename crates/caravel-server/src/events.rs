//! Event history: what changed, when, and why, recorded per instance.

use caravel_schema::{Cause, InstanceId, ReleaseResult, ResourceId, Revision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Release,
    PolicyUpdate,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Release => "release",
            EventKind::PolicyUpdate => "policy update",
        }
    }
}

/// Cause, image diffs and the commit made, attached to release events.
/// Stripped from "simple" history responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub cause: Cause,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ReleaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub resource_ids: Vec<ResourceId>,
    pub kind: EventKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
}

impl Event {
    /// Drop the per-event metadata, keeping timestamps and message only.
    pub fn simplified(mut self) -> Self {
        self.metadata = None;
        self
    }
}

/// Event IDs are opaque hashes of the instance, timestamp and a sequence
/// number, unique within an instance.
pub fn derive_event_id(instance: &InstanceId, at: DateTime<Utc>, seq: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(instance.as_str().as_bytes());
    hasher.update(at.to_rfc3339().as_bytes());
    hasher.update(&seq.to_le_bytes());
    hasher.finalize().to_hex().to_string()[..32].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event {
            id: "ev1".to_owned(),
            resource_ids: vec!["default:deployment/web".parse().unwrap()],
            kind: EventKind::Release,
            started_at: "2025-06-01T12:00:00Z".parse().unwrap(),
            ended_at: "2025-06-01T12:00:05Z".parse().unwrap(),
            message: "release default:deployment/web".to_owned(),
            metadata: Some(EventMetadata {
                cause: Cause {
                    user: "ops".to_owned(),
                    message: "weekly".to_owned(),
                },
                result: None,
                revision: Some(Revision::new("abc123")),
            }),
        }
    }

    #[test]
    fn serde_roundtrip() {
        let event = sample();
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn simplified_strips_metadata() {
        let simple = sample().simplified();
        assert!(simple.metadata.is_none());
        let json = serde_json::to_string(&simple).unwrap();
        assert!(!json.contains("metadata"));
    }

    #[test]
    fn event_ids_are_unique_per_sequence() {
        let instance = InstanceId::new("acme");
        let at: DateTime<Utc> = "2025-06-01T12:00:00Z".parse().unwrap();
        let a = derive_event_id(&instance, at, 1);
        let b = derive_event_id(&instance, at, 2);
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }
}
