use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::prelude::*;

pub mod normalize;

/// Agent-type marker identifying documents produced by the legacy sensor.
pub const LEGACY_AGENT_TYPE: &str = "endgame";

/// A process-related event document from the events index.
///
/// Two schema generations coexist permanently in the index. The variant is
/// decided once, at construction, from the `agent.type` discriminator; all
/// downstream extraction matches exhaustively on the tag and never infers the
/// schema from which fields happen to be present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResolverEvent {
    Legacy(LegacyEvent),
    Current(CurrentEvent),
}

/// A legacy-schema event. Identity fields live under the `endgame` namespace
/// and are numeric process ids scoped to an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LegacyEvent(Value);

/// A current-schema event. Identity fields are globally unique opaque strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CurrentEvent(Value);

impl ResolverEvent {
    /// Classify a raw document by its `agent.type` discriminator.
    ///
    /// A document without a discriminator cannot be attributed to either
    /// schema and is rejected rather than defaulted.
    pub fn from_document(document: Value) -> Result<Self> {
        let agent_type = document
            .pointer("/agent/type")
            .and_then(Value::as_str)
            .context("event document is missing the agent.type discriminator")?;

        if agent_type == LEGACY_AGENT_TYPE {
            Ok(ResolverEvent::Legacy(LegacyEvent(document)))
        } else {
            Ok(ResolverEvent::Current(CurrentEvent(document)))
        }
    }

    /// The raw document, unchanged from what the backend returned.
    pub fn document(&self) -> &Value {
        match self {
            ResolverEvent::Legacy(event) => &event.0,
            ResolverEvent::Current(event) => &event.0,
        }
    }

    /// Read a dotted field path (e.g. `endgame.serial_event_id`) from the raw
    /// document.
    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup(self.document(), path)
    }
}

impl<'de> Deserialize<'de> for ResolverEvent {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let document = Value::deserialize(deserializer)?;
        ResolverEvent::from_document(document).map_err(serde::de::Error::custom)
    }
}

impl LegacyEvent {
    /// The endpoint (agent) identifier that scopes this event's process ids.
    pub fn endpoint_id(&self) -> Result<&str> {
        self.0
            .pointer("/agent/id")
            .and_then(Value::as_str)
            .context("legacy event is missing agent.id")
    }

    pub fn unique_pid(&self) -> Result<u64> {
        self.0
            .pointer("/endgame/unique_pid")
            .and_then(Value::as_u64)
            .context("legacy event is missing endgame.unique_pid")
    }

    /// Absent on root processes, which is a valid terminal case.
    pub fn unique_ppid(&self) -> Option<u64> {
        self.0.pointer("/endgame/unique_ppid").and_then(Value::as_u64)
    }

    pub fn event_type_full(&self) -> Option<&str> {
        self.0
            .pointer("/endgame/event_type_full")
            .and_then(Value::as_str)
    }

    pub fn process_name(&self) -> Option<&str> {
        self.0.pointer("/endgame/process_name").and_then(Value::as_str)
    }

    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup(&self.0, path)
    }
}

impl CurrentEvent {
    pub fn entity_id(&self) -> Result<&str> {
        self.0
            .pointer("/endpoint/process/entity_id")
            .and_then(Value::as_str)
            .context("event is missing endpoint.process.entity_id")
    }

    /// Absent on root processes, which is a valid terminal case.
    pub fn parent_entity_id(&self) -> Option<&str> {
        self.0
            .pointer("/endpoint/process/parent/entity_id")
            .and_then(Value::as_str)
    }

    /// `event.type` is a string in older mappings and an array in newer ones.
    pub fn event_types(&self) -> Vec<&str> {
        match self.0.pointer("/event/type") {
            Some(Value::String(event_type)) => vec![event_type.as_str()],
            Some(Value::Array(event_types)) => {
                event_types.iter().filter_map(Value::as_str).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn process_name(&self) -> Option<&str> {
        self.0.pointer("/process/name").and_then(Value::as_str)
    }

    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup(&self.0, path)
    }
}

/// Dotted-path lookup over a document, the shape query field paths use.
fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |value, segment| value.get(segment))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_discriminates_on_agent_type() {
        let legacy = ResolverEvent::from_document(json!({
            "agent": { "type": "endgame", "id": "awesome-id" },
            "endgame": { "unique_pid": 5 },
        }))
        .unwrap();
        assert!(matches!(legacy, ResolverEvent::Legacy(_)));

        let current = ResolverEvent::from_document(json!({
            "agent": { "type": "endpoint", "id": "awesome-id" },
            "endpoint": { "process": { "entity_id": "abcdef" } },
        }))
        .unwrap();
        assert!(matches!(current, ResolverEvent::Current(_)));
    }

    #[test]
    fn test_rejects_documents_without_discriminator() {
        let err = ResolverEvent::from_document(json!({
            "endgame": { "unique_pid": 5 },
        }))
        .unwrap_err();
        assert!(err.to_string().contains("agent.type"));
    }

    #[test]
    fn test_serializes_back_to_the_raw_document() {
        let document = json!({
            "agent": { "type": "endgame", "id": "awesome-id" },
            "endgame": { "unique_pid": 5, "unique_ppid": 3 },
        });
        let event = ResolverEvent::from_document(document.clone()).unwrap();
        assert_eq!(serde_json::to_value(&event).unwrap(), document);
    }

    #[test]
    fn test_event_types_handles_string_and_array() {
        let as_string = ResolverEvent::from_document(json!({
            "agent": { "type": "endpoint" },
            "event": { "type": "start" },
        }))
        .unwrap();
        let ResolverEvent::Current(event) = as_string else {
            panic!("expected a current-schema event");
        };
        assert_eq!(event.event_types(), vec!["start"]);

        let as_array = ResolverEvent::from_document(json!({
            "agent": { "type": "endpoint" },
            "event": { "type": ["start", "end"] },
        }))
        .unwrap();
        let ResolverEvent::Current(event) = as_array else {
            panic!("expected a current-schema event");
        };
        assert_eq!(event.event_types(), vec!["start", "end"]);
    }
}
