use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::events::{LEGACY_AGENT_TYPE, ResolverEvent};
use crate::prelude::*;

/// The schema-appropriate document paths holding a query kind's event id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventIdFields {
    pub legacy_field_path: &'static str,
    pub field_path: &'static str,
}

/// A parsed legacy composite entity id.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyEntityId {
    pub endpoint_id: String,
    pub unique_pid: u64,
}

lazy_static! {
    static ref LEGACY_ENTITY_ID_REGEX: Regex = Regex::new(
        r"(?x)
            ^endgame\|
            (?P<endpoint_id>[^|]+)\|
            (?P<unique_pid>\d+)$
        "
    )
    .expect("Failed to compile legacy entity id regex");
}

pub fn is_legacy(event: &ResolverEvent) -> bool {
    matches!(event, ResolverEvent::Legacy(_))
}

/// Read the event id from the schema-appropriate field path, coerced to a
/// string. A document whose discriminator selected a schema but is missing
/// that schema's field is malformed and fails loudly.
pub fn extract_event_id(event: &ResolverEvent, fields: &EventIdFields) -> Result<String> {
    let (value, path) = match event {
        ResolverEvent::Legacy(event) => (event.field(fields.legacy_field_path), fields.legacy_field_path),
        ResolverEvent::Current(event) => (event.field(fields.field_path), fields.field_path),
    };

    value
        .and_then(coerce_to_string)
        .with_context(|| format!("event is missing its event id field {path}"))
}

/// The normalized, schema-independent identifier of the event's process node.
///
/// The legacy path synthesizes a composite key from the endpoint id and the
/// numeric process id; the composite is never present verbatim in the
/// document.
pub fn extract_entity_id(event: &ResolverEvent) -> Result<String> {
    match event {
        ResolverEvent::Legacy(event) => Ok(build_legacy_entity_id(
            event.endpoint_id()?,
            event.unique_pid()?,
        )),
        ResolverEvent::Current(event) => Ok(event.entity_id()?.to_owned()),
    }
}

/// The normalized identifier of the process's parent, or `None` for a root
/// process. Absence of a parent is a valid terminal case, not an error.
pub fn extract_parent_entity_id(event: &ResolverEvent) -> Result<Option<String>> {
    match event {
        ResolverEvent::Legacy(event) => match event.unique_ppid() {
            Some(unique_ppid) => Ok(Some(build_legacy_entity_id(
                event.endpoint_id()?,
                unique_ppid,
            ))),
            None => Ok(None),
        },
        ResolverEvent::Current(event) => {
            Ok(event.parent_entity_id().map(str::to_owned))
        }
    }
}

/// Whether the event marks the process as terminated.
pub fn is_termination_event(event: &ResolverEvent) -> bool {
    match event {
        ResolverEvent::Legacy(event) => event.event_type_full() == Some("termination_event"),
        ResolverEvent::Current(event) => {
            event.event_types().iter().any(|event_type| *event_type == "end")
        }
    }
}

pub fn build_legacy_entity_id(endpoint_id: &str, unique_pid: u64) -> String {
    format!("{LEGACY_AGENT_TYPE}|{endpoint_id}|{unique_pid}")
}

pub fn parse_legacy_entity_id(entity_id: &str) -> Option<LegacyEntityId> {
    let captures = LEGACY_ENTITY_ID_REGEX.captures(entity_id)?;
    let unique_pid = captures.name("unique_pid")?.as_str().parse().ok()?;

    Some(LegacyEntityId {
        endpoint_id: captures.name("endpoint_id")?.as_str().to_owned(),
        unique_pid,
    })
}

fn coerce_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn legacy_event(unique_pid: u64, unique_ppid: Option<u64>) -> ResolverEvent {
        let mut endgame = json!({
            "unique_pid": unique_pid,
            "serial_event_id": 1234,
        });
        if let Some(unique_ppid) = unique_ppid {
            endgame["unique_ppid"] = json!(unique_ppid);
        }
        ResolverEvent::from_document(json!({
            "agent": { "type": "endgame", "id": "awesome-id" },
            "endgame": endgame,
        }))
        .unwrap()
    }

    fn current_event(entity_id: &str, parent_entity_id: Option<&str>) -> ResolverEvent {
        let mut process = json!({ "entity_id": entity_id });
        if let Some(parent_entity_id) = parent_entity_id {
            process["parent"] = json!({ "entity_id": parent_entity_id });
        }
        ResolverEvent::from_document(json!({
            "agent": { "type": "endpoint", "id": "awesome-id" },
            "event": { "id": "event-1" },
            "endpoint": { "process": process },
        }))
        .unwrap()
    }

    const FIELDS: EventIdFields = EventIdFields {
        legacy_field_path: "endgame.serial_event_id",
        field_path: "event.id",
    };

    #[test]
    fn test_extract_event_id_by_schema() {
        assert_eq!(
            extract_event_id(&legacy_event(5, None), &FIELDS).unwrap(),
            "1234"
        );
        assert_eq!(
            extract_event_id(&current_event("abcdef", None), &FIELDS).unwrap(),
            "event-1"
        );
    }

    #[test]
    fn test_extract_event_id_fails_loudly_on_missing_field() {
        let event = ResolverEvent::from_document(json!({
            "agent": { "type": "endgame", "id": "awesome-id" },
            "endgame": { "unique_pid": 5 },
        }))
        .unwrap();

        let err = extract_event_id(&event, &FIELDS).unwrap_err();
        assert!(err.to_string().contains("endgame.serial_event_id"));
    }

    #[test]
    fn test_extract_entity_id() {
        assert_eq!(
            extract_entity_id(&legacy_event(5, None)).unwrap(),
            "endgame|awesome-id|5"
        );
        assert_eq!(
            extract_entity_id(&current_event("abcdef", None)).unwrap(),
            "abcdef"
        );
    }

    #[test]
    fn test_extract_parent_entity_id_is_none_for_roots() {
        assert_eq!(extract_parent_entity_id(&legacy_event(5, None)).unwrap(), None);
        assert_eq!(
            extract_parent_entity_id(&current_event("abcdef", None)).unwrap(),
            None
        );
    }

    #[test]
    fn test_extract_parent_entity_id() {
        assert_eq!(
            extract_parent_entity_id(&legacy_event(5, Some(999))).unwrap(),
            Some("endgame|awesome-id|999".to_owned())
        );
        assert_eq!(
            extract_parent_entity_id(&current_event("abcdef", Some("012345"))).unwrap(),
            Some("012345".to_owned())
        );
    }

    #[test]
    fn test_legacy_entity_id_round_trip() {
        let entity_id = build_legacy_entity_id("12345", 5);
        assert_eq!(entity_id, "endgame|12345|5");

        let parsed = parse_legacy_entity_id(&entity_id).unwrap();
        assert_eq!(parsed.endpoint_id, "12345");
        assert_eq!(parsed.unique_pid, 5);

        // Deriving a parent entity id from a numeric ppid is deterministic.
        assert_eq!(
            build_legacy_entity_id(&parsed.endpoint_id, 999),
            build_legacy_entity_id(&parsed.endpoint_id, 999),
        );
    }

    #[rstest]
    #[case("endgame|missing-pid")]
    #[case("endpoint|12345|5")]
    #[case("endgame|12345|not-a-pid")]
    fn test_parse_legacy_entity_id_rejects_other_shapes(#[case] entity_id: &str) {
        assert!(parse_legacy_entity_id(entity_id).is_none());
    }

    #[test]
    fn test_is_termination_event() {
        let terminated = ResolverEvent::from_document(json!({
            "agent": { "type": "endgame", "id": "awesome-id" },
            "endgame": { "unique_pid": 5, "event_type_full": "termination_event" },
        }))
        .unwrap();
        assert!(is_termination_event(&terminated));
        assert!(!is_termination_event(&legacy_event(5, None)));

        let ended = ResolverEvent::from_document(json!({
            "agent": { "type": "endpoint" },
            "event": { "type": ["end"] },
            "endpoint": { "process": { "entity_id": "abcdef" } },
        }))
        .unwrap();
        assert!(is_termination_event(&ended));
        assert!(!is_termination_event(&current_event("abcdef", None)));
    }
}
