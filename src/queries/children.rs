use serde_json::{Value, json};

use crate::events::normalize::EventIdFields;

pub const EVENT_ID_FIELDS: EventIdFields = EventIdFields {
    legacy_field_path: "endgame.serial_event_id",
    field_path: "event.id",
};

/// Process-start events whose legacy parent process id is one of
/// `unique_pids`, scoped to one endpoint.
pub(super) fn legacy_query(endpoint_id: &str, unique_pids: &[String]) -> Value {
    json!({
        "bool": {
            "filter": [
                { "terms": { "endgame.unique_ppid": unique_pids } },
                { "term": { "agent.id": endpoint_id } },
                { "term": { "event.category": "process" } },
                { "term": { "event.type": "process_start" } },
            ],
        },
    })
}

/// Process-start events whose parent entity id is one of `entity_ids`.
pub(super) fn query(entity_ids: &[String]) -> Value {
    json!({
        "bool": {
            "filter": [
                { "terms": { "endpoint.process.parent.entity_id": entity_ids } },
                { "term": { "event.category": "process" } },
                { "term": { "event.type": "start" } },
            ],
        },
    })
}
