use serde_json::{Value, json};

use crate::events::normalize::EventIdFields;

pub const EVENT_ID_FIELDS: EventIdFields = EventIdFields {
    legacy_field_path: "endgame.metadata.message_id",
    field_path: "event.id",
};

/// Alert events whose acting process is one of `unique_pids`, scoped to one
/// endpoint.
pub(super) fn legacy_query(endpoint_id: &str, unique_pids: &[String]) -> Value {
    json!({
        "bool": {
            "filter": [
                { "terms": { "endgame.data.alert_details.acting_process.unique_pid": unique_pids } },
                { "term": { "agent.id": endpoint_id } },
                { "term": { "event.kind": "alert" } },
            ],
        },
    })
}

/// Alert events for the requested entities. The entity id field moved during
/// the schema migration, so both locations are matched to avoid missing
/// events ingested in the overlap window.
pub(super) fn query(entity_ids: &[String]) -> Value {
    json!({
        "bool": {
            "filter": [
                {
                    "bool": {
                        "should": [
                            { "terms": { "endpoint.process.entity_id": entity_ids } },
                            { "terms": { "process.entity_id": entity_ids } },
                        ],
                    },
                },
                { "term": { "event.kind": "alert" } },
            ],
        },
    })
}
