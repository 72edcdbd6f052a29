use serde_json::Value;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::events::ResolverEvent;

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Type")]
    event_type: String,
    #[tabled(rename = "Kind")]
    kind: String,
}

pub(crate) fn build_event_table(events: &[ResolverEvent]) -> String {
    let rows: Vec<EventRow> = events
        .iter()
        .map(|event| EventRow {
            category: field_display(event, "event.category"),
            event_type: field_display(event, "event.type"),
            kind: field_display(event, "event.kind"),
        })
        .collect();

    Table::new(&rows).with(Style::modern()).to_string()
}

/// Render a document field for table output; absent fields show as "-".
pub(crate) fn field_display(event: &ResolverEvent, path: &str) -> String {
    match event.field(path) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Array(values)) => values
            .iter()
            .map(value_display)
            .collect::<Vec<_>>()
            .join(", "),
        Some(value) => value.to_string(),
        None => "-".to_owned(),
    }
}

fn value_display(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        value => value.to_string(),
    }
}
