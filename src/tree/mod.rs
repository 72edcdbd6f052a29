use itertools::Itertools;

use crate::events::normalize::parse_legacy_entity_id;

pub mod dal;
pub mod fetcher;
pub mod handler;
pub mod node_data;
pub mod query_builder;

/// A batch of entity ids that one backend query can address: legacy ids are
/// scoped to a single endpoint, current ids are global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdGroup {
    Legacy {
        endpoint_id: String,
        unique_pids: Vec<String>,
    },
    Current {
        entity_ids: Vec<String>,
    },
}

/// Split a mixed set of normalized entity ids into per-schema query batches.
/// Legacy ids are grouped by the endpoint embedded in the composite key.
pub fn partition_entity_ids(entity_ids: &[String]) -> Vec<IdGroup> {
    let mut groups = Vec::new();
    let mut current_ids = Vec::new();
    let mut legacy_ids = Vec::new();

    for entity_id in entity_ids {
        match parse_legacy_entity_id(entity_id) {
            Some(legacy) => legacy_ids.push((legacy.endpoint_id, legacy.unique_pid.to_string())),
            None => current_ids.push(entity_id.clone()),
        }
    }

    for (endpoint_id, unique_pids) in legacy_ids.into_iter().into_group_map() {
        groups.push(IdGroup::Legacy {
            endpoint_id,
            unique_pids,
        });
    }
    if !current_ids.is_empty() {
        groups.push(IdGroup::Current {
            entity_ids: current_ids,
        });
    }

    groups
}
