use serde_json::{Value, json};

use crate::config::ResolverConfig;
use crate::pagination::{PaginationBounds, paginate};
use crate::prelude::*;
use crate::queries::SearchRequest;
use crate::tree::{IdGroup, partition_entity_ids};

const LEGACY_SORT_FIELD: &str = "endgame.serial_event_id";
const SORT_FIELD: &str = "event.id";

/// A paginated search request paired with the unpaginated count request over
/// the same filter, for exact-count reconciliation.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub request: SearchRequest,
    pub count: SearchRequest,
}

/// Lifecycle events belonging to the requested process nodes themselves.
///
/// All ids must target one schema (and, for legacy ids, one endpoint);
/// callers with a mixed set partition it first.
pub fn node_query(
    config: &ResolverConfig,
    entity_ids: &[String],
    bounds: &PaginationBounds,
) -> Result<BuiltQuery> {
    Ok(node_query_for_group(config, &single_group(entity_ids)?, bounds))
}

/// [`node_query`] for an already-partitioned id batch.
pub fn node_query_for_group(
    config: &ResolverConfig,
    group: &IdGroup,
    bounds: &PaginationBounds,
) -> BuiltQuery {
    match group {
        IdGroup::Legacy {
            endpoint_id,
            unique_pids,
        } => {
            let query = json!({
                "bool": {
                    "filter": [
                        { "terms": { "endgame.unique_pid": unique_pids } },
                        { "term": { "agent.id": endpoint_id } },
                        { "term": { "event.category": "process" } },
                    ],
                },
            });
            build(config, true, query, bounds)
        }
        IdGroup::Current { entity_ids } => {
            let query = json!({
                "bool": {
                    "filter": [
                        { "terms": { "endpoint.process.entity_id": entity_ids } },
                        { "term": { "event.category": "process" } },
                    ],
                },
            });
            build(config, false, query, bounds)
        }
    }
}

/// Lifecycle events for the requested nodes plus every event naming one of
/// them as parent, the hit set node/children response assembly partitions.
pub fn node_and_children_query(
    config: &ResolverConfig,
    entity_ids: &[String],
    bounds: &PaginationBounds,
) -> Result<BuiltQuery> {
    match single_group(entity_ids)? {
        IdGroup::Legacy {
            endpoint_id,
            unique_pids,
        } => {
            let query = json!({
                "bool": {
                    "filter": [
                        {
                            "bool": {
                                "should": [
                                    { "terms": { "endgame.unique_pid": unique_pids } },
                                    { "terms": { "endgame.unique_ppid": unique_pids } },
                                ],
                            },
                        },
                        { "term": { "agent.id": endpoint_id } },
                        { "term": { "event.category": "process" } },
                    ],
                },
            });
            Ok(build(config, true, query, bounds))
        }
        IdGroup::Current { entity_ids } => {
            let query = json!({
                "bool": {
                    "filter": [
                        {
                            "bool": {
                                "should": [
                                    { "terms": { "endpoint.process.entity_id": entity_ids } },
                                    { "terms": { "endpoint.process.parent.entity_id": entity_ids } },
                                ],
                            },
                        },
                        { "term": { "event.category": "process" } },
                    ],
                },
            });
            Ok(build(config, false, query, bounds))
        }
    }
}

fn single_group(entity_ids: &[String]) -> Result<IdGroup> {
    let mut groups = partition_entity_ids(entity_ids);
    if groups.is_empty() {
        bail!("No entity ids were provided");
    }
    if groups.len() > 1 {
        bail!("Entity ids span more than one schema or endpoint; partition them first");
    }
    Ok(groups.remove(0))
}

fn build(config: &ResolverConfig, legacy: bool, query: Value, bounds: &PaginationBounds) -> BuiltQuery {
    let (index, sort_field) = if legacy {
        (config.backend.legacy_event_index.clone(), LEGACY_SORT_FIELD)
    } else {
        (config.backend.event_index.clone(), SORT_FIELD)
    };

    BuiltQuery {
        request: SearchRequest {
            index: index.clone(),
            body: paginate(bounds, sort_field, query.clone()),
        },
        count: SearchRequest {
            index,
            body: json!({ "query": query }),
        },
    }
}
