use std::collections::{HashMap, HashSet};
use std::fmt::Display;

use console::style;

use crate::events::ResolverEvent;
use crate::events::normalize::{extract_entity_id, is_termination_event};
use crate::prelude::*;

/// Fetch state of one process node's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// A request for this node is outstanding.
    Loading,
    /// The request for this node failed.
    Error,
    Running,
    Terminated,
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Loading => write!(f, "{}", style("loading").dim()),
            NodeStatus::Error => write!(f, "{}", style("error").red().bold()),
            NodeStatus::Running => write!(f, "{}", style("running").green()),
            NodeStatus::Terminated => write!(f, "{}", style("terminated").yellow()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    pub events: Vec<ResolverEvent>,
    pub status: NodeStatus,
}

/// Events the backend returned for one node, with termination already
/// detected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedNodeData {
    pub events: Vec<ResolverEvent>,
    pub terminated: bool,
}

/// Per-node fetch state, keyed by entity id. Absence from the map means the
/// node must be (re-)requested; it is a valid transient state distinct from
/// the four statuses.
pub type IdToNodeInfo = HashMap<String, NodeData>;

/// Mark the requested ids as loading. Ids that already resolved keep their
/// state, so re-requesting an in-flight id is a no-op.
pub fn set_requested_nodes(mut nodes: IdToNodeInfo, requested: &HashSet<String>) -> IdToNodeInfo {
    for id in requested {
        nodes.entry(id.clone()).or_insert_with(|| NodeData {
            events: Vec::new(),
            status: NodeStatus::Loading,
        });
    }
    nodes
}

/// Force the ids into the error state, overriding any prior state. A failed
/// request is authoritative for everything it covered.
pub fn set_error_nodes(mut nodes: IdToNodeInfo, error_ids: &HashSet<String>) -> IdToNodeInfo {
    for id in error_ids {
        nodes.insert(
            id.clone(),
            NodeData {
                events: Vec::new(),
                status: NodeStatus::Error,
            },
        );
    }
    nodes
}

/// Remove the id so the next reconciliation pass re-requests it.
pub fn set_reloaded_nodes(mut nodes: IdToNodeInfo, node_id: &str) -> IdToNodeInfo {
    nodes.remove(node_id);
    nodes
}

/// Reconcile the map with the events the backend returned.
///
/// A requested id missing from `received` is ambiguous when the backend
/// returned as many events as asked for (`reached_limit`): its data may exist
/// but was crowded out, so the entry is removed to signal a follow-up fetch.
/// When the limit was not reached, the absence is authoritative and the node
/// is recorded as running with no events.
pub fn update_with_received_nodes(
    mut nodes: IdToNodeInfo,
    received: HashMap<String, FetchedNodeData>,
    requested: &HashSet<String>,
    reached_limit: bool,
) -> IdToNodeInfo {
    for id in requested {
        if received.contains_key(id) {
            continue;
        }
        if reached_limit {
            nodes.remove(id);
        } else {
            nodes.insert(
                id.clone(),
                NodeData {
                    events: Vec::new(),
                    status: NodeStatus::Running,
                },
            );
        }
    }

    for (id, info) in received {
        nodes.insert(
            id,
            NodeData {
                events: info.events,
                status: if info.terminated {
                    NodeStatus::Terminated
                } else {
                    NodeStatus::Running
                },
            },
        );
    }

    nodes
}

/// The subset of `ids` with no entry in the map, i.e. the ones that still
/// need a request.
pub fn ids_not_in_base(nodes: &IdToNodeInfo, ids: &HashSet<String>) -> HashSet<String> {
    ids.iter()
        .filter(|id| !nodes.contains_key(*id))
        .cloned()
        .collect()
}

/// The first event for a node, if its data has arrived.
pub fn first_event(data: Option<&NodeData>) -> Option<&ResolverEvent> {
    match data {
        Some(NodeData {
            status: NodeStatus::Running | NodeStatus::Terminated,
            events,
        }) => events.first(),
        _ => None,
    }
}

/// Group a flat event list by entity id, detecting termination per node.
/// Event order within each node follows the input order.
pub fn group_received_events(
    events: Vec<ResolverEvent>,
) -> Result<HashMap<String, FetchedNodeData>> {
    let mut received: HashMap<String, FetchedNodeData> = HashMap::new();

    for event in events {
        let entity_id = extract_entity_id(&event)?;
        let entry = received.entry(entity_id).or_default();
        entry.terminated = entry.terminated || is_termination_event(&event);
        entry.events.push(event);
    }

    Ok(received)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn requested(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| (*id).to_owned()).collect()
    }

    fn event(entity_id: &str, event_type: &str) -> ResolverEvent {
        ResolverEvent::from_document(json!({
            "agent": { "type": "endpoint", "id": "awesome-id" },
            "event": { "category": "process", "type": [event_type] },
            "endpoint": { "process": { "entity_id": entity_id } },
        }))
        .unwrap()
    }

    #[test]
    fn test_set_requested_nodes_is_idempotent() {
        let ids = requested(&["a", "b"]);

        let first = set_requested_nodes(IdToNodeInfo::new(), &ids);
        assert_eq!(first.len(), 2);
        assert_eq!(first["a"].status, NodeStatus::Loading);

        let second = set_requested_nodes(first.clone(), &ids);
        assert_eq!(second, first);
    }

    #[test]
    fn test_set_requested_nodes_leaves_resolved_ids_untouched() {
        let mut nodes = IdToNodeInfo::new();
        nodes.insert(
            "a".to_owned(),
            NodeData {
                events: vec![event("a", "start")],
                status: NodeStatus::Running,
            },
        );

        let nodes = set_requested_nodes(nodes, &requested(&["a", "b"]));
        assert_eq!(nodes["a"].status, NodeStatus::Running);
        assert_eq!(nodes["a"].events.len(), 1);
        assert_eq!(nodes["b"].status, NodeStatus::Loading);
    }

    #[test]
    fn test_set_error_nodes_overrides_prior_state() {
        let mut nodes = IdToNodeInfo::new();
        nodes.insert(
            "a".to_owned(),
            NodeData {
                events: vec![event("a", "start")],
                status: NodeStatus::Running,
            },
        );

        let nodes = set_error_nodes(nodes, &requested(&["a"]));
        assert_eq!(nodes["a"].status, NodeStatus::Error);
        assert!(nodes["a"].events.is_empty());
    }

    #[test]
    fn test_update_removes_absent_ids_when_the_limit_was_reached() {
        let ids = requested(&["a", "b"]);
        let nodes = set_requested_nodes(IdToNodeInfo::new(), &ids);

        let mut received = HashMap::new();
        received.insert(
            "a".to_owned(),
            FetchedNodeData {
                events: vec![event("a", "start")],
                terminated: false,
            },
        );

        let nodes = update_with_received_nodes(nodes, received, &ids, true);
        assert_eq!(nodes["a"].status, NodeStatus::Running);
        // "b" must be re-requested, not resolved.
        assert!(!nodes.contains_key("b"));
    }

    #[test]
    fn test_update_marks_absent_ids_running_when_the_limit_was_not_reached() {
        let ids = requested(&["a", "b"]);
        let nodes = set_requested_nodes(IdToNodeInfo::new(), &ids);

        let mut received = HashMap::new();
        received.insert(
            "a".to_owned(),
            FetchedNodeData {
                events: vec![event("a", "start")],
                terminated: false,
            },
        );

        let nodes = update_with_received_nodes(nodes, received, &ids, false);
        assert_eq!(nodes["b"].status, NodeStatus::Running);
        assert!(nodes["b"].events.is_empty());
    }

    #[test]
    fn test_update_marks_terminated_nodes() {
        let ids = requested(&["a"]);
        let nodes = set_requested_nodes(IdToNodeInfo::new(), &ids);

        let mut received = HashMap::new();
        received.insert(
            "a".to_owned(),
            FetchedNodeData {
                events: vec![event("a", "start"), event("a", "end")],
                terminated: true,
            },
        );

        let nodes = update_with_received_nodes(nodes, received, &ids, false);
        assert_eq!(nodes["a"].status, NodeStatus::Terminated);
        assert_eq!(nodes["a"].events.len(), 2);
    }

    #[test]
    fn test_set_reloaded_nodes_forces_a_refetch() {
        let ids = requested(&["a"]);
        let nodes = set_requested_nodes(IdToNodeInfo::new(), &ids);

        let nodes = set_reloaded_nodes(nodes, "a");
        assert!(!nodes.contains_key("a"));
        assert_eq!(ids_not_in_base(&nodes, &ids), ids);
    }

    #[test]
    fn test_first_event_only_for_arrived_data() {
        assert!(first_event(None).is_none());
        assert!(
            first_event(Some(&NodeData {
                events: Vec::new(),
                status: NodeStatus::Loading,
            }))
            .is_none()
        );

        let data = NodeData {
            events: vec![event("a", "start")],
            status: NodeStatus::Running,
        };
        assert!(first_event(Some(&data)).is_some());
    }

    #[test]
    fn test_group_received_events_detects_termination() {
        let events = vec![
            event("a", "start"),
            event("b", "start"),
            event("a", "end"),
        ];

        let received = group_received_events(events).unwrap();
        assert_eq!(received.len(), 2);
        assert!(received["a"].terminated);
        assert_eq!(received["a"].events.len(), 2);
        assert!(!received["b"].terminated);
    }
}
