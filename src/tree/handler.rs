use std::collections::HashMap;

use serde::Serialize;

use crate::config::ResolverConfig;
use crate::events::ResolverEvent;
use crate::events::normalize::{extract_entity_id, extract_parent_entity_id};
use crate::pagination::{
    PaginationBounds, PaginationInfo, Total, compute_pagination, reconcile_total,
};
use crate::prelude::*;
use crate::queries::SearchRequest;
use crate::search_client::SearchSource;

/// One process node's complete visible event set for the current response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub entity_id: String,
    pub parent_entity_id: Option<String>,
    pub events: Vec<ResolverEvent>,
}

/// Pagination metadata echoed back to the caller alongside the reconciled
/// total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResponsePagination {
    pub total: u64,
    pub request_from_index: u64,
    pub request_page_index: u64,
    pub request_page_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeResponse {
    pub node: NodeRecord,
    #[serde(flatten)]
    pub pagination: ResponsePagination,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildrenResponse {
    pub origin: NodeRecord,
    pub children: Vec<NodeRecord>,
    #[serde(flatten)]
    pub pagination: ResponsePagination,
}

/// Assembles flat search hits into node-shaped responses for one origin
/// entity, resolving inexact totals through the count fallback.
pub struct ResolverSearchHandler<'a, S: SearchSource> {
    client: &'a S,
    pagination: PaginationBounds,
    count_query: SearchRequest,
    entity_id: String,
}

impl<'a, S: SearchSource> ResolverSearchHandler<'a, S> {
    pub fn new(
        client: &'a S,
        config: &ResolverConfig,
        pagination_info: &PaginationInfo,
        count_query: SearchRequest,
        entity_id: String,
    ) -> Self {
        Self {
            client,
            pagination: compute_pagination(config, pagination_info),
            count_query,
            entity_id,
        }
    }

    /// Shape the hits belonging to the origin entity into a single-node
    /// response, preserving their relative order. An empty hit set is a valid
    /// empty result, not an error.
    pub async fn build_node_response(
        &self,
        hits: Vec<ResolverEvent>,
        total: Total,
    ) -> Result<NodeResponse> {
        let mut events = Vec::new();
        let mut parent_entity_id = None;

        for event in hits {
            if extract_entity_id(&event)? != self.entity_id {
                continue;
            }
            if parent_entity_id.is_none() {
                parent_entity_id = extract_parent_entity_id(&event)?;
            }
            events.push(event);
        }

        Ok(NodeResponse {
            node: NodeRecord {
                entity_id: self.entity_id.clone(),
                parent_entity_id,
                events,
            },
            pagination: self.pagination_with(total).await?,
        })
    }

    /// Partition the hits into the origin node and its children. Children
    /// keep first-observed node order and per-node event order; every child's
    /// `parent_entity_id` is the origin id by construction, so the response
    /// stays consistent even when individual hits carry partial parent
    /// fields.
    pub async fn build_children_response(
        &self,
        hits: Vec<ResolverEvent>,
        total: Total,
    ) -> Result<ChildrenResponse> {
        let mut origin_events = Vec::new();
        let mut origin_parent = None;
        let mut children: Vec<NodeRecord> = Vec::new();
        let mut child_index: HashMap<String, usize> = HashMap::new();

        for event in hits {
            let entity_id = extract_entity_id(&event)?;
            if entity_id == self.entity_id {
                if origin_parent.is_none() {
                    origin_parent = extract_parent_entity_id(&event)?;
                }
                origin_events.push(event);
                continue;
            }

            match child_index.get(&entity_id) {
                Some(&index) => children[index].events.push(event),
                None => {
                    child_index.insert(entity_id.clone(), children.len());
                    children.push(NodeRecord {
                        entity_id,
                        parent_entity_id: Some(self.entity_id.clone()),
                        events: vec![event],
                    });
                }
            }
        }

        Ok(ChildrenResponse {
            origin: NodeRecord {
                entity_id: self.entity_id.clone(),
                parent_entity_id: origin_parent,
                events: origin_events,
            },
            children,
            pagination: self.pagination_with(total).await?,
        })
    }

    async fn pagination_with(&self, total: Total) -> Result<ResponsePagination> {
        let total = reconcile_total(total, || {
            self.client
                .count(&self.count_query.index, &self.count_query.body)
        })
        .await?;

        Ok(ResponsePagination {
            total,
            request_from_index: self.pagination.from,
            request_page_index: self.pagination.page,
            request_page_size: self.pagination.page_size,
        })
    }
}
