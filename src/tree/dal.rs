use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::ResolverConfig;
use crate::events::ResolverEvent;
use crate::events::normalize::{extract_entity_id, extract_parent_entity_id, is_legacy};
use crate::pagination::{PaginationBounds, events_from_response};
use crate::prelude::*;
use crate::queries::{QueryKind, ResolverQuery};
use crate::search_client::SearchSource;
use crate::tree::fetcher::{
    DataAccessLayer, EventSchema, ResolverEntity, ResolverNode, TreeRequest,
};
use crate::tree::query_builder::node_query;
use crate::tree::{IdGroup, partition_entity_ids};

/// [`DataAccessLayer`] implementation backed by the search backend.
///
/// Ancestors are collected by walking parent entity ids one level at a time;
/// descendants by breadth-first children queries. Both walks stop at the
/// limits carried by the request.
pub struct SearchBackendDal<'a, S: SearchSource> {
    client: &'a S,
    config: ResolverConfig,
}

impl<'a, S: SearchSource> SearchBackendDal<'a, S> {
    pub fn new(client: &'a S, config: ResolverConfig) -> Self {
        Self { client, config }
    }

    /// Lifecycle events of a single node, one default-sized page.
    async fn node_events(&self, entity_id: &str) -> Result<Vec<ResolverEvent>> {
        let bounds = PaginationBounds {
            from: 0,
            page: 0,
            page_size: self.config.result_list.default_page_size,
        };
        let built = node_query(&self.config, &[entity_id.to_owned()], &bounds)?;
        let response = self
            .client
            .search(&built.request.index, &built.request.body)
            .await?;
        let (events, _) = events_from_response(response)?;
        Ok(events)
    }

    fn resolution_index(&self, indices: &[String]) -> String {
        if indices.is_empty() {
            format!(
                "{},{}",
                self.config.backend.event_index, self.config.backend.legacy_event_index
            )
        } else {
            indices.join(",")
        }
    }
}

#[async_trait(?Send)]
impl<'a, S: SearchSource> DataAccessLayer for SearchBackendDal<'a, S> {
    async fn entities(
        &self,
        document_id: &str,
        indices: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<ResolverEntity>> {
        ensure_live(token)?;

        let body = json!({ "query": { "ids": { "values": [document_id] } } });
        let response = self
            .client
            .search(&self.resolution_index(indices), &body)
            .await?;

        let mut entities = Vec::new();
        for hit in response.hits.hits {
            let event = ResolverEvent::from_document(hit.source)?;
            entities.push(ResolverEntity {
                id: extract_entity_id(&event)?,
                schema: schema_of(&event),
                name: process_name(&event),
            });
        }
        Ok(entities)
    }

    async fn resolver_tree(
        &self,
        request: &TreeRequest,
        token: &CancellationToken,
    ) -> Result<Vec<ResolverNode>> {
        ensure_live(token)?;
        debug!(
            "fetching tree for {} (schema {:?}, indices {:?})",
            request.entity_id, request.schema, request.indices
        );
        let mut nodes = Vec::new();

        let origin_events = self.node_events(&request.entity_id).await?;
        let origin_parent = first_parent(&origin_events)?;
        nodes.push(ResolverNode {
            id: request.entity_id.clone(),
            parent: origin_parent.clone(),
            name: first_name(&origin_events),
        });

        // Ancestor chain, one backend round-trip per level.
        let mut current = origin_parent;
        let mut remaining = request.ancestors;
        while let Some(entity_id) = current {
            if remaining == 0 {
                break;
            }
            ensure_live(token)?;

            let events = self.node_events(&entity_id).await?;
            let parent = first_parent(&events)?;
            nodes.push(ResolverNode {
                id: entity_id,
                parent: parent.clone(),
                name: first_name(&events),
            });
            current = parent;
            remaining -= 1;
        }

        // Descendants, breadth first. Frontier batches are partitioned per
        // schema/endpoint since one query cannot span them.
        let mut seen: HashSet<String> = nodes.iter().map(|node| node.id.clone()).collect();
        let mut frontier = vec![request.entity_id.clone()];
        let mut remaining = request.descendants;
        while !frontier.is_empty() && remaining > 0 {
            ensure_live(token)?;

            let mut next = Vec::new();
            for group in partition_entity_ids(&frontier) {
                if remaining == 0 {
                    break;
                }
                let (endpoint_id, ids) = match group {
                    IdGroup::Legacy {
                        endpoint_id,
                        unique_pids,
                    } => (Some(endpoint_id), unique_pids),
                    IdGroup::Current { entity_ids } => (None, entity_ids),
                };

                let bounds = PaginationBounds {
                    from: 0,
                    page: 0,
                    page_size: remaining,
                };
                let query =
                    ResolverQuery::new(QueryKind::Children, &self.config, endpoint_id, Some(bounds));
                let results = query.search(self.client, &ids).await?;

                for hit in results.results {
                    if remaining == 0 {
                        break;
                    }
                    let entity_id = extract_entity_id(&hit.event)?;
                    if !seen.insert(entity_id.clone()) {
                        continue;
                    }
                    nodes.push(ResolverNode {
                        id: entity_id.clone(),
                        parent: extract_parent_entity_id(&hit.event)?,
                        name: process_name(&hit.event),
                    });
                    next.push(entity_id);
                    remaining -= 1;
                }
            }
            frontier = next;
        }

        Ok(nodes)
    }
}

fn ensure_live(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        bail!("the tree request was superseded");
    }
    Ok(())
}

fn schema_of(event: &ResolverEvent) -> EventSchema {
    if is_legacy(event) {
        EventSchema::Legacy
    } else {
        EventSchema::Current
    }
}

fn process_name(event: &ResolverEvent) -> Option<String> {
    match event {
        ResolverEvent::Legacy(event) => event.process_name().map(str::to_owned),
        ResolverEvent::Current(event) => event.process_name().map(str::to_owned),
    }
}

fn first_parent(events: &[ResolverEvent]) -> Result<Option<String>> {
    for event in events {
        if let Some(parent) = extract_parent_entity_id(event)? {
            return Ok(Some(parent));
        }
    }
    Ok(None)
}

fn first_name(events: &[ResolverEvent]) -> Option<String> {
    events.iter().find_map(process_name)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use serde_json::Value;

    use super::*;
    use crate::pagination::{Total, TotalRelation};
    use crate::search_client::{SearchHit, SearchHits, SearchResponse};

    struct MockBackend {
        responses: RefCell<VecDeque<SearchResponse>>,
        requests: RefCell<Vec<(String, Value)>>,
    }

    impl MockBackend {
        fn new(responses: Vec<SearchResponse>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                requests: RefCell::new(Vec::new()),
            }
        }
    }

    #[async_trait(?Send)]
    impl SearchSource for MockBackend {
        async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse> {
            self.requests
                .borrow_mut()
                .push((index.to_owned(), body.clone()));
            self.responses
                .borrow_mut()
                .pop_front()
                .context("unexpected search call")
        }

        async fn count(&self, _index: &str, _body: &Value) -> Result<u64> {
            unreachable!("the data access layer never counts");
        }
    }

    fn response_of(documents: Vec<Value>) -> SearchResponse {
        SearchResponse {
            hits: SearchHits {
                total: Total {
                    value: documents.len() as u64,
                    relation: TotalRelation::Eq,
                },
                hits: documents
                    .into_iter()
                    .map(|source| SearchHit { source })
                    .collect(),
            },
        }
    }

    fn lifecycle_doc(entity_id: &str, parent: Option<&str>, name: &str) -> Value {
        let mut process = json!({ "entity_id": entity_id });
        if let Some(parent) = parent {
            process["parent"] = json!({ "entity_id": parent });
        }
        json!({
            "agent": { "type": "endpoint", "id": "awesome-id" },
            "event": { "id": format!("{entity_id}-event"), "category": "process", "type": "start" },
            "endpoint": { "process": process },
            "process": { "name": name },
        })
    }

    fn request(entity_id: &str, descendants: u64) -> TreeRequest {
        TreeRequest {
            entity_id: entity_id.to_owned(),
            schema: EventSchema::Current,
            indices: Vec::new(),
            ancestors: 200,
            descendants,
        }
    }

    #[tokio::test]
    async fn test_entities_resolves_a_document_to_an_entity() {
        let backend = MockBackend::new(vec![response_of(vec![lifecycle_doc(
            "origin",
            Some("parent-1"),
            "powershell.exe",
        )])]);
        let dal = SearchBackendDal::new(&backend, ResolverConfig::default());

        let entities = dal
            .entities("doc-1", &[], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "origin");
        assert_eq!(entities[0].schema, EventSchema::Current);
        assert_eq!(entities[0].name, Some("powershell.exe".to_owned()));

        let requests = backend.requests.borrow();
        assert_eq!(requests[0].0, "events-endpoint-*,endgame-*");
        assert_eq!(requests[0].1["query"]["ids"]["values"], json!(["doc-1"]));
    }

    #[tokio::test]
    async fn test_entities_uses_the_requested_indices() {
        let backend = MockBackend::new(vec![response_of(Vec::new())]);
        let dal = SearchBackendDal::new(&backend, ResolverConfig::default());

        let entities = dal
            .entities(
                "doc-1",
                &["events-a".to_owned(), "events-b".to_owned()],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(entities.is_empty());
        assert_eq!(backend.requests.borrow()[0].0, "events-a,events-b");
    }

    #[tokio::test]
    async fn test_tree_walks_ancestors_and_descendants() {
        let backend = MockBackend::new(vec![
            // Origin lifecycle events.
            response_of(vec![lifecycle_doc("origin", Some("parent-1"), "bash")]),
            // Ancestor walk: parent-1 is a root.
            response_of(vec![lifecycle_doc("parent-1", None, "init")]),
            // First BFS round: children of the origin.
            response_of(vec![
                lifecycle_doc("child-1", Some("origin"), "curl"),
                lifecycle_doc("child-2", Some("origin"), "sleep"),
            ]),
            // Second BFS round: no grandchildren.
            response_of(Vec::new()),
        ]);
        let dal = SearchBackendDal::new(&backend, ResolverConfig::default());

        let nodes = dal
            .resolver_tree(&request("origin", 1000), &CancellationToken::new())
            .await
            .unwrap();

        let summary: Vec<_> = nodes
            .iter()
            .map(|node| (node.id.as_str(), node.parent.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("origin", Some("parent-1")),
                ("parent-1", None),
                ("child-1", Some("origin")),
                ("child-2", Some("origin")),
            ]
        );
        assert_eq!(nodes[0].name, Some("bash".to_owned()));
        assert_eq!(backend.requests.borrow().len(), 4);
    }

    #[tokio::test]
    async fn test_tree_respects_the_descendant_limit() {
        let backend = MockBackend::new(vec![
            response_of(vec![lifecycle_doc("origin", None, "bash")]),
            response_of(vec![
                lifecycle_doc("child-1", Some("origin"), "curl"),
                lifecycle_doc("child-2", Some("origin"), "sleep"),
            ]),
        ]);
        let dal = SearchBackendDal::new(&backend, ResolverConfig::default());

        let nodes = dal
            .resolver_tree(&request("origin", 1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].id, "child-1");
        // The first BFS round exhausted the limit, so no second round runs.
        assert_eq!(backend.requests.borrow().len(), 2);
        // The children query asked for no more hits than the limit allows.
        assert_eq!(backend.requests.borrow()[1].1["size"], json!(1));
    }

    #[tokio::test]
    async fn test_tree_stops_when_the_token_is_cancelled() {
        let backend = MockBackend::new(Vec::new());
        let dal = SearchBackendDal::new(&backend, ResolverConfig::default());

        let token = CancellationToken::new();
        token.cancel();

        let err = dal
            .resolver_tree(&request("origin", 1000), &token)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("superseded"));
    }
}
