use serde_json::{Value, json};

use crate::config::ResolverConfig;
use crate::events::normalize::EventIdFields;
use crate::pagination::{PaginatedResults, PaginationBounds, paginate, paginated_results};
use crate::prelude::*;
use crate::search_client::SearchSource;

pub mod children;
pub mod related_alerts;

/// The closed set of query kinds the resolver issues against the events
/// index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Process-start events whose parent is one of the requested entities.
    Children,
    /// Alert events raised by one of the requested entities.
    RelatedAlerts,
}

impl QueryKind {
    /// The document paths carrying this kind's event id, which double as the
    /// pagination sort fields.
    pub fn event_id_fields(&self) -> &'static EventIdFields {
        match self {
            QueryKind::Children => &children::EVENT_ID_FIELDS,
            QueryKind::RelatedAlerts => &related_alerts::EVENT_ID_FIELDS,
        }
    }

    fn legacy_query(&self, endpoint_id: &str, unique_pids: &[String]) -> Value {
        match self {
            QueryKind::Children => children::legacy_query(endpoint_id, unique_pids),
            QueryKind::RelatedAlerts => related_alerts::legacy_query(endpoint_id, unique_pids),
        }
    }

    fn query(&self, entity_ids: &[String]) -> Value {
        match self {
            QueryKind::Children => children::query(entity_ids),
            QueryKind::RelatedAlerts => related_alerts::query(entity_ids),
        }
    }
}

/// A ready-to-send search request: target index plus request body.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub index: String,
    pub body: Value,
}

/// Schema-aware, pagination-aware query constructor.
///
/// Supplying an endpoint id selects the legacy query form (legacy-scoped
/// fields against the legacy event index); otherwise the current-schema form
/// is produced against the configured event index pattern.
pub struct ResolverQuery {
    kind: QueryKind,
    event_index: String,
    legacy_event_index: String,
    endpoint_id: Option<String>,
    pagination: Option<PaginationBounds>,
}

impl ResolverQuery {
    pub fn new(
        kind: QueryKind,
        config: &ResolverConfig,
        endpoint_id: Option<String>,
        pagination: Option<PaginationBounds>,
    ) -> Self {
        Self {
            kind,
            event_index: config.backend.event_index.clone(),
            legacy_event_index: config.backend.legacy_event_index.clone(),
            endpoint_id,
            pagination,
        }
    }

    /// Produce exactly one backend query for the requested ids, discriminated
    /// by the presence of an endpoint id.
    pub fn build(&self, ids: &[String]) -> SearchRequest {
        let fields = self.kind.event_id_fields();
        match &self.endpoint_id {
            Some(endpoint_id) => SearchRequest {
                index: self.legacy_event_index.clone(),
                body: self.paginate_by(
                    fields.legacy_field_path,
                    self.kind.legacy_query(endpoint_id, ids),
                ),
            },
            None => SearchRequest {
                index: self.event_index.clone(),
                body: self.paginate_by(fields.field_path, self.kind.query(ids)),
            },
        }
    }

    /// The same filter without pagination, for exact-count requests.
    pub fn count(&self, ids: &[String]) -> SearchRequest {
        let query = match &self.endpoint_id {
            Some(endpoint_id) => self.kind.legacy_query(endpoint_id, ids),
            None => self.kind.query(ids),
        };
        SearchRequest {
            index: self.index().to_owned(),
            body: json!({ "query": query }),
        }
    }

    pub fn index(&self) -> &str {
        if self.endpoint_id.is_some() {
            &self.legacy_event_index
        } else {
            &self.event_index
        }
    }

    /// Execute the query and post-process the raw hits into
    /// `(event, extracted event id)` pairs.
    pub async fn search(
        &self,
        client: &impl SearchSource,
        ids: &[String],
    ) -> Result<PaginatedResults> {
        let request = self.build(ids);
        let response = client.search(&request.index, &request.body).await?;
        paginated_results(response, self.kind.event_id_fields())
    }

    fn paginate_by(&self, sort_field: &str, query: Value) -> Value {
        match &self.pagination {
            Some(bounds) => paginate(bounds, sort_field, query),
            None => json!({ "query": query }),
        }
    }
}
