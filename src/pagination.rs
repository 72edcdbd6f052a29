use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::ResolverConfig;
use crate::events::ResolverEvent;
use crate::events::normalize::{EventIdFields, extract_event_id};
use crate::prelude::*;
use crate::search_client::SearchResponse;

/// Exactness flag on a backend-reported hit count. `Gte` means the backend
/// stopped exact counting at an internal limit, so the true count must be
/// obtained with a dedicated count request before it is reported to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalRelation {
    Eq,
    Gte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Total {
    pub value: u64,
    pub relation: TotalRelation,
}

/// Pagination as requested by a caller; missing values fall back to the
/// configured defaults.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PaginationInfo {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// Concrete offset/limit search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationBounds {
    pub from: u64,
    pub page: u64,
    pub page_size: u64,
}

/// Translate page/page-size into offset/limit parameters. Pure: identical
/// inputs always produce the identical `from`.
pub fn compute_pagination(config: &ResolverConfig, info: &PaginationInfo) -> PaginationBounds {
    let page = info
        .page
        .unwrap_or(config.result_list.default_first_page_index);
    let page_size = info.page_size.unwrap_or(config.result_list.default_page_size);

    PaginationBounds {
        from: page * page_size,
        page,
        page_size,
    }
}

/// Wrap a query clause with offset/limit keyed to the schema-appropriate sort
/// field. The filter semantics of `query` are never altered.
pub fn paginate(bounds: &PaginationBounds, sort_field: &str, query: Value) -> Value {
    let mut sort_clause = Map::new();
    sort_clause.insert(sort_field.to_owned(), json!({ "order": "asc" }));

    json!({
        "query": query,
        "sort": [Value::Object(sort_clause)],
        "from": bounds.from,
        "size": bounds.page_size,
    })
}

/// An event paired with the id extracted from its schema-appropriate event id
/// field, ready for response assembly.
#[derive(Debug, Clone)]
pub struct ExtractedHit {
    pub event: ResolverEvent,
    pub event_id: String,
}

#[derive(Debug, Clone)]
pub struct PaginatedResults {
    pub totals: Total,
    pub results: Vec<ExtractedHit>,
}

/// Post-process raw search hits into `(event, event id)` pairs, preserving
/// the backend's hit order.
pub fn paginated_results(
    response: SearchResponse,
    fields: &EventIdFields,
) -> Result<PaginatedResults> {
    let totals = response.hits.total;
    let results = response
        .hits
        .hits
        .into_iter()
        .map(|hit| {
            let event = ResolverEvent::from_document(hit.source)?;
            let event_id = extract_event_id(&event, fields)?;
            Ok(ExtractedHit { event, event_id })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PaginatedResults { totals, results })
}

/// Parse a search response's hits into events, keeping the reported total.
pub fn events_from_response(response: SearchResponse) -> Result<(Vec<ResolverEvent>, Total)> {
    let total = response.hits.total;
    let events = response
        .hits
        .hits
        .into_iter()
        .map(|hit| ResolverEvent::from_document(hit.source))
        .collect::<Result<Vec<_>>>()?;

    Ok((events, total))
}

/// Resolve a possibly-inexact total. An `Eq` total is returned unchanged; a
/// `Gte` total triggers the exact-count fallback exactly once.
pub async fn reconcile_total<F, Fut>(total: Total, count: F) -> Result<u64>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<u64>>,
{
    match total.relation {
        TotalRelation::Eq => Ok(total.value),
        TotalRelation::Gte => count().await.context("Failed to resolve the exact hit count"),
    }
}
