use std::time::Duration;

use async_trait::async_trait;
use reqwest::ClientBuilder;
use reqwest_middleware::{ClientBuilder as ClientWithMiddlewareBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::ResolverConfig;
use crate::pagination::Total;
use crate::prelude::*;

const SEARCH_RETRY_COUNT: u32 = 3;
const USER_AGENT: &str = "endpoint-resolver";

/// One hit of a search response, carrying the raw event document.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_source")]
    pub source: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHits {
    pub total: Total,
    pub hits: Vec<SearchHit>,
}

/// The slice of the backend's search response contract this engine consumes:
/// an ordered hit list plus a total that may be exact or a lower bound.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// The query surface the engine needs from the search backend. The production
/// implementation is [`SearchClient`]; tests substitute canned responses.
#[async_trait(?Send)]
pub trait SearchSource {
    async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse>;

    /// Exact-count request over the same filter, without pagination.
    async fn count(&self, index: &str, body: &Value) -> Result<u64>;
}

/// HTTP client for the search backend.
pub struct SearchClient {
    base_url: Url,
    client: ClientWithMiddleware,
}

impl TryFrom<&ResolverConfig> for SearchClient {
    type Error = Error;

    fn try_from(config: &ResolverConfig) -> Result<Self> {
        let base_url = Url::parse(&config.backend.url)
            .with_context(|| format!("Invalid search backend URL: {}", config.backend.url))?;

        Ok(Self {
            base_url,
            client: build_search_client(config.backend.request_timeout_seconds),
        })
    }
}

fn build_search_client(timeout_seconds: u64) -> ClientWithMiddleware {
    ClientWithMiddlewareBuilder::new(
        ClientBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .expect("Failed to build the search backend HTTP client"),
    )
    .with(RetryTransientMiddleware::new_with_policy(
        ExponentialBackoff::builder().build_with_max_retries(SEARCH_RETRY_COUNT),
    ))
    .build()
}

impl SearchClient {
    async fn post(&self, index: &str, endpoint: &str, body: &Value) -> Result<reqwest::Response> {
        let url = self
            .base_url
            .join(&format!("{index}/{endpoint}"))
            .context("Failed to build the search request URL")?;

        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .with_context(|| format!("Search backend request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Search backend returned {status}: {body}");
        }

        Ok(response)
    }
}

#[async_trait(?Send)]
impl SearchSource for SearchClient {
    async fn search(&self, index: &str, body: &Value) -> Result<SearchResponse> {
        debug!("searching {index}: {body}");
        self.post(index, "_search", body)
            .await?
            .json()
            .await
            .context("Failed to parse the search response")
    }

    async fn count(&self, index: &str, body: &Value) -> Result<u64> {
        debug!("counting {index}: {body}");
        let response: CountResponse = self
            .post(index, "_count", body)
            .await?
            .json()
            .await
            .context("Failed to parse the count response")?;
        Ok(response.count)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pagination::TotalRelation;

    #[test]
    fn test_parses_search_response_shape() {
        let response: SearchResponse = serde_json::from_value(json!({
            "took": 3,
            "timed_out": false,
            "hits": {
                "total": { "value": 50, "relation": "gte" },
                "hits": [
                    { "_index": "events-endpoint-1", "_id": "1", "_source": { "event": { "id": "1" } } },
                ],
            },
        }))
        .unwrap();

        assert_eq!(response.hits.total.value, 50);
        assert_eq!(response.hits.total.relation, TotalRelation::Gte);
        assert_eq!(response.hits.hits.len(), 1);
    }

    #[test]
    fn test_parses_count_response_shape() {
        let response: CountResponse = serde_json::from_value(json!({
            "count": 100,
            "_shards": { "total": 1, "successful": 1, "skipped": 0, "failed": 0 },
        }))
        .unwrap();
        assert_eq!(response.count, 100);
    }
}
