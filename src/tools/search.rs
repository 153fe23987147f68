//! Brave web search adapter.
//!
//! Fail-open by contract: every failure class (missing credential, blank
//! query, transport error, non-success status, malformed body) is logged
//! and degrades to an empty result list. The orchestration layer never
//! distinguishes "web search failed" from "web search found nothing".

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const SEARCH_TIMEOUT_SECS: u64 = 10;
const MAX_RESULT_COUNT: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
    pub published_date: Option<String>,
    pub domain: Option<String>,
}

pub struct BraveSearchClient {
    api_key: Option<String>,
    base_url: String,
    client: Client,
}

impl BraveSearchClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: BRAVE_SEARCH_URL.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn from_config(config: &Value) -> Self {
        let api_key = config
            .get("tools")
            .and_then(|v| v.get("brave_search_api_key"))
            .and_then(|v| v.as_str())
            .map(|key| key.to_string());
        Self::new(api_key)
    }

    /// Searches the web, returning at most `count` (≤ 20) results in the
    /// provider's relevance order. Never fails; see the module contract.
    pub async fn search(&self, query: &str, count: usize) -> Vec<SearchResult> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::error!("Brave API key not configured");
            return Vec::new();
        };

        let query = query.trim();
        if query.is_empty() {
            tracing::warn!("Empty search query provided");
            return Vec::new();
        }

        let count = count.min(MAX_RESULT_COUNT);

        tracing::info!("Searching Brave API for: {}", query);

        // freshness=pw restricts to the past week, for fresher results
        let url = format!(
            "{}?q={}&count={}&safesearch=moderate&search_lang=en-gb&country=GB&freshness=pw",
            self.base_url,
            urlencoding::encode(query),
            count
        );

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::error!("Brave API connection error: {}", err);
                return Vec::new();
            }
        };

        let status = response.status();
        if !status.is_success() {
            match status.as_u16() {
                429 => tracing::warn!("Brave API rate limit exceeded"),
                401 => tracing::error!("Brave API authentication failed - check API key"),
                code => tracing::error!("Brave API error: {}", code),
            }
            return Vec::new();
        }

        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!("Failed to parse Brave API response: {}", err);
                return Vec::new();
            }
        };

        let results = parse_results(&payload, count);
        tracing::info!("Parsed {} search results", results.len());
        results
    }
}

/// Extracts `web.results[]` into normalized records. Results without a url
/// are dropped; any shape deviation yields an empty list, not an error.
fn parse_results(payload: &Value, count: usize) -> Vec<SearchResult> {
    let Some(items) = payload
        .get("web")
        .and_then(|web| web.get("results"))
        .and_then(|results| results.as_array())
    else {
        tracing::debug!("Brave response is missing web.results");
        return Vec::new();
    };

    let mut results = Vec::new();
    for item in items {
        let url = item
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if url.is_empty() {
            continue;
        }

        results.push(SearchResult {
            title: item
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("No title")
                .to_string(),
            description: item
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("No description available")
                .to_string(),
            published_date: item
                .get("age")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            domain: extract_domain(&url),
            url,
        });
    }

    results.truncate(count);
    results
}

fn extract_domain(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.to_string()))
}
