//! Guideline search client
//!
//! Procedure and guideline documents live behind a managed search API.
//! A search never fails the turn: transport or API problems come back
//! as an `ERROR` outcome that handlers record and work around.

use crate::config::OrchestratorConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchOutcome {
    pub status: SearchStatus,
    pub results: Vec<SearchHit>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SearchOutcome {
    pub fn ok(results: Vec<SearchHit>) -> Self {
        Self {
            status: SearchStatus::Ok,
            results,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SearchStatus::Error,
            results: Vec::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SearchStatus::Ok
    }
}

/// Trait for the document/guideline search backend
#[async_trait::async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str, num_results: usize) -> SearchOutcome;
}

/// HTTP-backed search (`POST {base_url}/search`)
#[derive(Clone)]
pub struct HttpSearchClient {
    client: Client,
    base_url: String,
}

impl HttpSearchClient {
    pub fn new(base_url: &str) -> Option<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .ok()?;

        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_search(&self, query: &str, num_results: usize) -> Result<Vec<SearchHit>, String> {
        let url = format!("{}/search", self.base_url);

        let response = self
            .client
            .post(url)
            .json(&json!({
                "query": query,
                "num_results": num_results,
            }))
            .send()
            .await
            .map_err(|e| format!("search request failed: {}", e))?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| format!("invalid JSON from search API: {}", e))?;

        if !status.is_success() {
            return Err(format!("search API returned {}: {}", status, body));
        }

        parse_hits(&body)
    }
}

/// Accepts either `{"results": [...]}` or a bare array of hits
fn parse_hits(body: &Value) -> Result<Vec<SearchHit>, String> {
    if body.get("status").and_then(Value::as_str) == Some("ERROR") {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("search backend reported an error");
        return Err(message.to_string());
    }

    let results = body.get("results").unwrap_or(body);
    serde_json::from_value(results.clone()).map_err(|e| format!("unexpected search payload: {}", e))
}

#[async_trait::async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(&self, query: &str, num_results: usize) -> SearchOutcome {
        debug!(query, num_results, "Searching guidelines");

        match self.post_search(query, num_results).await {
            Ok(hits) => SearchOutcome::ok(hits),
            Err(message) => {
                warn!(query, error = %message, "Guideline search failed");
                SearchOutcome::error(message)
            }
        }
    }
}

/// Stand-in when no search backend is configured
pub struct UnconfiguredSearch;

#[async_trait::async_trait]
impl SearchClient for UnconfiguredSearch {
    async fn search(&self, query: &str, _num_results: usize) -> SearchOutcome {
        warn!(query, "SEARCH_API_BASE_URL not configured, skipping guideline search");
        SearchOutcome::error("search backend not configured")
    }
}

/// Fixed outcome for every query
pub struct StaticSearch {
    outcome: SearchOutcome,
}

impl StaticSearch {
    pub fn new(outcome: SearchOutcome) -> Self {
        Self { outcome }
    }
}

#[async_trait::async_trait]
impl SearchClient for StaticSearch {
    async fn search(&self, _query: &str, num_results: usize) -> SearchOutcome {
        let mut outcome = self.outcome.clone();
        outcome.results.truncate(num_results);
        outcome
    }
}

pub fn create_search_client(config: &OrchestratorConfig) -> Arc<dyn SearchClient> {
    match config.search_base_url.as_deref().and_then(HttpSearchClient::new) {
        Some(client) => Arc::new(client),
        None => Arc::new(UnconfiguredSearch),
    }
}

/// Render hits as numbered evidence for a prompt
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No guideline excerpts available.".to_string();
    }

    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let source = hit.source.as_deref().unwrap_or("unknown source");
            format!("[{}] {} ({})\n{}", i + 1, hit.title, source, hit.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hits_accepts_wrapped_and_bare() {
        let wrapped = json!({ "status": "OK", "results": [{ "title": "Credit Policy 4.2", "content": "LTV below 70%" }] });
        let bare = json!([{ "title": "Procedure", "content": "..." }]);

        assert_eq!(parse_hits(&wrapped).unwrap().len(), 1);
        assert_eq!(parse_hits(&bare).unwrap()[0].title, "Procedure");
    }

    #[test]
    fn test_parse_hits_reports_backend_error() {
        let body = json!({ "status": "ERROR", "error": "index unavailable" });
        assert_eq!(parse_hits(&body).unwrap_err(), "index unavailable");
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_string(&SearchStatus::Ok).unwrap(), "\"OK\"");
        assert_eq!(serde_json::to_string(&SearchStatus::Error).unwrap(), "\"ERROR\"");
    }

    #[tokio::test]
    async fn test_unconfigured_search_degrades() {
        let outcome = UnconfiguredSearch.search("single obligor limit", 3).await;
        assert!(!outcome.is_ok());
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn test_format_hits() {
        let hits = vec![SearchHit {
            title: "Policy".into(),
            content: "Max tenor 7y".into(),
            source: Some("policy.pdf".into()),
            score: None,
        }];
        let text = format_hits(&hits);
        assert!(text.starts_with("[1] Policy (policy.pdf)"));
        assert_eq!(format_hits(&[]), "No guideline excerpts available.");
    }
}
