//! Web search through the Brave Search API.

use std::time::Duration;

use async_trait::async_trait;
use proto::{ParamSpec, ParamType, ToolError, ToolResult};
use serde::Deserialize;
use tracing::debug;

use crate::{Tool, parse_args};

const DEFAULT_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_COUNT: u32 = 10;
const MAX_COUNT: u32 = 20;

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Default, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

/// Searches the web and returns a numbered list of results.
pub struct BraveSearchTool {
    api_key: Option<String>,
    endpoint: String,
    client: reqwest::Client,
}

impl BraveSearchTool {
    /// Creates the tool; a missing key makes every call fail with an error result.
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_endpoint(api_key, DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(api_key: Option<String>, endpoint: impl Into<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn search(&self, query: &str, count: u32) -> Result<String, ToolError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::ExecutionFailed("BRAVE_API_KEY is not configured".into()))?;

        debug!(query = %query, count = %count, "Brave search request");
        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query.to_string()), ("count", count.to_string())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout(REQUEST_TIMEOUT.as_secs())
                } else {
                    ToolError::ExecutionFailed(format!("Network request failed - {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::ExecutionFailed(format!(
                "Brave API returned status code {}\n{body}",
                status.as_u16()
            )));
        }

        let data: BraveResponse = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Invalid search response: {e}")))?;
        let results = data.web.map(|w| w.results).unwrap_or_default();
        Ok(format_results(query, &results, count as usize))
    }
}

fn format_results(query: &str, results: &[BraveResult], limit: usize) -> String {
    if results.is_empty() {
        return format!("No results found for query: {query}");
    }
    let body = results
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, r)| format!("{}. {}\n   URL: {}\n   {}", i + 1, r.title, r.url, r.description))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Search Results for '{query}':\n\n{body}")
}

#[async_trait]
impl Tool for BraveSearchTool {
    fn name(&self) -> &str {
        "brave_search"
    }

    fn description(&self) -> &str {
        "Search the web using Brave Search API"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("query", ParamType::String, "The search query string"),
            ParamSpec::optional(
                "count",
                ParamType::Integer,
                "Number of results to return (default 10, max 20)",
            ),
        ]
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        let result = match parse_args::<SearchArgs>(args) {
            Ok(a) => {
                let count = a.count.unwrap_or(DEFAULT_COUNT).clamp(1, MAX_COUNT);
                self.search(&a.query, count).await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(text) => ToolResult::success(call_id, self.name(), text),
            Err(e) => ToolResult::error(call_id, self.name(), e.to_string()),
        }
    }
}
