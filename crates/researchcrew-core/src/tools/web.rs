use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::{SearchArgs, SearchHit, Tool, ToolKind, ToolResult};
use crate::SearchError;
use crate::security::SecretValue;

const TOOL: &str = "Tavily";

/// General web search through the Tavily HTTP API.
#[derive(Clone)]
pub struct WebSearchTool {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretValue,
    default_max_results: usize,
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    published_date: Option<String>,
}

impl WebSearchTool {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: SecretValue,
        default_max_results: usize,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key,
            default_max_results: default_max_results.max(1),
        }
    }

    #[instrument(name = "tool.web", skip(self))]
    pub async fn search(
        &self,
        query: &str,
        max_results: Option<usize>,
    ) -> Result<ToolResult, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let limit = max_results
            .filter(|limit| *limit > 0)
            .unwrap_or(self.default_max_results);

        info!(%query, limit, "searching the web");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&TavilyRequest {
                api_key: self.api_key.expose(),
                query,
                max_results: limit,
                search_depth: "basic",
            })
            .send()
            .await
            .map_err(|source| SearchError::Transport { tool: TOOL, source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| SearchError::Transport { tool: TOOL, source })?;
        if !status.is_success() {
            return Err(SearchError::Status {
                tool: TOOL,
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let decoded: TavilyResponse = serde_json::from_str(&body)
            .map_err(|err| SearchError::malformed(TOOL, err.to_string()))?;

        let hits: Vec<SearchHit> = decoded
            .results
            .into_iter()
            .take(limit)
            .map(|result| SearchHit {
                title: result.title,
                authors: Vec::new(),
                summary: result.content.trim().to_string(),
                url: result.url,
                published: result.published_date,
                identifier: None,
            })
            .collect();

        debug!(hits = hits.len(), "web search completed");
        Ok(ToolResult {
            query: query.to_string(),
            hits,
        })
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::WebSearch
    }

    fn description(&self) -> &'static str {
        "Search the web for recent news, blog posts, documentation and industry \
         reports. Returns title, URL and a content snippet for each result."
    }

    async fn call(&self, arguments: &Value) -> Result<ToolResult, SearchError> {
        let args = SearchArgs::from_value(arguments)?;
        self.search(&args.query, args.max_results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn tool(url: String) -> WebSearchTool {
        WebSearchTool::new(reqwest::Client::new(), url, SecretValue::new("tvly-test-key"), 5)
    }

    #[tokio::test]
    async fn posts_query_and_maps_results() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/search")
            .match_body(Matcher::PartialJson(json!({
                "api_key": "tvly-test-key",
                "query": "context windows",
                "max_results": 2
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "query": "context windows",
                    "results": [
                        {
                            "title": "Long context in practice",
                            "url": "https://example.com/a",
                            "content": " Vendors now ship 1M-token windows. ",
                            "score": 0.9
                        },
                        {
                            "title": "RoPE scaling explained",
                            "url": "https://example.com/b",
                            "content": "Interpolation tricks.",
                            "published_date": "2024-05-01"
                        }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let result = tool(format!("{}/search", server.url()))
            .call(&json!({ "query": "context windows", "max_results": 2 }))
            .await
            .expect("search succeeds");

        mock.assert_async().await;
        assert_eq!(result.hits.len(), 2);
        assert_eq!(result.hits[0].title, "Long context in practice");
        assert_eq!(result.hits[0].summary, "Vendors now ship 1M-token windows.");
        assert_eq!(result.hits[1].published.as_deref(), Some("2024-05-01"));
    }

    #[tokio::test]
    async fn undecodable_body_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/search")
            .with_status(200)
            .with_body("<html>gateway</html>")
            .create_async()
            .await;

        let err = tool(format!("{}/search", server.url()))
            .search("context windows", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Malformed { .. }));
    }

    #[tokio::test]
    async fn unauthorized_is_a_status_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/search")
            .with_status(401)
            .with_body(r#"{"detail":"invalid api key"}"#)
            .create_async()
            .await;

        let err = tool(format!("{}/search", server.url()))
            .search("context windows", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Status { status: 401, .. }));
    }
}
