//! Search tools the Researcher may call, plus the capability lookup used by the engine.

mod arxiv;
mod web;

pub use arxiv::{ArxivSearchTool, parse_feed};
pub use web::WebSearchTool;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::SearchSettings;
use crate::llm::ToolDefinition;
use crate::SearchError;

/// Tools an agent can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    WebSearch,
    ArxivSearch,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::WebSearch => "web_search",
            ToolKind::ArxivSearch => "arxiv_search",
        }
    }
}

/// A single ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    pub url: String,
    #[serde(default)]
    pub published: Option<String>,
    /// Upstream identifier, e.g. the arXiv id.
    #[serde(default)]
    pub identifier: Option<String>,
}

/// Ordered hits for one query, in upstream ranking order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub query: String,
    pub hits: Vec<SearchHit>,
}

impl ToolResult {
    /// Text handed back to the language model as the tool call output.
    pub fn render_markdown(&self) -> String {
        if self.hits.is_empty() {
            return format!("No results for \"{}\".", self.query);
        }

        let mut output = format!("Results for \"{}\":\n", self.query);
        for (idx, hit) in self.hits.iter().enumerate() {
            let _ = write!(output, "\n{}. **{}**", idx + 1, hit.title);
            if let Some(identifier) = &hit.identifier {
                let _ = write!(output, " (arXiv:{identifier})");
            }
            output.push('\n');
            if !hit.authors.is_empty() {
                let _ = writeln!(output, "   - Authors: {}", hit.authors.join(", "));
            }
            if let Some(published) = &hit.published {
                let _ = writeln!(output, "   - Published: {published}");
            }
            let _ = writeln!(output, "   - URL: {}", hit.url);
            if !hit.summary.is_empty() {
                let _ = writeln!(output, "   - Summary: {}", hit.summary);
            }
        }
        output
    }
}

/// Arguments accepted by every search tool.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchArgs {
    pub query: String,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub category: Option<String>,
}

impl SearchArgs {
    pub fn from_value(arguments: &Value) -> Result<Self, SearchError> {
        let args: SearchArgs = serde_json::from_value(arguments.clone())
            .map_err(|err| SearchError::InvalidArguments(err.to_string()))?;
        if args.query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        Ok(args)
    }
}

/// A callable capability exposed to agents through function calling.
#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn description(&self) -> &'static str;

    /// JSON schema of the accepted arguments.
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of results to return"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: &Value) -> Result<ToolResult, SearchError>;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

pub type DynTool = Arc<dyn Tool>;

/// Tools available to a run, looked up by the capability sets of its agents.
#[derive(Clone, Default)]
pub struct Toolbox {
    tools: HashMap<ToolKind, DynTool>,
}

impl Toolbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: DynTool) -> Self {
        self.tools.insert(tool.kind(), tool);
        self
    }

    /// Build the real web and arXiv tools sharing one HTTP client.
    pub fn from_settings(settings: &SearchSettings, http: reqwest::Client) -> Self {
        Self::new()
            .with_tool(Arc::new(WebSearchTool::new(
                http.clone(),
                settings.tavily_api_url.clone(),
                settings.tavily_api_key.clone(),
                settings.max_results,
            )))
            .with_tool(Arc::new(ArxivSearchTool::new(
                http,
                settings.arxiv_api_url.clone(),
                settings.max_results,
            )))
    }

    pub fn get(&self, kind: ToolKind) -> Option<DynTool> {
        self.tools.get(&kind).cloned()
    }

    /// Resolve a capability set, failing on the first tool that is not configured.
    pub fn resolve(&self, kinds: &[ToolKind]) -> Result<Vec<DynTool>, ToolKind> {
        kinds
            .iter()
            .map(|kind| self.get(*kind).ok_or(*kind))
            .collect()
    }
}
