use async_trait::async_trait;
use quickxml_to_serde::{Config as XmlConfig, JsonArray, JsonType, xml_string_to_json};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use super::{SearchArgs, SearchHit, Tool, ToolKind, ToolResult};
use crate::SearchError;

const TOOL: &str = "arXiv";

/// Feed fields kept verbatim; titles such as `007` must not turn into numbers.
const TEXT_PATHS: &[&str] = &[
    "/feed/entry/id",
    "/feed/entry/title",
    "/feed/entry/summary",
    "/feed/entry/published",
    "/feed/entry/author/name",
    "/feed/entry/link/@href",
    "/feed/entry/link/@title",
];

/// Academic preprint search backed by the arXiv Atom API.
#[derive(Clone)]
pub struct ArxivSearchTool {
    http: reqwest::Client,
    endpoint: String,
    default_max_results: usize,
}

impl ArxivSearchTool {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, default_max_results: usize) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            default_max_results: default_max_results.max(1),
        }
    }

    /// Query arXiv and return hits in its relevance order.
    #[instrument(name = "tool.arxiv", skip(self))]
    pub async fn search(
        &self,
        query: &str,
        max_results: Option<usize>,
        category: Option<&str>,
    ) -> Result<ToolResult, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let limit = max_results
            .filter(|limit| *limit > 0)
            .unwrap_or(self.default_max_results);
        let search_query = match category.map(str::trim).filter(|c| !c.is_empty()) {
            Some(category) => format!("cat:{category} AND {query}"),
            None => query.to_string(),
        };

        info!(%search_query, limit, "searching arXiv");

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("search_query", search_query),
                ("start", "0".to_string()),
                ("max_results", limit.to_string()),
                ("sortBy", "relevance".to_string()),
                ("sortOrder", "descending".to_string()),
            ])
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
                body: truncate(&body, 200),
            });
        }

        let result = parse_feed(query, &body)?;
        debug!(hits = result.hits.len(), "arXiv search completed");
        Ok(result)
    }
}

#[async_trait]
impl Tool for ArxivSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ArxivSearch
    }

    fn description(&self) -> &'static str {
        "Search arXiv for academic preprints. Returns title, authors, abstract, \
         publication date and PDF link for each paper, ranked by relevance."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "arXiv search query, e.g. `all:long context transformers`"
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of papers to return"
                },
                "category": {
                    "type": "string",
                    "description": "Optional arXiv category filter such as cs.CL or cs.LG"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: &Value) -> Result<ToolResult, SearchError> {
        let args = SearchArgs::from_value(arguments)?;
        self.search(&args.query, args.max_results, args.category.as_deref())
            .await
    }
}

/// Parse an arXiv Atom feed into ranked hits.
///
/// arXiv reports query errors as a regular feed entry whose id points at
/// `/api/errors`; those surface as [`SearchError::Rejected`].
pub fn parse_feed(query: &str, xml: &str) -> Result<ToolResult, SearchError> {
    let document = xml_string_to_json(xml.to_string(), &feed_config())
        .map_err(|err| SearchError::malformed(TOOL, err.to_string()))?;
    let feed = document
        .get("feed")
        .ok_or_else(|| SearchError::malformed(TOOL, "missing <feed> root element"))?;

    let mut hits = Vec::new();
    for entry in as_list(feed.get("entry")) {
        let id = text_of(entry.get("id")).unwrap_or_default();
        if id.contains("/api/errors") {
            let message = text_of(entry.get("summary"))
                .or_else(|| text_of(entry.get("title")))
                .unwrap_or_else(|| "unspecified error".to_string());
            return Err(SearchError::Rejected {
                tool: TOOL,
                message: collapse_whitespace(&message),
            });
        }

        let title = text_of(entry.get("title"))
            .map(|title| collapse_whitespace(&title))
            .filter(|title| !title.is_empty())
            .ok_or_else(|| SearchError::malformed(TOOL, "entry without a title"))?;

        let authors = as_list(entry.get("author"))
            .into_iter()
            .filter_map(|author| text_of(author.get("name")))
            .map(|name| collapse_whitespace(&name))
            .collect();

        let summary = text_of(entry.get("summary"))
            .map(|summary| collapse_whitespace(&summary))
            .unwrap_or_default();

        let published = text_of(entry.get("published"))
            .map(|date| date.chars().take(10).collect::<String>());

        let url = pdf_link(entry).unwrap_or_else(|| id.clone());
        if url.is_empty() {
            return Err(SearchError::malformed(TOOL, "entry without a link"));
        }

        let identifier = arxiv_identifier(&id);

        hits.push(SearchHit {
            title,
            authors,
            summary,
            url,
            published,
            identifier,
        });
    }

    Ok(ToolResult {
        query: query.to_string(),
        hits,
    })
}

fn feed_config() -> XmlConfig {
    TEXT_PATHS.iter().fold(XmlConfig::new_with_defaults(), |config, path| {
        config.add_json_type_override(*path, JsonArray::Infer(JsonType::AlwaysString))
    })
}

/// `http://arxiv.org/abs/hep-th/9901001v1` -> `hep-th/9901001v1`.
fn arxiv_identifier(id: &str) -> Option<String> {
    let identifier = match id.split_once("/abs/") {
        Some((_, rest)) => rest,
        None => id.rsplit('/').next().unwrap_or_default(),
    };
    let identifier = identifier.trim_matches('/');
    (!identifier.is_empty()).then(|| identifier.to_string())
}

fn pdf_link(entry: &Value) -> Option<String> {
    as_list(entry.get("link"))
        .into_iter()
        .find(|link| link.get("@title").and_then(Value::as_str) == Some("pdf"))
        .and_then(|link| text_of(link.get("@href")))
}

fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    }
}

fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Object(map) => text_of(map.get("#text")),
        _ => None,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="html">ArXiv Query: search_query=all:context window</title>
  <id>http://arxiv.org/api/abc</id>
  <entry>
    <id>http://arxiv.org/abs/2401.00001v1</id>
    <published>2024-01-02T18:00:00Z</published>
    <title>Extending the Context
      Window of Language Models</title>
    <summary>We study how
      to extend context windows.</summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name></author>
    <link href="http://arxiv.org/abs/2401.00001v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2401.00001v1" rel="related" type="application/pdf"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2402.00002v2</id>
    <published>2024-02-03T10:00:00Z</published>
    <title>Position Interpolation Revisited</title>
    <summary>A second paper.</summary>
    <author><name>Grace Hopper</name></author>
    <link href="http://arxiv.org/abs/2402.00002v2" rel="alternate" type="text/html"/>
  </entry>
</feed>"#;

    const ERROR_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="html">ArXiv Query: search_query=cat:</title>
  <id>http://arxiv.org/api/err</id>
  <entry>
    <id>http://arxiv.org/api/errors#malformed_query</id>
    <title>Error</title>
    <summary>malformed search query</summary>
    <link href="http://arxiv.org/api/errors#malformed_query" rel="alternate" type="text/html"/>
  </entry>
</feed>"#;

    const EMPTY_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="html">ArXiv Query: search_query=all:zzzz</title>
  <id>http://arxiv.org/api/empty</id>
</feed>"#;

    #[test]
    fn parses_entries_in_feed_order() {
        let result = parse_feed("context window", FEED).expect("feed parses");
        assert_eq!(result.query, "context window");
        assert_eq!(result.hits.len(), 2);

        let first = &result.hits[0];
        assert_eq!(first.title, "Extending the Context Window of Language Models");
        assert_eq!(first.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(first.summary, "We study how to extend context windows.");
        assert_eq!(first.url, "http://arxiv.org/pdf/2401.00001v1");
        assert_eq!(first.published.as_deref(), Some("2024-01-02"));
        assert_eq!(first.identifier.as_deref(), Some("2401.00001v1"));

        let second = &result.hits[1];
        assert_eq!(second.authors, vec!["Grace Hopper"]);
        assert_eq!(second.url, "http://arxiv.org/abs/2402.00002v2");
    }

    #[test]
    fn numeric_looking_text_is_kept_verbatim() {
        let feed = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/hep-th/9901001v1</id>
    <published>1999-01-04T00:00:00Z</published>
    <title>007</title>
    <summary>1.50</summary>
    <author><name>1e3</name></author>
    <link title="pdf" href="http://arxiv.org/pdf/hep-th/9901001v1" rel="related"/>
  </entry>
</feed>"#;

        let result = parse_feed("bond", feed).expect("feed parses");
        let hit = &result.hits[0];
        assert_eq!(hit.title, "007");
        assert_eq!(hit.summary, "1.50");
        assert_eq!(hit.authors, vec!["1e3"]);
        assert_eq!(hit.identifier.as_deref(), Some("hep-th/9901001v1"));
        assert_eq!(hit.url, "http://arxiv.org/pdf/hep-th/9901001v1");
    }

    #[test]
    fn identifier_keeps_archive_prefix() {
        assert_eq!(
            arxiv_identifier("http://arxiv.org/abs/2401.00001v1").as_deref(),
            Some("2401.00001v1")
        );
        assert_eq!(
            arxiv_identifier("http://arxiv.org/abs/math.GT/0309136v2").as_deref(),
            Some("math.GT/0309136v2")
        );
        assert_eq!(arxiv_identifier("http://arxiv.org/").as_deref(), None);
    }

    #[test]
    fn error_entry_is_rejected() {
        let err = parse_feed("cat:", ERROR_FEED).unwrap_err();
        match err {
            SearchError::Rejected { message, .. } => assert_eq!(message, "malformed search query"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn feed_without_entries_is_an_empty_result() {
        let result = parse_feed("zzzz", EMPTY_FEED).expect("feed parses");
        assert!(result.hits.is_empty());
    }

    #[test]
    fn non_feed_payload_is_malformed() {
        assert!(matches!(
            parse_feed("q", "<<<not xml"),
            Err(SearchError::Malformed { .. })
        ));
        assert!(matches!(
            parse_feed("q", r#"<html xmlns="http://www.w3.org/1999/xhtml"><body>busy</body></html>"#),
            Err(SearchError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn search_sends_relevance_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("search_query".into(), "cat:cs.CL AND context window".into()),
                Matcher::UrlEncoded("max_results".into(), "3".into()),
                Matcher::UrlEncoded("sortBy".into(), "relevance".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/atom+xml")
            .with_body(FEED)
            .create_async()
            .await;

        let tool = ArxivSearchTool::new(
            reqwest::Client::new(),
            format!("{}/api/query", server.url()),
            5,
        );
        let result = tool
            .call(&json!({ "query": "context window", "max_results": 3, "category": "cs.CL" }))
            .await
            .expect("search succeeds");

        mock.assert_async().await;
        assert_eq!(result.hits.len(), 2);
    }

    #[tokio::test]
    async fn upstream_failure_is_a_search_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("service unavailable")
            .create_async()
            .await;

        let tool = ArxivSearchTool::new(
            reqwest::Client::new(),
            format!("{}/api/query", server.url()),
            5,
        );
        let err = tool.search("context window", None, None).await.unwrap_err();
        assert!(matches!(err, SearchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_transport_error() {
        let tool = ArxivSearchTool::new(reqwest::Client::new(), "http://127.0.0.1:9/api/query", 5);
        let err = tool.search("context window", None, None).await.unwrap_err();
        assert!(matches!(err, SearchError::Transport { .. }));
    }

    #[tokio::test]
    async fn blank_query_never_reaches_upstream() {
        let tool = ArxivSearchTool::new(reqwest::Client::new(), "http://127.0.0.1:9/api/query", 5);
        let err = tool.search("  ", None, None).await.unwrap_err();
        assert!(matches!(err, SearchError::EmptyQuery));
    }
}
