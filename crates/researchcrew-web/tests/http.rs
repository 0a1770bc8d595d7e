use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum_test::TestServer;
use researchcrew_core::llm::{ChatMessage, ChatRole, Completion, CompletionRequest, LanguageModel};
use researchcrew_core::tools::{Tool, ToolKind, ToolResult, Toolbox};
use researchcrew_core::{LlmError, ReportWriter, ResearchCrew, SearchError, Settings};
use researchcrew_web::pages::download_href;
use researchcrew_web::routes::build_router;
use researchcrew_web::state::AppState;
use serde_json::Value;
use tempfile::{TempDir, tempdir};

const SYNTHESIS: &str = "# Findings\n\n| model | window |\n|---|---|\n| a | 128k |\n\n<script>alert(1)</script>";

/// Answers every task directly; optionally fails the synthesis call.
struct CannedModel {
    fail_synthesis: bool,
}

#[async_trait]
impl LanguageModel for CannedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let header = request
            .messages
            .iter()
            .find(|message| message.role == ChatRole::User)
            .and_then(|message| message.text_content().lines().next())
            .unwrap_or_default()
            .to_string();

        let answer = match header.trim_start_matches("## Task: ") {
            "synthesize" if self.fail_synthesis => {
                return Err(LlmError::Status {
                    status: 500,
                    body: "upstream exploded".into(),
                });
            }
            "synthesize" => SYNTHESIS,
            "plan" => "PLAN",
            _ => "FINDINGS",
        };
        Ok(Completion {
            message: ChatMessage::assistant(answer),
            finish_reason: Some("stop".into()),
        })
    }
}

struct EmptyTool(ToolKind);

#[async_trait]
impl Tool for EmptyTool {
    fn kind(&self) -> ToolKind {
        self.0
    }

    fn description(&self) -> &'static str {
        "empty search"
    }

    async fn call(&self, arguments: &Value) -> Result<ToolResult, SearchError> {
        Ok(ToolResult {
            query: arguments["query"].as_str().unwrap_or_default().to_string(),
            hits: Vec::new(),
        })
    }
}

fn state_for(reports_dir: &Path, fail_synthesis: bool, max_concurrency: usize) -> AppState {
    let settings = Settings::from_lookup(|key| match key {
        "OPENAI_API_KEY" => Some("sk-test".to_string()),
        "TAVILY_API_KEY" => Some("tvly-test".to_string()),
        _ => None,
    })
    .expect("settings");
    let toolbox = Toolbox::new()
        .with_tool(Arc::new(EmptyTool(ToolKind::WebSearch)))
        .with_tool(Arc::new(EmptyTool(ToolKind::ArxivSearch)));
    let crew = ResearchCrew::new(&settings, Arc::new(CannedModel { fail_synthesis }), toolbox);
    AppState::new(crew, ReportWriter::new(reports_dir), max_concurrency)
}

fn server(state: AppState) -> TestServer {
    TestServer::new(build_router(state)).unwrap()
}

fn saved_reports(dir: &TempDir) -> Vec<String> {
    fs::read_dir(dir.path())
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn index_serves_topic_form() {
    let dir = tempdir().unwrap();
    let server = server(state_for(dir.path(), false, 2));

    let response = server.get("/").await;
    assert_eq!(response.status_code(), 200);
    let body = response.text();
    assert!(body.contains("<form method=\"post\" action=\"/research\">"));
    assert!(body.contains("name=\"topic\""));
}

#[tokio::test]
async fn research_renders_report_and_saves_it() {
    let dir = tempdir().unwrap();
    let server = server(state_for(dir.path(), false, 2));

    let response = server
        .post("/research")
        .form(&[("topic", "LLM 上下文窗口")])
        .await;
    assert_eq!(response.status_code(), 200);

    let body = response.text();
    assert!(body.contains("<h1>Findings</h1>"));
    assert!(body.contains("<table>"));
    assert!(!body.contains("<script>alert(1)</script>"));
    assert!(body.contains("Download Markdown"));

    let reports = saved_reports(&dir);
    assert_eq!(reports.len(), 1);
    assert!(reports[0].starts_with("research_report_llm-上下文窗口_"));
    let saved = fs::read_to_string(dir.path().join(&reports[0])).unwrap();
    assert!(saved.starts_with("---\ntopic: \"LLM 上下文窗口\"\n"));
    assert!(saved.ends_with(SYNTHESIS));
}

#[tokio::test]
async fn saved_report_downloads_as_attachment() {
    let dir = tempdir().unwrap();
    let server = server(state_for(dir.path(), false, 2));

    let response = server
        .post("/research")
        .form(&[("topic", "LLM 上下文窗口")])
        .await;
    assert_eq!(response.status_code(), 200);
    let name = saved_reports(&dir).remove(0);

    let download = server
        .get(&download_href(&name))
        .await;
    assert_eq!(download.status_code(), 200);
    let disposition = download.header("content-disposition");
    let disposition = disposition.to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"research_report_llm-"));
    assert!(disposition.contains("filename*=UTF-8''research_report_llm-%E4%B8%8A"));
    assert_eq!(
        download.text(),
        fs::read_to_string(dir.path().join(&name)).unwrap()
    );
}

#[tokio::test]
async fn downloads_cannot_escape_reports_dir() {
    let root = tempdir().unwrap();
    let reports = root.path().join("reports");
    fs::create_dir_all(&reports).unwrap();
    fs::write(root.path().join("secret.md"), "top secret").unwrap();
    let server = server(state_for(&reports, false, 2));

    let response = server.get("/reports/..%2Fsecret.md").await;
    assert_eq!(response.status_code(), 404);

    let response = server.get("/reports/missing.md").await;
    assert_eq!(response.status_code(), 404);
    assert!(response.text().contains("No such report."));
}

#[tokio::test]
async fn blank_topic_is_rejected_with_400() {
    let dir = tempdir().unwrap();
    let server = server(state_for(dir.path(), false, 2));

    let response = server.post("/research").form(&[("topic", "   ")]).await;
    assert_eq!(response.status_code(), 400);
    assert!(response.text().contains("Invalid topic"));
    assert!(saved_reports(&dir).is_empty());
}

#[tokio::test]
async fn engine_failure_maps_to_502_without_report() {
    let dir = tempdir().unwrap();
    let server = server(state_for(dir.path(), true, 2));

    let response = server
        .post("/research")
        .form(&[("topic", "context windows")])
        .await;
    assert_eq!(response.status_code(), 502);
    assert!(response.text().contains("Research failed"));
    assert!(saved_reports(&dir).is_empty());
}

#[tokio::test]
async fn write_failure_still_shows_report() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, "file").unwrap();
    let server = server(state_for(&blocker.join("reports"), false, 2));

    let response = server
        .post("/research")
        .form(&[("topic", "context windows")])
        .await;
    assert_eq!(response.status_code(), 500);
    let body = response.text();
    assert!(body.contains("The report could not be saved"));
    assert!(body.contains("<h1>Findings</h1>"));
    assert!(!body.contains("Download Markdown"));
}

#[tokio::test]
async fn saturated_server_answers_429() {
    let dir = tempdir().unwrap();
    let state = state_for(dir.path(), false, 1);
    let _slot = state.try_start_run().expect("free slot");
    let server = server(state.clone());

    let response = server
        .post("/research")
        .form(&[("topic", "context windows")])
        .await;
    assert_eq!(response.status_code(), 429);

    let ready = server.get("/health/ready").await;
    assert_eq!(ready.status_code(), 503);
    assert_eq!(ready.json::<Value>()["status"], "busy");
}

#[tokio::test]
async fn health_reports_run_slots() {
    let dir = tempdir().unwrap();
    let server = server(state_for(dir.path(), false, 3));

    let live = server.get("/health/live").await;
    assert_eq!(live.status_code(), 200);
    let payload = live.json::<Value>();
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["runs"]["max_concurrency"], 3);
    assert_eq!(payload["runs"]["available_permits"], 3);

    let ready = server.get("/health/ready").await;
    assert_eq!(ready.status_code(), 200);
}
