use axum::{
    Form, Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use researchcrew_core::{security::redact, validate_topic};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path as FsPath, PathBuf};
use tokio::fs::{self, canonicalize};
use tracing::{error, warn};

use crate::{
    error::AppError,
    metrics,
    pages::{self, ReportView},
    state::AppState,
};

#[derive(Debug, Deserialize)]
struct ResearchForm {
    #[serde(default)]
    topic: String,
}

pub fn research_router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/research", post(start_research))
        .route("/reports/:file", get(download_report))
}

async fn index() -> Html<String> {
    Html(pages::index_page())
}

async fn start_research(
    State(state): State<AppState>,
    Form(form): Form<ResearchForm>,
) -> Result<Response, AppError> {
    let topic = validate_topic(&form.topic)?;

    let Some(_permit) = state.try_start_run() else {
        metrics::run_rejected(state.metrics());
        return Err(AppError::busy());
    };
    metrics::run_started(topic.chars().count(), state.metrics());

    let outcome = match state.crew().run(&topic).await {
        Ok(outcome) => outcome,
        Err(err) => {
            metrics::run_failed(&redact(&err.to_string()), state.metrics());
            return Err(err.into());
        }
    };

    let mut notices: Vec<String> = outcome
        .failed_tasks()
        .map(|record| {
            format!(
                "Task {} failed and its results are missing from this report: {}",
                record.task_id,
                redact(record.failure_reason().unwrap_or("unknown error"))
            )
        })
        .collect();
    let failed_tasks = notices.len();

    let artifact = outcome.to_artifact(true);
    let writer = state.writer();
    let saved = tokio::task::spawn_blocking(move || writer.write(&artifact))
        .await
        .map_err(AppError::internal)?;

    // A failed save still shows the report; only the download link is missing.
    let (status, file_name) = match saved {
        Ok(path) => (
            StatusCode::OK,
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        ),
        Err(err) => {
            let reason = redact(&err.to_string());
            error!(error = %reason, "failed to save report");
            notices.insert(0, format!("The report could not be saved: {reason}"));
            (StatusCode::INTERNAL_SERVER_ERROR, None)
        }
    };

    metrics::run_completed(
        outcome.elapsed,
        failed_tasks,
        file_name.is_some(),
        state.metrics(),
    );

    let page = pages::report_page(&ReportView {
        topic: &outcome.topic,
        markdown: &outcome.synthesis,
        elapsed_secs: outcome.elapsed.as_secs_f64(),
        file_name: file_name.as_deref(),
        notices,
    });
    Ok((status, Html(page)).into_response())
}

async fn download_report(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response, AppError> {
    if !is_report_name(&file) {
        warn!(file = %file, "rejected report download");
        return Err(AppError::not_found());
    }

    let writer = state.writer();
    let Some(path) = resolve_report(writer.dir(), &file).await else {
        return Err(AppError::not_found());
    };

    let bytes = fs::read(&path).await.map_err(|err| match err.kind() {
        ErrorKind::NotFound => AppError::not_found(),
        _ => AppError::internal(err),
    })?;
    metrics::report_downloaded(&file, bytes.len());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/markdown; charset=utf-8")
        .header(header::CONTENT_DISPOSITION, content_disposition(&file))
        .body(Body::from(bytes))
        .map_err(AppError::internal)
}

/// Only plain `.md` names directly inside the reports directory are served.
fn is_report_name(name: &str) -> bool {
    name.ends_with(".md")
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.contains("..")
        && !name.chars().any(char::is_control)
}

async fn resolve_report(dir: &FsPath, name: &str) -> Option<PathBuf> {
    let base = canonicalize(dir).await.ok()?;
    let candidate = base.join(name);
    if let Ok(metadata) = fs::metadata(&candidate).await
        && metadata.is_file()
        && let Ok(resolved) = canonicalize(&candidate).await
        && resolved.starts_with(&base)
    {
        return Some(resolved);
    }
    None
}

/// `attachment` disposition with an ASCII fallback and the exact UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_graphic() && ch != '"' && ch != '\\' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(name)
    )
}
