use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use crate::state::{AppState, RunMetrics};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    runs: RunMetrics,
}

pub fn health_router() -> Router<AppState> {
    Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
}

async fn live(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        runs: state.metrics(),
    })
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let runs = state.metrics();
    if runs.available_permits == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "busy",
                runs,
            }),
        );
    }

    (StatusCode::OK, Json(HealthResponse { status: "ok", runs }))
}
