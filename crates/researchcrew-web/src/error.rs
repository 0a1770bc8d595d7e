use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use researchcrew_core::{OrchestrationError, security::redact};
use std::fmt;

use crate::pages;

/// Failure rendered as an HTML error page with a matching status code.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: redact(&message.into()),
        }
    }

    pub fn internal(error: impl ToString) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "No such report.")
    }

    pub fn busy() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many research runs are in progress. Try again in a few minutes.",
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn title(&self) -> &'static str {
        match self.status {
            StatusCode::BAD_REQUEST => "Invalid topic",
            StatusCode::NOT_FOUND => "Not found",
            StatusCode::TOO_MANY_REQUESTS => "Busy",
            StatusCode::BAD_GATEWAY => "Research failed",
            _ => "Something went wrong",
        }
    }
}

impl From<OrchestrationError> for AppError {
    fn from(error: OrchestrationError) -> Self {
        let status = if error.is_invalid_topic() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::BAD_GATEWAY
        };
        Self::new(status, error.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(error)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let page = pages::error_page(self.title(), &self.message);
        (self.status, Html(page)).into_response()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}
