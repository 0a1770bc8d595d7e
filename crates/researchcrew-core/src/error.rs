use std::path::PathBuf;

use thiserror::Error;

/// Startup configuration failures. Always fatal, raised before any network call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

impl ConfigError {
    pub fn invalid(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            var: var.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of a search tool call. Reported back to the calling agent, never retried.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search query must not be empty")]
    EmptyQuery,
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
    #[error("{tool} unreachable: {source}")]
    Transport {
        tool: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{tool} returned HTTP {status}: {body}")]
    Status {
        tool: &'static str,
        status: u16,
        body: String,
    },
    #[error("{tool} returned malformed data: {reason}")]
    Malformed { tool: &'static str, reason: String },
    #[error("{tool} rejected the query: {message}")]
    Rejected {
        tool: &'static str,
        message: String,
    },
}

impl SearchError {
    pub fn malformed(tool: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            tool,
            reason: reason.into(),
        }
    }
}

/// Chat-completions API failures.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language model unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("language model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("language model response could not be decoded: {0}")]
    Decode(String),
    #[error("language model returned no choices")]
    EmptyChoices,
}

/// The execution engine failed to produce a synthesis.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("research topic must not be empty")]
    EmptyTopic,
    #[error("research topic exceeds {max} characters")]
    TopicTooLong { max: usize },
    #[error("invalid task graph: {0}")]
    InvalidGraph(String),
    #[error("task '{task}' failed: {reason}")]
    TaskFailed { task: String, reason: String },
    #[error("synthesis task produced no output")]
    EmptySynthesis,
    #[error("execution engine failure: {0}")]
    Engine(String),
}

impl OrchestrationError {
    /// Whether the error stems from the caller's input rather than the engine.
    pub fn is_invalid_topic(&self) -> bool {
        matches!(self, Self::EmptyTopic | Self::TopicTooLong { .. })
    }
}

/// Report persistence failures (the I/O error kind).
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to create reports directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no free report file name for '{stem}' after {attempts} attempts")]
    Exhausted { stem: String, attempts: usize },
}

impl ReportError {
    pub fn create_dir(path: PathBuf, source: std::io::Error) -> Self {
        Self::CreateDir { path, source }
    }

    pub fn write(path: PathBuf, source: std::io::Error) -> Self {
        Self::Write { path, source }
    }
}

/// Umbrella error for callers driving a whole run.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
    #[error(transparent)]
    Report(#[from] ReportError),
}
