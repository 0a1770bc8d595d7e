//! ResearchCrew core: a Manager, Researcher and Analyst agent crew that turns a
//! research topic into a Markdown report.
//!
//! Tasks are wired as `plan -> {web_search, arxiv_search} -> synthesize` and
//! executed on top of `graph_flow`, with each agent driving an
//! OpenAI-compatible chat model through tool calls.

pub mod agents;
pub mod config;
pub mod engine;
mod error;
pub mod events;
pub mod llm;
pub mod planner;
pub mod report;
pub mod security;
pub mod tasks;
pub mod tools;
mod workflow;

pub use agents::{AgentRole, AgentRoster, AgentSpec, LlmProfile, build_agents};
pub use config::{FailurePolicy, Settings};
pub use engine::{Crew, CrewOutput, ExecutionEngine, TaskRecord, TaskStatus};
pub use error::{ConfigError, LlmError, OrchestrationError, ReportError, ResearchError, SearchError};
pub use events::{Event, EventCollector, TaskOutcome};
pub use llm::{LanguageModel, OpenAiCompatibleClient};
pub use planner::TaskGraph;
pub use report::{ReportArtifact, ReportWriter, slugify};
pub use security::SecretValue;
pub use tasks::{TaskSpec, build_task_graph, build_task_specs};
pub use tools::{ArxivSearchTool, Tool, ToolKind, ToolResult, Toolbox, WebSearchTool};
pub use workflow::{MAX_TOPIC_CHARS, ResearchCrew, ResearchOutcome, validate_topic};
