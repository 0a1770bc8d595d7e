use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use crate::agents::{LlmProfile, build_agents};
use crate::config::{FailurePolicy, Settings};
use crate::engine::{Crew, ExecutionEngine, TaskRecord};
use crate::events::EventCollector;
use crate::llm::{LanguageModel, OpenAiCompatibleClient};
use crate::report::ReportArtifact;
use crate::tasks::build_task_graph;
use crate::tools::Toolbox;
use crate::{ConfigError, OrchestrationError};

/// Longest accepted topic, in characters.
pub const MAX_TOPIC_CHARS: usize = 500;

/// Trim `topic` and check it is non-empty and not too long.
pub fn validate_topic(topic: &str) -> Result<String, OrchestrationError> {
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(OrchestrationError::EmptyTopic);
    }
    if topic.chars().count() > MAX_TOPIC_CHARS {
        return Err(OrchestrationError::TopicTooLong {
            max: MAX_TOPIC_CHARS,
        });
    }
    Ok(topic.to_string())
}

/// Outcome of one research run.
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub topic: String,
    /// Raw text of the synthesis task, never empty.
    pub synthesis: String,
    pub tasks: Vec<TaskRecord>,
    pub elapsed: Duration,
}

impl ResearchOutcome {
    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter().filter(|record| !record.succeeded())
    }

    /// The first `max_chars` characters of the synthesis, with `...` when cut.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.synthesis.chars();
        let mut preview: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            preview.push_str("...");
        }
        preview
    }

    /// Report artifact for this outcome, optionally with a front-matter header.
    pub fn to_artifact(&self, framed: bool) -> ReportArtifact {
        if framed {
            ReportArtifact::framed(self.topic.clone(), &self.synthesis, self.elapsed)
        } else {
            ReportArtifact::new(self.topic.clone(), self.synthesis.clone())
        }
    }
}

/// Entry point: configures the crew for a topic and runs it to completion.
#[derive(Clone)]
pub struct ResearchCrew {
    engine: ExecutionEngine,
    profile: LlmProfile,
}

impl ResearchCrew {
    /// Build a crew around injected collaborators.
    pub fn new(settings: &Settings, llm: Arc<dyn LanguageModel>, toolbox: Toolbox) -> Self {
        Self {
            engine: ExecutionEngine::new(llm, toolbox, settings.engine.clone()),
            profile: LlmProfile::from_settings(&settings.llm),
        }
    }

    /// Build a crew that talks to the configured chat API, Tavily and arXiv.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(settings.llm.request_timeout)
            .user_agent(concat!("researchcrew/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;

        let llm = OpenAiCompatibleClient::from_settings(&settings.llm, http.clone());
        let toolbox = Toolbox::from_settings(&settings.search, http);
        Ok(Self::new(settings, Arc::new(llm), toolbox))
    }

    pub fn with_events(mut self, events: EventCollector) -> Self {
        self.engine = self.engine.with_events(events);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.engine = self.engine.with_failure_policy(policy);
        self
    }

    /// Run the full plan, search and synthesis pipeline for `topic`.
    #[instrument(name = "research.run", skip(self, topic), fields(topic_chars = topic.chars().count()))]
    pub async fn run(&self, topic: &str) -> Result<ResearchOutcome, OrchestrationError> {
        let topic = validate_topic(topic)?;
        let started = Instant::now();

        let crew = Crew::new(build_agents(&topic, &self.profile), build_task_graph(&topic)?);
        let output = self.engine.kickoff(crew).await?;
        let elapsed = started.elapsed();

        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            chars = output.output.chars().count(),
            "research run completed"
        );

        Ok(ResearchOutcome {
            topic,
            synthesis: output.output,
            tasks: output.records,
            elapsed,
        })
    }
}
