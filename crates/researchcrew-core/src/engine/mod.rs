//! Crew execution on top of `graph_flow`.
//!
//! The task graph is compiled into a linear chain of stage tasks, one per
//! topological layer. Tasks inside a stage run concurrently, bounded by the
//! configured limit, and exchange outputs through the session context.

mod agent_loop;
mod stage;

use std::sync::Arc;

use graph_flow::{ExecutionStatus, FlowRunner, GraphBuilder, InMemorySessionStorage, Session, SessionStorage};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::OrchestrationError;
use crate::agents::{AgentRole, AgentRoster};
use crate::config::{EngineSettings, FailurePolicy};
use crate::events::EventCollector;
use crate::llm::LanguageModel;
use crate::planner::TaskGraph;
use crate::tools::Toolbox;

use agent_loop::AgentRunner;
use stage::{StageShared, StageTask, stage_id};

pub(crate) const RUN_ABORTED_KEY: &str = "run.aborted";

pub(crate) fn output_key(task_id: &str) -> String {
    format!("task.{task_id}.output")
}

pub(crate) fn error_key(task_id: &str) -> String {
    format!("task.{task_id}.error")
}

pub(crate) fn record_key(task_id: &str) -> String {
    format!("task.{task_id}.record")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AbortRecord {
    pub(crate) task: String,
    pub(crate) reason: String,
}

/// Agents plus the tasks they execute.
#[derive(Debug, Clone)]
pub struct Crew {
    pub agents: AgentRoster,
    pub tasks: TaskGraph,
}

impl Crew {
    pub fn new(agents: AgentRoster, tasks: TaskGraph) -> Self {
        Self { agents, tasks }
    }

    /// The single task nothing depends on; its output is the crew's result.
    pub fn final_task(&self) -> Result<String, OrchestrationError> {
        match self.tasks.terminal_nodes().as_slice() {
            [only] => Ok(only.id.clone()),
            [] => Err(OrchestrationError::InvalidGraph("graph has no tasks".into())),
            many => Err(OrchestrationError::InvalidGraph(format!(
                "expected one final task, found {}",
                many.iter().map(|t| t.id.as_str()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed { reason: String },
}

/// What happened to one task during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub agent: Option<AgentRole>,
    pub status: TaskStatus,
    pub output_chars: usize,
    pub duration_ms: u64,
}

impl TaskRecord {
    pub(crate) fn failed(
        task_id: &str,
        agent: Option<AgentRole>,
        reason: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            agent,
            status: TaskStatus::Failed {
                reason: reason.into(),
            },
            output_chars: 0,
            duration_ms,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, TaskStatus::Succeeded)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Failed { reason } => Some(reason),
            TaskStatus::Succeeded => None,
        }
    }
}

/// Result of a completed crew run.
#[derive(Debug, Clone)]
pub struct CrewOutput {
    pub final_task: String,
    /// Raw text of the final task.
    pub output: String,
    /// Records of executed tasks in topological order.
    pub records: Vec<TaskRecord>,
}

/// Runs crews against a language model and a set of tools.
#[derive(Clone)]
pub struct ExecutionEngine {
    llm: Arc<dyn LanguageModel>,
    toolbox: Toolbox,
    settings: EngineSettings,
    events: EventCollector,
}

impl ExecutionEngine {
    pub fn new(llm: Arc<dyn LanguageModel>, toolbox: Toolbox, settings: EngineSettings) -> Self {
        Self {
            llm,
            toolbox,
            settings,
            events: EventCollector::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventCollector) -> Self {
        self.events = events;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.settings.failure_policy = policy;
        self
    }

    /// Execute every task of `crew` and return the final task's output.
    #[instrument(name = "engine.kickoff", skip(self, crew), fields(tasks = crew.tasks.len(), policy = %self.settings.failure_policy))]
    pub async fn kickoff(&self, crew: Crew) -> Result<CrewOutput, OrchestrationError> {
        crew.tasks.validate()?;
        let final_task = crew.final_task()?;
        let layers = crew.tasks.layers()?;
        let order = crew.tasks.topological_order()?;

        let shared = Arc::new(StageShared {
            runner: AgentRunner::new(
                self.llm.clone(),
                self.toolbox.clone(),
                crew.agents,
                self.events.clone(),
            ),
            graph: crew.tasks,
            final_task: final_task.clone(),
            policy: self.settings.failure_policy,
            limiter: Semaphore::new(self.settings.max_concurrent_tasks.max(1)),
            events: self.events.clone(),
        });

        let stage_count = layers.len();
        let mut builder = GraphBuilder::new("researchcrew");
        for (index, members) in layers.into_iter().enumerate() {
            let is_last = index + 1 == stage_count;
            builder = builder.add_task(Arc::new(StageTask::new(index, members, is_last, shared.clone())));
        }
        for index in 1..stage_count {
            builder = builder.add_edge(&stage_id(index - 1), &stage_id(index));
        }
        let first_stage = stage_id(0);
        let graph = Arc::new(builder.set_start_task(&first_stage).build());

        let storage = Arc::new(InMemorySessionStorage::new());
        let runner = FlowRunner::new(graph, storage.clone());
        let session_id = format!("crew-{}", Uuid::new_v4());
        let session = Session::new_from_task(session_id.clone(), &first_stage);

        storage
            .save(session)
            .await
            .map_err(|err| OrchestrationError::Engine(format!("failed to persist session: {err}")))?;

        info!(%session_id, stages = stage_count, "crew kickoff");

        loop {
            let result = runner
                .run(&session_id)
                .await
                .map_err(|err| OrchestrationError::Engine(format!("graph execution failure: {err}")))?;

            match result.status {
                ExecutionStatus::Completed => break,
                ExecutionStatus::WaitingForInput => continue,
                ExecutionStatus::Error(message) => return Err(OrchestrationError::Engine(message)),
            }
        }

        let session = storage
            .get(&session_id)
            .await
            .map_err(|err| OrchestrationError::Engine(format!("failed to reload session: {err}")))?
            .ok_or_else(|| OrchestrationError::Engine("session missing after execution".into()))?;
        let context = session.context;

        if let Some(abort) = context.get::<AbortRecord>(RUN_ABORTED_KEY).await {
            return Err(OrchestrationError::TaskFailed {
                task: abort.task,
                reason: abort.reason,
            });
        }

        let mut records = Vec::with_capacity(order.len());
        for task_id in &order {
            if let Some(record) = context.get::<TaskRecord>(&record_key(task_id)).await {
                records.push(record);
            }
        }

        let output = context
            .get::<String>(&output_key(&final_task))
            .await
            .ok_or_else(|| OrchestrationError::TaskFailed {
                task: final_task.clone(),
                reason: "no output recorded".into(),
            })?;
        if output.trim().is_empty() {
            return Err(OrchestrationError::EmptySynthesis);
        }

        info!(
            final_task = %final_task,
            chars = output.chars().count(),
            failed = records.iter().filter(|r| !r.succeeded()).count(),
            "crew finished"
        );

        Ok(CrewOutput {
            final_task,
            output,
            records,
        })
    }
}
