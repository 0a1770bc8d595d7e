use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use graph_flow::{Context, NextAction, Task, TaskResult};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use super::agent_loop::AgentRunner;
use super::{AbortRecord, RUN_ABORTED_KEY, TaskRecord, TaskStatus, error_key, output_key, record_key};
use crate::config::FailurePolicy;
use crate::events::{EventCollector, TaskOutcome};
use crate::planner::TaskGraph;
use crate::security::redact;
use crate::tasks::{ContextEntry, TaskSpec, render_task_prompt};

/// State shared by every stage of one run.
pub(crate) struct StageShared {
    pub(crate) runner: AgentRunner,
    pub(crate) graph: TaskGraph,
    pub(crate) final_task: String,
    pub(crate) policy: FailurePolicy,
    pub(crate) limiter: Semaphore,
    pub(crate) events: EventCollector,
}

/// One topological layer of the task graph, registered as a `graph_flow` task.
pub(crate) struct StageTask {
    id: String,
    members: Vec<String>,
    is_last: bool,
    shared: Arc<StageShared>,
}

impl StageTask {
    pub(crate) fn new(index: usize, members: Vec<String>, is_last: bool, shared: Arc<StageShared>) -> Self {
        Self {
            id: stage_id(index),
            members,
            is_last,
            shared,
        }
    }

    async fn run_member(&self, task_id: &str, context: &Context) -> TaskRecord {
        let Some(spec) = self.shared.graph.get_node(task_id) else {
            return TaskRecord::failed(task_id, None, format!("task '{task_id}' is not part of the graph"), 0);
        };

        let started = Instant::now();
        let entries = gather_context(spec, context).await;
        let required = spec.context.iter().filter(|dep| spec.requires(dep)).count();
        let missing_required: Vec<&str> = entries
            .iter()
            .filter_map(|entry| match entry {
                Gathered::Missing { task, .. } if spec.requires(task) => Some(task.as_str()),
                _ => None,
            })
            .collect();

        // Optional prerequisites never block a task; required ones only when all are gone.
        if required > 0 && missing_required.len() == required {
            let reason = format!("all prerequisites failed: {}", missing_required.join(", "));
            warn!(task = task_id, %reason, "skipping task");
            self.shared.events.emit_finish(
                task_id.to_string(),
                spec.agent,
                TaskOutcome::Failure {
                    reason: reason.clone(),
                },
                0,
            );
            return TaskRecord::failed(task_id, Some(spec.agent), reason, 0);
        }

        let _permit = match self.shared.limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return TaskRecord::failed(task_id, Some(spec.agent), "task limiter closed", 0);
            }
        };

        let Some(agent) = self.shared.runner.roster().get(spec.agent) else {
            return TaskRecord::failed(
                task_id,
                Some(spec.agent),
                format!("no agent defined for role {}", spec.agent),
                0,
            );
        };

        self.shared
            .events
            .emit_start(task_id.to_string(), spec.agent, spec.description.clone());
        info!(task = task_id, agent = %spec.agent.as_str(), "task started");

        let context_refs: Vec<ContextEntry<'_>> = entries.iter().map(Gathered::as_entry).collect();
        let prompt = render_task_prompt(spec, &context_refs);
        let result = self
            .shared
            .runner
            .run(agent, task_id, prompt, false)
            .await
            .map_err(|err| redact(&err.to_string()));
        let duration_ms = started.elapsed().as_millis() as u64;

        // An empty final answer is reported by the engine as an empty synthesis.
        let result = match result {
            Ok(output) if output.is_empty() && task_id != self.shared.final_task => {
                Err("agent returned an empty answer".to_string())
            }
            other => other,
        };

        match result {
            Ok(output) => {
                context.set(output_key(task_id), &output).await;
                info!(task = task_id, chars = output.chars().count(), duration_ms, "task finished");
                self.shared.events.emit_finish(
                    task_id.to_string(),
                    spec.agent,
                    TaskOutcome::Success,
                    duration_ms,
                );
                TaskRecord {
                    task_id: task_id.to_string(),
                    agent: Some(spec.agent),
                    status: TaskStatus::Succeeded,
                    output_chars: output.chars().count(),
                    duration_ms,
                }
            }
            Err(reason) => {
                warn!(task = task_id, %reason, duration_ms, "task failed");
                self.shared.events.emit_finish(
                    task_id.to_string(),
                    spec.agent,
                    TaskOutcome::Failure {
                        reason: reason.clone(),
                    },
                    duration_ms,
                );
                TaskRecord::failed(task_id, Some(spec.agent), reason, duration_ms)
            }
        }
    }
}

#[async_trait]
impl Task for StageTask {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(name = "engine.stage", skip(self, context), fields(stage = %self.id, tasks = self.members.len()))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let records = join_all(
            self.members
                .iter()
                .map(|task_id| self.run_member(task_id, &context)),
        )
        .await;

        let mut abort: Option<AbortRecord> = None;
        for record in &records {
            context.set(record_key(&record.task_id), record).await;
            if let Some(reason) = record.failure_reason() {
                context.set(error_key(&record.task_id), reason).await;
                let fatal = self.shared.policy == FailurePolicy::Abort
                    || record.task_id == self.shared.final_task;
                if fatal && abort.is_none() {
                    abort = Some(AbortRecord {
                        task: record.task_id.clone(),
                        reason: reason.to_string(),
                    });
                }
            }
        }

        if let Some(abort) = abort {
            warn!(task = %abort.task, reason = %abort.reason, "aborting run");
            context.set(RUN_ABORTED_KEY, &abort).await;
            return Ok(TaskResult::new(
                Some(format!("Run aborted: task '{}' failed", abort.task)),
                NextAction::End,
            ));
        }

        let next = if self.is_last {
            NextAction::End
        } else {
            NextAction::ContinueAndExecute
        };
        Ok(TaskResult::new(
            Some(format!("{} completed {} task(s)", self.id, records.len())),
            next,
        ))
    }
}

pub(crate) fn stage_id(index: usize) -> String {
    format!("stage-{index}")
}

enum Gathered {
    Output { task: String, text: String },
    Missing { task: String, reason: String },
}

impl Gathered {
    fn as_entry(&self) -> ContextEntry<'_> {
        match self {
            Gathered::Output { task, text } => ContextEntry::Output { task, text },
            Gathered::Missing { task, reason } => ContextEntry::Missing { task, reason },
        }
    }
}

async fn gather_context(spec: &TaskSpec, context: &Context) -> Vec<Gathered> {
    let mut entries = Vec::with_capacity(spec.context.len());
    for dep in &spec.context {
        match context.get::<String>(&output_key(dep)).await {
            Some(text) => entries.push(Gathered::Output {
                task: dep.clone(),
                text,
            }),
            None => {
                let reason = context
                    .get::<String>(&error_key(dep))
                    .await
                    .unwrap_or_else(|| "no output recorded".to_string());
                entries.push(Gathered::Missing {
                    task: dep.clone(),
                    reason,
                });
            }
        }
    }
    entries
}
