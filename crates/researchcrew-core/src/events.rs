//! Progress events emitted while a crew runs.
//!
//! Front ends subscribe to the receiving half of the channel to print task
//! starts, tool calls and completions as they happen.

use crate::agents::AgentRole;
use crate::tasks::TaskId;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Unique identifier for an event
pub type EventId = String;

/// Task and agent lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task execution started
    Start {
        event_id: EventId,
        timestamp: u64,
        task_id: TaskId,
        role: AgentRole,
        description: String,
    },
    /// Task execution finished
    Finish {
        event_id: EventId,
        timestamp: u64,
        task_id: TaskId,
        role: AgentRole,
        outcome: TaskOutcome,
        duration_ms: u64,
    },
    /// Tool call, delegation or other intermediate step
    Message {
        event_id: EventId,
        timestamp: u64,
        task_id: TaskId,
        role: AgentRole,
        content: String,
        metadata: serde_json::Value,
    },
}

impl Event {
    /// One-line human readable rendering for terminals and logs.
    pub fn render_line(&self) -> String {
        match self {
            Event::Start { task_id, role, .. } => format!("▶ {task_id} started ({role})"),
            Event::Finish {
                task_id,
                outcome,
                duration_ms,
                ..
            } => match outcome {
                TaskOutcome::Success => {
                    format!("✔ {task_id} finished in {:.1}s", *duration_ms as f64 / 1000.0)
                }
                TaskOutcome::Failure { reason } => format!("✘ {task_id} failed: {reason}"),
            },
            Event::Message {
                task_id,
                role,
                content,
                ..
            } => format!("  · [{task_id}] {role}: {content}"),
        }
    }
}

/// Outcome of a task execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failure { reason: String },
}

/// Sending half of the progress channel. A disabled collector drops events.
#[derive(Clone, Default)]
pub struct EventCollector {
    sender: Option<mpsc::UnboundedSender<Event>>,
}

impl EventCollector {
    /// Create a new event collector
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    fn send(&self, event: Event) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.send(event) {
            tracing::debug!(error = %e, "event receiver dropped");
        }
    }

    /// Emit a Start event
    pub fn emit_start(&self, task_id: TaskId, role: AgentRole, description: String) {
        self.send(Event::Start {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            task_id,
            role,
            description,
        });
    }

    /// Emit a Finish event
    pub fn emit_finish(
        &self,
        task_id: TaskId,
        role: AgentRole,
        outcome: TaskOutcome,
        duration_ms: u64,
    ) {
        self.send(Event::Finish {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            task_id,
            role,
            outcome,
            duration_ms,
        });
    }

    /// Emit a Message event
    pub fn emit_message(
        &self,
        task_id: TaskId,
        role: AgentRole,
        content: String,
        metadata: serde_json::Value,
    ) {
        self.send(Event::Message {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            task_id,
            role,
            content,
            metadata,
        });
    }
}

/// Generate a unique event ID
fn generate_event_id() -> EventId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("evt_{}", id)
}

/// Current Unix timestamp in milliseconds
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_collector() {
        let (collector, mut receiver) = EventCollector::new();

        collector.emit_start(
            "plan".to_string(),
            AgentRole::Manager,
            "Plan the research".to_string(),
        );

        let event = receiver.recv().await.unwrap();
        match event {
            Event::Start { task_id, role, .. } => {
                assert_eq!(task_id, "plan");
                assert_eq!(role, AgentRole::Manager);
            }
            _ => panic!("Expected Start event"),
        }
    }

    #[test]
    fn disabled_collector_drops_events() {
        let collector = EventCollector::disabled();
        assert!(!collector.is_enabled());
        collector.emit_finish("plan".into(), AgentRole::Manager, TaskOutcome::Success, 5);
    }

    #[test]
    fn render_line_describes_failures() {
        let event = Event::Finish {
            event_id: "evt_1".into(),
            timestamp: 0,
            task_id: "arxiv_search".into(),
            role: AgentRole::Researcher,
            outcome: TaskOutcome::Failure {
                reason: "timeout".into(),
            },
            duration_ms: 1200,
        };
        assert_eq!(event.render_line(), "✘ arxiv_search failed: timeout");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "finish");
    }
}
