use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::LlmError;
use crate::agents::{AgentRole, AgentRoster, AgentSpec};
use crate::events::EventCollector;
use crate::llm::{ChatMessage, CompletionRequest, LanguageModel, ToolCall, ToolDefinition};
use crate::security::redact;
use crate::tools::{DynTool, Toolbox};

pub(crate) const DELEGATE_TOOL: &str = "delegate_work";

const FINAL_ANSWER_PROMPT: &str = "You have reached the maximum number of tool calls. \
     Do not call any more tools. Using the information gathered so far, give your best \
     final answer now, in full.";

/// Why an agent produced no usable answer.
#[derive(Debug, thiserror::Error)]
pub(crate) enum AgentFailure {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("tool '{0}' is not configured")]
    MissingTool(&'static str),
}

#[derive(Deserialize)]
struct DelegateArgs {
    coworker: String,
    task: String,
    #[serde(default)]
    context: String,
}

/// Drives one agent through bounded rounds of tool-calling chat completions.
pub(crate) struct AgentRunner {
    llm: Arc<dyn LanguageModel>,
    toolbox: Toolbox,
    roster: AgentRoster,
    events: EventCollector,
}

impl AgentRunner {
    pub(crate) fn new(
        llm: Arc<dyn LanguageModel>,
        toolbox: Toolbox,
        roster: AgentRoster,
        events: EventCollector,
    ) -> Self {
        Self {
            llm,
            toolbox,
            roster,
            events,
        }
    }

    pub(crate) fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    /// Run `agent` on `prompt` and return its final answer, trimmed.
    ///
    /// `delegated` marks a run started through `delegate_work`; such runs may
    /// not delegate again.
    pub(crate) fn run<'a>(
        &'a self,
        agent: &'a AgentSpec,
        task_id: &'a str,
        prompt: String,
        delegated: bool,
    ) -> BoxFuture<'a, Result<String, AgentFailure>> {
        async move {
            let tools = self
                .toolbox
                .resolve(&agent.tools)
                .map_err(|kind| AgentFailure::MissingTool(kind.as_str()))?;
            let can_delegate = agent.allow_delegation && !delegated;

            let mut definitions: Vec<ToolDefinition> =
                tools.iter().map(|tool| tool.definition()).collect();
            if can_delegate {
                definitions.push(self.delegate_definition(agent.role));
            }

            let mut messages = vec![
                ChatMessage::system(agent.system_prompt()),
                ChatMessage::user(prompt),
            ];

            for round in 0..agent.max_iter {
                let completion = self
                    .llm
                    .complete(request(agent, &messages, definitions.clone()))
                    .await?;
                let message = completion.message;

                if message.tool_calls.is_empty() {
                    debug!(task = task_id, agent = %agent.role.as_str(), round, "agent answered");
                    return Ok(message.text_content().trim().to_string());
                }

                messages.push(ChatMessage::assistant_tool_calls(
                    message.content.clone(),
                    message.tool_calls.clone(),
                ));
                for call in &message.tool_calls {
                    let output = self
                        .invoke(agent, task_id, &tools, can_delegate, call)
                        .await;
                    messages.push(ChatMessage::tool_result(call.id.clone(), output));
                }
            }

            info!(
                task = task_id,
                agent = %agent.role.as_str(),
                max_iter = agent.max_iter,
                "iteration limit reached, forcing final answer"
            );
            messages.push(ChatMessage::user(FINAL_ANSWER_PROMPT));
            let completion = self
                .llm
                .complete(request(agent, &messages, Vec::new()))
                .await?;
            Ok(completion.message.text_content().trim().to_string())
        }
        .boxed()
    }

    /// Execute one tool call. Failures are returned as text for the model to read.
    async fn invoke(
        &self,
        agent: &AgentSpec,
        task_id: &str,
        tools: &[DynTool],
        can_delegate: bool,
        call: &ToolCall,
    ) -> String {
        let name = call.function.name.as_str();
        let arguments = match call.function.parsed_arguments() {
            Ok(arguments) => arguments,
            Err(err) => return format!("Error: arguments for '{name}' are not valid JSON: {err}"),
        };

        self.events.emit_message(
            task_id.to_string(),
            agent.role,
            format!("calling {name}"),
            json!({ "tool": name, "arguments": arguments }),
        );

        if name == DELEGATE_TOOL && can_delegate {
            return self.delegate(agent, task_id, &arguments).await;
        }

        let Some(tool) = tools.iter().find(|tool| tool.name() == name) else {
            warn!(task = task_id, tool = name, "model requested an unavailable tool");
            return format!("Error: tool '{name}' is not available to you.");
        };

        match tool.call(&arguments).await {
            Ok(result) => {
                debug!(task = task_id, tool = name, hits = result.hits.len(), "tool call succeeded");
                result.render_markdown()
            }
            Err(err) => {
                let message = redact(&err.to_string());
                warn!(task = task_id, tool = name, error = %message, "tool call failed");
                self.events.emit_message(
                    task_id.to_string(),
                    agent.role,
                    format!("{name} failed: {message}"),
                    json!({ "tool": name, "error": message }),
                );
                format!("Error: {message}")
            }
        }
    }

    async fn delegate(&self, manager: &AgentSpec, task_id: &str, arguments: &Value) -> String {
        let args: DelegateArgs = match serde_json::from_value(arguments.clone()) {
            Ok(args) => args,
            Err(err) => return format!("Error: invalid delegation request: {err}"),
        };

        let Some(coworker) = AgentRole::parse(&args.coworker)
            .filter(|role| *role != manager.role)
            .and_then(|role| self.roster.get(role))
        else {
            return format!(
                "Error: unknown coworker '{}'. Choose one of: {}.",
                args.coworker,
                self.coworker_names(manager.role)
            );
        };

        self.events.emit_message(
            task_id.to_string(),
            manager.role,
            format!("delegating to {}", coworker.name),
            json!({ "coworker": coworker.role, "task": args.task }),
        );

        let mut prompt = format!("## Delegated task from {}\n{}\n", manager.name, args.task.trim());
        if !args.context.trim().is_empty() {
            prompt.push_str(&format!("\n### Context\n{}\n", args.context.trim()));
        }

        match self.run(coworker, task_id, prompt, true).await {
            Ok(answer) => answer,
            Err(err) => format!("Error: {} could not complete the delegated task: {}", coworker.name, redact(&err.to_string())),
        }
    }

    fn coworker_names(&self, role: AgentRole) -> String {
        self.roster
            .coworkers(role)
            .iter()
            .map(|agent| agent.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn delegate_definition(&self, role: AgentRole) -> ToolDefinition {
        let names: Vec<&str> = self
            .roster
            .coworkers(role)
            .into_iter()
            .map(|agent| agent.name.as_str())
            .collect();
        ToolDefinition {
            name: DELEGATE_TOOL.to_string(),
            description: format!(
                "Delegate a specific sub-task to one of your coworkers: {}. \
                 Provide everything they need to know, they do not see your conversation.",
                names.join(", ")
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "coworker": { "type": "string", "enum": names },
                    "task": { "type": "string", "description": "What the coworker should do" },
                    "context": { "type": "string", "description": "Background the coworker needs" }
                },
                "required": ["coworker", "task"]
            }),
        }
    }
}

fn request(agent: &AgentSpec, messages: &[ChatMessage], tools: Vec<ToolDefinition>) -> CompletionRequest {
    CompletionRequest {
        model: agent.llm.model.clone(),
        messages: messages.to_vec(),
        temperature: agent.llm.temperature,
        max_tokens: agent.llm.max_tokens,
        tools,
    }
}
