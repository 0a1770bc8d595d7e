//! The four research tasks and their dependency wiring.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::OrchestrationError;
use crate::agents::{AgentRole, render_template};
use crate::planner::TaskGraph;

/// Unique identifier for a task node
pub type TaskId = String;

pub const PLAN: &str = "plan";
pub const WEB_SEARCH: &str = "web_search";
pub const ARXIV_SEARCH: &str = "arxiv_search";
pub const SYNTHESIZE: &str = "synthesize";

/// One unit of work assigned to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub description: String,
    pub expected_output: String,
    pub agent: AgentRole,
    /// Prerequisite tasks whose outputs are injected as context.
    pub context: Vec<TaskId>,
    /// Subset of `context` the task can run without.
    #[serde(default)]
    pub optional_context: Vec<TaskId>,
}

impl TaskSpec {
    pub fn new(
        id: impl Into<TaskId>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
        agent: AgentRole,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected_output: expected_output.into(),
            agent,
            context: Vec::new(),
            optional_context: Vec::new(),
        }
    }

    pub fn with_context(mut self, dep_id: impl Into<TaskId>) -> Self {
        self.context.push(dep_id.into());
        self
    }

    /// Prerequisite whose output is injected when available but whose
    /// failure does not keep this task from running.
    pub fn with_optional_context(mut self, dep_id: impl Into<TaskId>) -> Self {
        let dep_id = dep_id.into();
        self.optional_context.push(dep_id.clone());
        self.context.push(dep_id);
        self
    }

    pub fn requires(&self, dep_id: &str) -> bool {
        self.context.iter().any(|dep| dep == dep_id)
            && !self.optional_context.iter().any(|dep| dep == dep_id)
    }
}

/// Prerequisite output handed to a downstream task.
#[derive(Debug, Clone)]
pub enum ContextEntry<'a> {
    Output { task: &'a str, text: &'a str },
    Missing { task: &'a str, reason: &'a str },
}

/// User prompt for one task execution.
///
/// The `## Task:` header line always comes first so transcripts can be
/// attributed to a task.
pub fn render_task_prompt(task: &TaskSpec, context: &[ContextEntry<'_>]) -> String {
    let mut prompt = format!(
        "## Task: {}\n{}\n\nExpected output:\n{}\n",
        task.id,
        task.description.trim(),
        task.expected_output.trim()
    );

    if !context.is_empty() {
        prompt.push_str("\n## Context from prerequisite tasks\n");
        for entry in context {
            match entry {
                ContextEntry::Output { task, text } => {
                    let _ = write!(prompt, "\n### {task}\n{}\n", text.trim());
                }
                ContextEntry::Missing { task, reason } => {
                    let _ = write!(
                        prompt,
                        "\n### {task}\n_This task failed ({reason}); work with the remaining context._\n"
                    );
                }
            }
        }
    }

    prompt
}

const PLAN_DESCRIPTION: &str = "\
As Research Manager, draw up a comprehensive research plan for the topic '{topic}'.
1. Analyse the core elements and key concepts of the topic.
2. Identify the sub-areas and related techniques that deserve deeper exploration.
3. Define a search strategy with 3-5 general web queries focused on recent developments \
and 2-4 arXiv queries focused on recent papers.
4. Set priorities and the time range of interest.
5. Anticipate likely challenges and how to address them.
Queries should use current terminology, balance technical depth with practical \
applications, and favour recent information.";

const PLAN_EXPECTED: &str = "\
A detailed research plan in Markdown with: a topic analysis summary, the core research \
directions, a JSON block {\"web_queries\": [...]}, a JSON block {\"arxiv_queries\": [...]}, \
and the research priorities with expected outcomes.";

const WEB_SEARCH_DESCRIPTION: &str = "\
Run the web part of the research on '{topic}', guided by the plan in your context.
1. Execute every web query from the plan with the web_search tool.
2. Assess each result for quality and relevance.
3. Prefer authoritative outlets, technical blogs, official documentation and recent content.
4. Extract the key facts and viewpoints and keep the full source details (title, URL, date).";

const WEB_SEARCH_EXPECTED: &str = "\
A Markdown web search report: how many queries ran and how many results they produced, \
then for each query the relevant results (title, source, date, URL, key points), and a \
closing summary of the main trends and technical hot spots.";

const ARXIV_SEARCH_DESCRIPTION: &str = "\
Run the academic part of the research on '{topic}', guided by the plan in your context.
1. Execute every arXiv query from the plan with the arxiv_search tool.
2. Assess each paper for academic value and relevance, favouring work from the last two years.
3. Record complete metadata: title, authors, publication date, arXiv id and PDF link.
4. Extract the core contributions and innovations from each abstract.";

const ARXIV_SEARCH_EXPECTED: &str = "\
A Markdown arXiv search report: how many queries ran and how many papers they returned, \
then for each query the papers (title, authors, date, arXiv id, PDF link, core contribution), \
and a closing summary of research trends and the most active groups.";

const SYNTHESIZE_DESCRIPTION: &str = "\
Combine the web and arXiv findings in your context into an in-depth research report on '{topic}'.
Cross-check the sources against each other, relate the industry view from the web to the \
academic view from arXiv, and give a balanced, well-argued analysis. Use academic but readable \
language, concrete technical details and Markdown links for every citation. Only cite sources \
that appear in your context.";

const SYNTHESIZE_EXPECTED: &str = "\
A complete Markdown research report with these sections:
# <Report title>
## Executive Summary
## 1. Background and Current State
## 2. Key Technical Findings (2.1 Academic Frontiers, 2.2 Industrial Applications)
## 3. In-depth Analysis (comparison, strengths and challenges, academia-industry gap)
## 4. Future Trends (short, medium and long term)
## 5. Conclusions and Recommendations
## 6. References (web sources, academic papers with arXiv ids)";

/// Build the four task specifications for `topic`.
pub fn build_task_specs(topic: &str) -> Vec<TaskSpec> {
    vec![
        TaskSpec::new(
            PLAN,
            render_template(PLAN_DESCRIPTION, topic),
            PLAN_EXPECTED,
            AgentRole::Manager,
        ),
        TaskSpec::new(
            WEB_SEARCH,
            render_template(WEB_SEARCH_DESCRIPTION, topic),
            WEB_SEARCH_EXPECTED,
            AgentRole::Researcher,
        )
        .with_optional_context(PLAN),
        TaskSpec::new(
            ARXIV_SEARCH,
            render_template(ARXIV_SEARCH_DESCRIPTION, topic),
            ARXIV_SEARCH_EXPECTED,
            AgentRole::Researcher,
        )
        .with_optional_context(PLAN),
        TaskSpec::new(
            SYNTHESIZE,
            render_template(SYNTHESIZE_DESCRIPTION, topic),
            SYNTHESIZE_EXPECTED,
            AgentRole::Analyst,
        )
        .with_context(WEB_SEARCH)
        .with_context(ARXIV_SEARCH),
    ]
}

/// Build and validate the task graph for `topic`.
pub fn build_task_graph(topic: &str) -> Result<TaskGraph, OrchestrationError> {
    let mut graph = TaskGraph::new();
    for spec in build_task_specs(topic) {
        graph.add_node(spec)?;
    }
    graph.validate()?;
    Ok(graph)
}
