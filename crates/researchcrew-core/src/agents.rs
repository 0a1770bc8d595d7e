//! Role, goal and backstory definitions for the three research agents.

use serde::{Deserialize, Serialize};

use crate::config::LlmSettings;
use crate::tools::ToolKind;

/// Agent role assignment for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Plans the research and may delegate to coworkers.
    Manager,
    /// Gathers material through web and arXiv search.
    Researcher,
    /// Writes the final report.
    Analyst,
}

impl AgentRole {
    pub const ALL: [AgentRole; 3] = [AgentRole::Manager, AgentRole::Researcher, AgentRole::Analyst];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Manager => "manager",
            AgentRole::Researcher => "researcher",
            AgentRole::Analyst => "analyst",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AgentRole::Manager => "Research Manager",
            AgentRole::Researcher => "Senior Researcher",
            AgentRole::Analyst => "Research Analyst",
        }
    }

    /// Resolve either the short id or the display name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|role| {
            role.as_str().eq_ignore_ascii_case(value) || role.display_name().eq_ignore_ascii_case(value)
        })
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Model parameters an agent runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmProfile {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmProfile {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    /// Shift the temperature, staying inside the range providers accept.
    pub fn with_temperature_offset(mut self, offset: f32) -> Self {
        self.temperature = (self.temperature + offset).clamp(0.0, 2.0);
        self
    }
}

/// Immutable description of one agent for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub role: AgentRole,
    pub name: String,
    pub goal: String,
    pub backstory: String,
    pub llm: LlmProfile,
    pub tools: Vec<ToolKind>,
    pub allow_delegation: bool,
    /// Tool-calling rounds before the agent is asked for its final answer.
    pub max_iter: usize,
}

impl AgentSpec {
    pub fn system_prompt(&self) -> String {
        format!(
            "You are {name}.\n{backstory}\n\nYour personal goal is: {goal}\n\n\
             Answer in Markdown. When you have the final answer, reply with it directly \
             instead of calling another tool.",
            name = self.name,
            backstory = self.backstory,
            goal = self.goal,
        )
    }
}

struct AgentTemplate {
    role: AgentRole,
    goal: &'static str,
    backstory: &'static str,
    tools: &'static [ToolKind],
    allow_delegation: bool,
    max_iter: usize,
    temperature_offset: f32,
}

const MANAGER: AgentTemplate = AgentTemplate {
    role: AgentRole::Manager,
    goal: "Design a thorough research plan for '{topic}', break it into concrete web and \
           academic search tasks, and make sure the final report meets a professional standard.",
    backstory: "You are a seasoned lab director with years of experience running research \
                programs. You quickly grasp complex topics, decompose broad questions into \
                actionable sub-tasks, balance breadth against depth when choosing search \
                strategies, and anticipate blind spots before they turn into gaps in the report.",
    tools: &[],
    allow_delegation: true,
    max_iter: 3,
    temperature_offset: 0.0,
};

const RESEARCHER: AgentTemplate = AgentTemplate {
    role: AgentRole::Researcher,
    goal: "Following the Research Manager's plan, collect the most recent, relevant and \
           authoritative information about '{topic}' from the web and from arXiv.",
    backstory: "You are an information specialist fluent in advanced search techniques for \
                search engines and academic databases. You judge the authority of a source at \
                a glance, combine keywords precisely, understand how papers cite each other, \
                and always favour the latest developments. Record the source of every finding.",
    tools: &[ToolKind::WebSearch, ToolKind::ArxivSearch],
    allow_delegation: false,
    max_iter: 5,
    temperature_offset: -0.2,
};

const ANALYST: AgentTemplate = AgentTemplate {
    role: AgentRole::Analyst,
    goal: "Analyse the gathered material on '{topic}' in depth and write a well-structured, \
           insightful and accurately cited research report.",
    backstory: "You are a senior science writer for leading international journals. You \
                distil core insights from scattered evidence, weigh competing claims \
                critically, connect ideas across disciplines and never cite a source you have \
                not been given. Your reports are known for clear structure and careful references.",
    tools: &[],
    allow_delegation: false,
    max_iter: 3,
    temperature_offset: 0.1,
};

/// Replace every `{topic}` placeholder in `template`.
pub fn render_template(template: &str, topic: &str) -> String {
    template.replace("{topic}", topic)
}

fn build(template: &AgentTemplate, topic: &str, base: &LlmProfile) -> AgentSpec {
    AgentSpec {
        role: template.role,
        name: template.role.display_name().to_string(),
        goal: render_template(template.goal, topic),
        backstory: render_template(template.backstory, topic),
        llm: base.clone().with_temperature_offset(template.temperature_offset),
        tools: template.tools.to_vec(),
        allow_delegation: template.allow_delegation,
        max_iter: template.max_iter,
    }
}

/// The agents of one run, keyed by role.
#[derive(Debug, Clone)]
pub struct AgentRoster {
    agents: Vec<AgentSpec>,
}

impl AgentRoster {
    pub fn get(&self, role: AgentRole) -> Option<&AgentSpec> {
        self.agents.iter().find(|agent| agent.role == role)
    }

    /// Agents other than `role` that can receive delegated work.
    pub fn coworkers(&self, role: AgentRole) -> Vec<&AgentSpec> {
        self.agents.iter().filter(|agent| agent.role != role).collect()
    }
}

/// Build fresh agent definitions for `topic`.
pub fn build_agents(topic: &str, base: &LlmProfile) -> AgentRoster {
    AgentRoster {
        agents: [&MANAGER, &RESEARCHER, &ANALYST]
            .into_iter()
            .map(|template| build(template, topic, base))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> LlmProfile {
        LlmProfile {
            model: "deepseek-chat".into(),
            temperature: 0.7,
            max_tokens: 4000,
        }
    }

    #[test]
    fn researcher_carries_exactly_both_search_tools() {
        let roster = build_agents("quantum error correction", &profile());
        let researcher = roster.get(AgentRole::Researcher).expect("researcher");
        assert_eq!(researcher.tools, vec![ToolKind::WebSearch, ToolKind::ArxivSearch]);
        assert!(!researcher.allow_delegation);
        assert_eq!(researcher.max_iter, 5);
    }

    #[test]
    fn only_the_manager_delegates() {
        let roster = build_agents("topic", &profile());
        let manager = roster.get(AgentRole::Manager).expect("manager");
        assert!(manager.allow_delegation);
        assert!(manager.tools.is_empty());
        assert!(!roster.get(AgentRole::Analyst).expect("analyst").allow_delegation);

        let coworkers: Vec<AgentRole> = roster
            .coworkers(AgentRole::Manager)
            .into_iter()
            .map(|agent| agent.role)
            .collect();
        assert_eq!(coworkers, vec![AgentRole::Researcher, AgentRole::Analyst]);
    }

    #[test]
    fn rendering_is_deterministic_and_fills_topic() {
        let first = build_agents("LLM 上下文窗口", &profile());
        let second = build_agents("LLM 上下文窗口", &profile());
        for (a, b) in first.agents.iter().zip(second.agents.iter()) {
            assert_eq!(a, b);
            assert!(!a.goal.contains("{topic}"));
        }
        assert!(first.get(AgentRole::Manager).expect("manager").goal.contains("LLM 上下文窗口"));
    }

    #[test]
    fn temperatures_follow_role_offsets() {
        let roster = build_agents("topic", &profile());
        let temp = |role| roster.get(role).expect("agent").llm.temperature;
        assert!((temp(AgentRole::Manager) - 0.7).abs() < 1e-6);
        assert!((temp(AgentRole::Researcher) - 0.5).abs() < 1e-6);
        assert!((temp(AgentRole::Analyst) - 0.8).abs() < 1e-6);

        let cold = LlmProfile {
            temperature: 0.1,
            ..profile()
        };
        assert_eq!(cold.with_temperature_offset(-0.2).temperature, 0.0);
    }

    #[test]
    fn roles_parse_from_id_or_display_name() {
        assert_eq!(AgentRole::parse("researcher"), Some(AgentRole::Researcher));
        assert_eq!(AgentRole::parse("Research Analyst"), Some(AgentRole::Analyst));
        assert_eq!(AgentRole::parse("critic"), None);
    }

    #[test]
    fn system_prompt_mentions_name_and_goal() {
        let roster = build_agents("graph neural networks", &profile());
        let prompt = roster.get(AgentRole::Analyst).expect("analyst").system_prompt();
        assert!(prompt.starts_with("You are Research Analyst."));
        assert!(prompt.contains("graph neural networks"));
    }
}
