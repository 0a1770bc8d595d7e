use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    ConfigError,
    security::{SecretValue, require_secret},
};

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_API_BASE_ENV: &str = "OPENAI_API_BASE";
pub const OPENAI_MODEL_NAME_ENV: &str = "OPENAI_MODEL_NAME";
pub const TEMPERATURE_ENV: &str = "RESEARCHCREW_TEMPERATURE";
pub const MAX_TOKENS_ENV: &str = "RESEARCHCREW_MAX_TOKENS";
pub const REQUEST_TIMEOUT_ENV: &str = "RESEARCHCREW_REQUEST_TIMEOUT_SECS";
pub const TAVILY_API_KEY_ENV: &str = "TAVILY_API_KEY";
pub const TAVILY_API_URL_ENV: &str = "TAVILY_API_URL";
pub const ARXIV_API_URL_ENV: &str = "ARXIV_API_URL";
pub const MAX_SEARCH_RESULTS_ENV: &str = "RESEARCHCREW_MAX_SEARCH_RESULTS";
pub const REPORTS_DIR_ENV: &str = "RESEARCHCREW_REPORTS_DIR";
pub const FAILURE_POLICY_ENV: &str = "RESEARCHCREW_FAILURE_POLICY";
pub const MAX_CONCURRENT_TASKS_ENV: &str = "RESEARCHCREW_MAX_CONCURRENT_TASKS";

const DEFAULT_API_BASE: &str = "https://api.deepseek.com";
const DEFAULT_MODEL: &str = "deepseek-chat";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 4000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_SEARCH_RESULTS: usize = 5;
const DEFAULT_REPORTS_DIR: &str = "reports";
const DEFAULT_MAX_CONCURRENT_TASKS: usize = 2;
pub const DEFAULT_ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";
pub const DEFAULT_TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// What happens to a run when a non-terminal task fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Fail the whole run with the first task failure.
    #[default]
    Abort,
    /// Record the failure and let dependents run on the surviving context.
    Degrade,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::Degrade => "degrade",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "degrade" => Ok(FailurePolicy::Degrade),
            other => Err(ConfigError::invalid(
                FAILURE_POLICY_ENV,
                format!("expected `abort` or `degrade`, got `{other}`"),
            )),
        }
    }
}

/// Process-wide settings, read once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Settings {
    pub llm: LlmSettings,
    pub search: SearchSettings,
    pub engine: EngineSettings,
    pub reports_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: SecretValue,
    /// Base URL ending in `/v1`.
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub tavily_api_key: SecretValue,
    pub tavily_api_url: String,
    pub arxiv_api_url: String,
    pub max_results: usize,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub failure_policy: FailurePolicy,
    pub max_concurrent_tasks: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup (tests pass a map here).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = require_secret(&lookup, OPENAI_API_KEY_ENV)?;
        let tavily_api_key = require_secret(&lookup, TAVILY_API_KEY_ENV)?;

        let api_base = normalize_api_base(
            &optional(&lookup, OPENAI_API_BASE_ENV).unwrap_or_else(|| DEFAULT_API_BASE.into()),
        )?;
        let model = optional(&lookup, OPENAI_MODEL_NAME_ENV).unwrap_or_else(|| DEFAULT_MODEL.into());

        let temperature: f32 = parse_or(&lookup, TEMPERATURE_ENV, DEFAULT_TEMPERATURE)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::invalid(
                TEMPERATURE_ENV,
                "must be between 0.0 and 2.0",
            ));
        }

        let max_tokens: u32 = parse_or(&lookup, MAX_TOKENS_ENV, DEFAULT_MAX_TOKENS)?;
        let timeout_secs: u64 =
            parse_or(&lookup, REQUEST_TIMEOUT_ENV, DEFAULT_REQUEST_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::invalid(REQUEST_TIMEOUT_ENV, "must be positive"));
        }

        let max_results: usize =
            parse_or(&lookup, MAX_SEARCH_RESULTS_ENV, DEFAULT_MAX_SEARCH_RESULTS)?;
        if !(1..=50).contains(&max_results) {
            return Err(ConfigError::invalid(
                MAX_SEARCH_RESULTS_ENV,
                "must be between 1 and 50",
            ));
        }

        let failure_policy = match optional(&lookup, FAILURE_POLICY_ENV) {
            Some(value) => value.parse()?,
            None => FailurePolicy::default(),
        };
        let max_concurrent_tasks: usize = parse_or(
            &lookup,
            MAX_CONCURRENT_TASKS_ENV,
            DEFAULT_MAX_CONCURRENT_TASKS,
        )?;
        if max_concurrent_tasks == 0 {
            return Err(ConfigError::invalid(
                MAX_CONCURRENT_TASKS_ENV,
                "must be at least 1",
            ));
        }

        let reports_dir = optional(&lookup, REPORTS_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORTS_DIR));

        Ok(Self {
            llm: LlmSettings {
                api_key,
                api_base,
                model,
                temperature,
                max_tokens,
                request_timeout: Duration::from_secs(timeout_secs),
            },
            search: SearchSettings {
                tavily_api_key,
                tavily_api_url: optional(&lookup, TAVILY_API_URL_ENV)
                    .unwrap_or_else(|| DEFAULT_TAVILY_API_URL.into()),
                arxiv_api_url: optional(&lookup, ARXIV_API_URL_ENV)
                    .unwrap_or_else(|| DEFAULT_ARXIV_API_URL.into()),
                max_results,
            },
            engine: EngineSettings {
                failure_policy,
                max_concurrent_tasks,
            },
            reports_dir,
        })
    }
}

fn optional<F>(lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match optional(lookup, var) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| ConfigError::invalid(var, format!("`{raw}`: {err}"))),
        None => Ok(default),
    }
}

/// Chat-completions endpoints live under `/v1`; accept bases with or without it.
fn normalize_api_base(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::invalid(
            OPENAI_API_BASE_ENV,
            format!("`{trimmed}` is not an http(s) URL"),
        ));
    }
    if trimmed.ends_with("/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/v1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            (OPENAI_API_KEY_ENV, "sk-test"),
            (TAVILY_API_KEY_ENV, "tvly-test"),
        ]
    }

    #[test]
    fn defaults_apply_when_only_secrets_are_set() {
        let settings = Settings::from_lookup(lookup(&required())).expect("settings");
        assert_eq!(settings.llm.api_base, "https://api.deepseek.com/v1");
        assert_eq!(settings.llm.model, "deepseek-chat");
        assert!((settings.llm.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(settings.llm.max_tokens, 4000);
        assert_eq!(settings.llm.request_timeout, Duration::from_secs(60));
        assert_eq!(settings.search.max_results, 5);
        assert_eq!(settings.search.arxiv_api_url, DEFAULT_ARXIV_API_URL);
        assert_eq!(settings.engine.failure_policy, FailurePolicy::Abort);
        assert_eq!(settings.reports_dir, PathBuf::from("reports"));
    }

    #[test]
    fn secrets_stay_out_of_debug_output() {
        let settings = Settings::from_lookup(lookup(&required())).expect("settings");
        assert_eq!(settings.llm.api_key.expose(), "sk-test");
        let debug = format!("{settings:?}");
        assert!(!debug.contains("sk-test"));
        assert!(!debug.contains("tvly-test"));
    }

    #[test]
    fn missing_llm_key_is_fatal() {
        let err = Settings::from_lookup(lookup(&[(TAVILY_API_KEY_ENV, "tvly-test")])).unwrap_err();
        match err {
            ConfigError::MissingSecret(var) => assert_eq!(var, OPENAI_API_KEY_ENV),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_search_key_is_fatal() {
        let err = Settings::from_lookup(lookup(&[(OPENAI_API_KEY_ENV, "sk-test")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret(var) if var == TAVILY_API_KEY_ENV));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = required();
        pairs.extend([
            (OPENAI_API_BASE_ENV, "https://api.openai.com/v1/"),
            (OPENAI_MODEL_NAME_ENV, "gpt-4o-mini"),
            (TEMPERATURE_ENV, "0.2"),
            (MAX_SEARCH_RESULTS_ENV, "8"),
            (FAILURE_POLICY_ENV, "Degrade"),
            (REPORTS_DIR_ENV, "/tmp/reports"),
        ]);
        let settings = Settings::from_lookup(lookup(&pairs)).expect("settings");
        assert_eq!(settings.llm.api_base, "https://api.openai.com/v1");
        assert_eq!(settings.llm.model, "gpt-4o-mini");
        assert_eq!(settings.search.max_results, 8);
        assert_eq!(settings.engine.failure_policy, FailurePolicy::Degrade);
        assert_eq!(settings.reports_dir, PathBuf::from("/tmp/reports"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let mut pairs = required();
        pairs.push((TEMPERATURE_ENV, "warm"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref var, .. } if var == TEMPERATURE_ENV));

        let mut pairs = required();
        pairs.push((MAX_SEARCH_RESULTS_ENV, "0"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref var, .. } if var == MAX_SEARCH_RESULTS_ENV));
    }

    #[test]
    fn api_base_must_be_http() {
        let mut pairs = required();
        pairs.push((OPENAI_API_BASE_ENV, "api.deepseek.com"));
        assert!(Settings::from_lookup(lookup(&pairs)).is_err());
    }
}
