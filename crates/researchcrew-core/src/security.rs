use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::ConfigError;

static REDACTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?i)("?api[_-]?key"?\s*[:=]\s*"?)([A-Za-z0-9\-_.+/]+)"#)
            .expect("invalid api_key regex"),
        Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        Regex::new(r"(tvly-[A-Za-z0-9\-]{8,})").expect("invalid tvly_token regex"),
    ]
});

/// Wrapper around sensitive values to reduce accidental logging.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that `var` resolves to a non-empty value that is not a template placeholder.
pub fn require_secret<F>(lookup: &F, var: &str) -> Result<SecretValue, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => {
            let value = value.trim().to_string();
            if is_placeholder(&value) {
                return Err(ConfigError::invalid(
                    var,
                    "still set to the example placeholder",
                ));
            }
            Ok(SecretValue(value))
        }
        _ => Err(ConfigError::MissingSecret(var.to_string())),
    }
}

fn is_placeholder(value: &str) -> bool {
    value.contains("your-") && value.ends_with("-here")
}

/// Mask credentials in free text before it reaches logs or a user-facing page.
pub fn redact(input: &str) -> String {
    let mut output = input.to_string();
    for regex in REDACTION_PATTERNS.iter() {
        output = regex
            .replace_all(&output, |caps: &Captures| {
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .into_owned();
    }
    output
}
