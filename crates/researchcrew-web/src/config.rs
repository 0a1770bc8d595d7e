use anyhow::{Context, Result, bail};
use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen_addr: String,
    /// Research runs allowed in flight at once; further submissions get 429.
    pub max_concurrency: usize,
}

impl AppConfig {
    const DEFAULT_LISTEN_ADDR: &'static str = "0.0.0.0:8080";
    const DEFAULT_MAX_CONCURRENCY: usize = 2;

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = lookup("WEB_LISTEN_ADDR")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| Self::DEFAULT_LISTEN_ADDR.to_string());

        let max_concurrency = match lookup("WEB_MAX_CONCURRENCY") {
            Some(value) => {
                let parsed = value
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("WEB_MAX_CONCURRENCY must be a number, got '{value}'"))?;
                if parsed == 0 {
                    bail!("WEB_MAX_CONCURRENCY must be at least 1");
                }
                parsed
            }
            None => Self::DEFAULT_MAX_CONCURRENCY,
        };

        Ok(Self {
            listen_addr,
            max_concurrency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.max_concurrency, 2);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = AppConfig::from_lookup(|key| (key == "WEB_MAX_CONCURRENCY").then(|| "0".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn garbage_concurrency_is_rejected() {
        assert!(
            AppConfig::from_lookup(|key| (key == "WEB_MAX_CONCURRENCY").then(|| "many".to_string()))
                .is_err()
        );
    }
}
