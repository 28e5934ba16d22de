use std::time::Duration;

use crate::errors::AppError;

const DEFAULT_DATABASE_URL: &str = "sqlite://chat.db?mode=rwc";
const DEFAULT_API_BASE: &str = "https://api.deepseek.com";
const DEFAULT_MODEL: &str = "deepseek-chat";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    /// Longest silence tolerated while waiting for the next chunk.
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub history_limit: usize,
    pub upstream: UpstreamConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let api_key = lookup("DEEPSEEK_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::MissingConfig { key: "DEEPSEEK_API_KEY".to_string() })?;

        let base_url = lookup("DEEPSEEK_API_BASE")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            history_limit: parse_or(&lookup, "HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?,
            upstream: UpstreamConfig {
                base_url,
                api_key,
                model: lookup("UPSTREAM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                temperature: parse_or(&lookup, "UPSTREAM_TEMPERATURE", DEFAULT_TEMPERATURE)?,
                idle_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    "UPSTREAM_IDLE_TIMEOUT_SECS",
                    DEFAULT_IDLE_TIMEOUT_SECS,
                )?),
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| AppError::InvalidConfig {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = Config::from_lookup(lookup(&[("DEEPSEEK_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.upstream.model, "deepseek-chat");
        assert_eq!(config.upstream.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.upstream.base_url, "https://api.deepseek.com");
    }

    #[test]
    fn missing_api_key_fails() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, AppError::MissingConfig { key } if key == "DEEPSEEK_API_KEY"));
    }

    #[test]
    fn bad_number_is_reported_with_key() {
        let err = Config::from_lookup(lookup(&[("DEEPSEEK_API_KEY", "k"), ("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig { key, .. } if key == "PORT"));
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let config = Config::from_lookup(lookup(&[
            ("DEEPSEEK_API_KEY", "k"),
            ("DEEPSEEK_API_BASE", "http://localhost:9000/v1/"),
        ]))
        .unwrap();
        assert_eq!(config.upstream.base_url, "http://localhost:9000/v1");
    }
}
