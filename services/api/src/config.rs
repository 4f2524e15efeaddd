//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;
use tutor_core::TutorSettings;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings for the reasoning adapter's credential ring and retry policy.
#[derive(Clone, Debug, PartialEq)]
pub struct ReasoningConfig {
    pub api_keys: Vec<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub key_cooldown: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    pub reasoning: ReasoningConfig,
    pub tutor: TutorSettings,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address: SocketAddr =
            parse_or(&lookup, "BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin = lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Reasoning Adapter Settings ---
        // A comma-separated ring wins over the single key.
        let api_keys: Vec<String> = lookup("OPENAI_API_KEYS")
            .or_else(|| lookup("OPENAI_API_KEY"))
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let retry_base_ms: u64 = parse_or(&lookup, "RETRY_BASE_MS", 500)?;
        let retry_cap_ms: u64 = parse_or(&lookup, "RETRY_CAP_MS", 8_000)?;
        if retry_cap_ms < retry_base_ms {
            return Err(ConfigError::InvalidValue(
                "RETRY_CAP_MS".to_string(),
                format!("{retry_cap_ms} is below RETRY_BASE_MS ({retry_base_ms})"),
            ));
        }

        let reasoning = ReasoningConfig {
            api_keys,
            base_url: lookup("OPENAI_BASE_URL").filter(|u| !u.trim().is_empty()),
            model: lookup("REASONING_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            key_cooldown: Duration::from_secs(parse_or(&lookup, "KEY_COOLDOWN_SECS", 60)?),
            max_retries: parse_or(&lookup, "REASONING_MAX_RETRIES", 3)?,
            retry_base: Duration::from_millis(retry_base_ms),
            retry_cap: Duration::from_millis(retry_cap_ms),
        };

        // --- Orchestrator Thresholds ---
        let defaults = TutorSettings::default();
        let gibberish_alpha_ratio: f64 =
            parse_or(&lookup, "GIBBERISH_ALPHA_RATIO", defaults.gibberish_alpha_ratio)?;
        if !(0.0..=1.0).contains(&gibberish_alpha_ratio) {
            return Err(ConfigError::InvalidValue(
                "GIBBERISH_ALPHA_RATIO".to_string(),
                format!("{gibberish_alpha_ratio} is outside 0..=1"),
            ));
        }
        let tutor = TutorSettings {
            question_batch_size: parse_or(&lookup, "QUESTION_BATCH_SIZE", defaults.question_batch_size)?,
            context_top_k: parse_or(&lookup, "CONTEXT_TOP_K", defaults.context_top_k)?,
            rag_top_k: parse_or(&lookup, "RAG_TOP_K", defaults.rag_top_k)?,
            min_keyword_overlap: parse_or(&lookup, "MIN_KEYWORD_OVERLAP", defaults.min_keyword_overlap)?,
            gibberish_alpha_ratio,
            ..defaults
        }
        .normalized();

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            reasoning,
            tutor,
        })
    }
}

/// Parses `name` when it is set, otherwise returns `default`.
fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_database_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/tutor")]).unwrap();
        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.reasoning.api_keys.is_empty());
        assert_eq!(config.reasoning.model, "gpt-4o-mini");
        assert_eq!(config.reasoning.key_cooldown, Duration::from_secs(60));
        assert_eq!(config.reasoning.max_retries, 3);
        assert_eq!(config.tutor, TutorSettings::default().normalized());
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingVar(name)) if name == "DATABASE_URL"));
    }

    #[test]
    fn key_ring_prefers_the_list_and_skips_blanks() {
        let config = load(&[
            ("DATABASE_URL", "postgres://x"),
            ("OPENAI_API_KEYS", "sk-a, ,sk-b,"),
            ("OPENAI_API_KEY", "sk-single"),
        ])
        .unwrap();
        assert_eq!(config.reasoning.api_keys, vec!["sk-a".to_string(), "sk-b".to_string()]);

        let single = load(&[("DATABASE_URL", "postgres://x"), ("OPENAI_API_KEY", "sk-single")]).unwrap();
        assert_eq!(single.reasoning.api_keys, vec!["sk-single".to_string()]);
    }

    #[test]
    fn tutor_thresholds_are_read_and_normalised() {
        let config = load(&[
            ("DATABASE_URL", "postgres://x"),
            ("QUESTION_BATCH_SIZE", "3"),
            ("RAG_TOP_K", "7"),
            ("GIBBERISH_ALPHA_RATIO", "0.4"),
        ])
        .unwrap();
        assert_eq!(config.tutor.question_batch_size, 3);
        assert_eq!(config.tutor.min_generated_questions, 3);
        assert_eq!(config.tutor.rag_top_k, 7);
        assert_eq!(config.tutor.gibberish_alpha_ratio, 0.4);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let cases = [
            ("QUESTION_BATCH_SIZE", "ten"),
            ("RUST_LOG", "loud"),
            ("BIND_ADDRESS", "nowhere"),
            ("GIBBERISH_ALPHA_RATIO", "1.5"),
            ("KEY_COOLDOWN_SECS", "-1"),
        ];
        for (name, value) in cases {
            let err = load(&[("DATABASE_URL", "postgres://x"), (name, value)]).unwrap_err();
            assert!(matches!(&err, ConfigError::InvalidValue(var, _) if var == name), "{name}: {err}");
        }
    }

    #[test]
    fn retry_cap_must_not_undercut_the_base() {
        let err = load(&[
            ("DATABASE_URL", "postgres://x"),
            ("RETRY_BASE_MS", "1000"),
            ("RETRY_CAP_MS", "10"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "RETRY_CAP_MS"));
    }
}
