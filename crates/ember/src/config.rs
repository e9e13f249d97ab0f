use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_MODEL: &str = "codellama";
pub const DEFAULT_MAX_HISTORY: usize = 20;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_FRAGMENT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 3600;

/// System prompt sent ahead of every conversation. Override with
/// `EMBER_SYSTEM_PROMPT`.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an expert coding assistant. You help developers with:
- Writing clean, efficient code
- Debugging and fixing errors
- Explaining complex algorithms
- Code reviews and optimization
- Best practices and design patterns

Provide clear, concise answers with code examples when relevant.
Use markdown formatting for code blocks with language specification.";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for '{0}': '{1}' - {2}")]
    InvalidValue(String, String, String),
    #[error("Value for '{0}' is out of valid range: {1}")]
    InvalidRange(String, String),
}

/// Tunables for the chat orchestration core.
///
/// Every field has a default and an `EMBER_*` environment override;
/// construction fails only on unparseable or out-of-range values,
/// never on absent ones.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub default_model: String,
    pub max_history: usize,
    pub max_tokens: Option<i32>,
    pub temperature: Option<f32>,
    /// Total-request deadline for one generation.
    pub request_timeout: Duration,
    /// Deadline between consecutive fragments, guards against a
    /// runtime that stalls mid-generation.
    pub fragment_timeout: Duration,
    pub session_idle_timeout: Duration,
    /// When set, a cancelled generation's partial assistant text is
    /// appended to the session instead of being discarded.
    pub keep_partial_turns: bool,
    pub system_prompt: String,
}

impl ChatConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_history = match std::env::var("EMBER_MAX_HISTORY") {
            Ok(value) => {
                let parsed = value.parse::<usize>().map_err(|_| {
                    ConfigError::InvalidValue(
                        "EMBER_MAX_HISTORY".to_string(),
                        value.clone(),
                        "Must be a positive integer".to_string(),
                    )
                })?;
                if parsed == 0 {
                    return Err(ConfigError::InvalidRange(
                        "EMBER_MAX_HISTORY".to_string(),
                        "Must be at least 1".to_string(),
                    ));
                }
                parsed
            }
            Err(_) => DEFAULT_MAX_HISTORY,
        };

        Ok(Self {
            default_model: std::env::var("EMBER_DEFAULT_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            max_history,
            max_tokens: Self::parse_max_tokens()?,
            temperature: Self::parse_temperature()?,
            request_timeout: Duration::from_secs(Self::parse_secs(
                "EMBER_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            fragment_timeout: Duration::from_secs(Self::parse_secs(
                "EMBER_FRAGMENT_TIMEOUT_SECS",
                DEFAULT_FRAGMENT_TIMEOUT_SECS,
            )?),
            session_idle_timeout: Duration::from_secs(Self::parse_secs(
                "EMBER_SESSION_IDLE_TIMEOUT_SECS",
                DEFAULT_SESSION_IDLE_SECS,
            )?),
            keep_partial_turns: std::env::var("EMBER_KEEP_PARTIAL_TURNS")
                .map(|val| val == "1" || val.to_lowercase() == "true")
                .unwrap_or(false),
            system_prompt: std::env::var("EMBER_SYSTEM_PROMPT")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string()),
        })
    }

    fn parse_secs(var: &str, default: u64) -> Result<u64, ConfigError> {
        match std::env::var(var) {
            Ok(value) => {
                let parsed = value.parse::<u64>().map_err(|_| {
                    ConfigError::InvalidValue(
                        var.to_string(),
                        value.clone(),
                        "Must be a whole number of seconds".to_string(),
                    )
                })?;
                if parsed == 0 {
                    return Err(ConfigError::InvalidRange(
                        var.to_string(),
                        "Must be at least 1 second".to_string(),
                    ));
                }
                Ok(parsed)
            }
            Err(_) => Ok(default),
        }
    }

    fn parse_max_tokens() -> Result<Option<i32>, ConfigError> {
        match std::env::var("EMBER_MAX_TOKENS") {
            Ok(value) => {
                let parsed = value.parse::<i32>().map_err(|_| {
                    ConfigError::InvalidValue(
                        "EMBER_MAX_TOKENS".to_string(),
                        value.clone(),
                        "Must be an integer".to_string(),
                    )
                })?;
                if parsed <= 0 {
                    return Err(ConfigError::InvalidRange(
                        "EMBER_MAX_TOKENS".to_string(),
                        "Must be greater than zero".to_string(),
                    ));
                }
                Ok(Some(parsed))
            }
            Err(_) => Ok(None),
        }
    }

    fn parse_temperature() -> Result<Option<f32>, ConfigError> {
        match std::env::var("EMBER_TEMPERATURE") {
            Ok(value) => {
                let parsed = value.parse::<f32>().map_err(|_| {
                    ConfigError::InvalidValue(
                        "EMBER_TEMPERATURE".to_string(),
                        value.clone(),
                        "Must be a number".to_string(),
                    )
                })?;
                if !(0.0..=2.0).contains(&parsed) {
                    return Err(ConfigError::InvalidRange(
                        "EMBER_TEMPERATURE".to_string(),
                        "Must be between 0.0 and 2.0".to_string(),
                    ));
                }
                Ok(Some(parsed))
            }
            Err(_) => Ok(None),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            max_history: DEFAULT_MAX_HISTORY,
            max_tokens: None,
            temperature: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            fragment_timeout: Duration::from_secs(DEFAULT_FRAGMENT_TIMEOUT_SECS),
            session_idle_timeout: Duration::from_secs(DEFAULT_SESSION_IDLE_SECS),
            keep_partial_turns: false,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}
