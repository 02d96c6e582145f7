use std::env;

use log::warn;

use crate::chat::history::DEFAULT_SYSTEM_PROMPT;
use crate::error::{ChatError, Result};
use crate::model::{GenerationConfig, DEFAULT_BASE_URL};

// Runtime configuration read from the environment (and `.env`)
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub base_url: String,
    pub system_prompt: String,
    pub defaults: GenerationConfig,
    pub bind_addr: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Only the API key is required. Unparsable numbers fall back to the
    /// built-in defaults; values that parse but are out of range are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GROQ_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ChatError::Configuration(
                    "missing GROQ_API_KEY; add it to the environment or a .env file".into(),
                )
            })?;

        let builtin = GenerationConfig::default();
        let defaults = GenerationConfig {
            model: lookup("DEFAULT_MODEL").unwrap_or(builtin.model),
            temperature: parse_or("TEMPERATURE", &lookup, builtin.temperature),
            top_p: parse_or("TOP_P", &lookup, builtin.top_p),
            max_tokens: parse_or("MAX_TOKENS", &lookup, builtin.max_tokens),
        };
        defaults
            .validate()
            .map_err(|e| ChatError::Configuration(format!("default generation settings: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: lookup("GROQ_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            system_prompt: lookup("SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            defaults,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or("PORT", &lookup, 8080),
        })
    }
}

fn parse_or<T, F>(key: &str, lookup: &F, fallback: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}, using {}", key, raw, fallback);
            fallback
        }),
        None => fallback,
    }
}
