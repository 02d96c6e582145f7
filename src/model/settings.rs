use serde::{Deserialize, Serialize};

use crate::chat::Message;
use crate::error::{ChatError, Result};
use crate::model::catalog;

pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 1.5);
pub const TOP_P_RANGE: (f32, f32) = (0.0, 1.0);
pub const MAX_TOKENS_RANGE: (u32, u32) = (256, 8192);

/// Per-request sampling settings chosen by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: catalog::DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 1024,
        }
    }
}

impl GenerationConfig {
    /// Checks the numeric bounds and that a model id is present.
    ///
    /// Catalog membership is left to the caller so that other
    /// OpenAI-compatible endpoints can be targeted.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(ChatError::InvalidSettings("model must not be empty".into()));
        }
        check_range("temperature", self.temperature, TEMPERATURE_RANGE)?;
        check_range("top_p", self.top_p, TOP_P_RANGE)?;

        let (min, max) = MAX_TOKENS_RANGE;
        if !(min..=max).contains(&self.max_tokens) {
            return Err(ChatError::InvalidSettings(format!(
                "max_tokens must be within {}..={}, got {}",
                min, max, self.max_tokens
            )));
        }
        Ok(())
    }
}

fn check_range(name: &str, value: f32, (min, max): (f32, f32)) -> Result<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ChatError::InvalidSettings(format!(
            "{} must be within {}..={}, got {}",
            name, min, max, value
        )))
    }
}

/// Body of a streaming chat-completions request.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl<'a> ChatCompletionRequest<'a> {
    pub fn streaming(messages: &'a [Message], config: &'a GenerationConfig) -> Self {
        Self {
            model: &config.model,
            messages,
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            stream: true,
        }
    }
}
