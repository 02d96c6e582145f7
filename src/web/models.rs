use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::{Message, TurnState};
use crate::error::{ChatError, Result};
use crate::model::{catalog, GenerationConfig};

/// Body of `POST /api/chat`. Omitted settings use the server defaults.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn generation_config(&self, defaults: &GenerationConfig) -> Result<GenerationConfig> {
        let config = GenerationConfig {
            model: self.model.clone().unwrap_or_else(|| defaults.model.clone()),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
        };
        if !catalog::is_known(&config.model) && config.model != defaults.model {
            return Err(ChatError::InvalidSettings(format!("unknown model {}", config.model)));
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: Uuid,
    pub state: TurnState,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
