pub mod catalog;
pub mod settings;
pub mod stream;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use log::{debug, info};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;

use crate::error::{ChatError, Result};
pub use settings::{ChatCompletionRequest, GenerationConfig};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai";
const COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Raw response lines, in arrival order. Consumed exactly once.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Opens a streaming chat completion.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open_stream(&self, request: &ChatCompletionRequest<'_>) -> Result<LineStream>;
}

// Client for an OpenAI-compatible chat-completions endpoint
pub struct GroqClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl GroqClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("Using chat-completions endpoint at: {}{}", base_url, COMPLETIONS_PATH);

        Self {
            api_key: api_key.into(),
            base_url,
            client: Client::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, COMPLETIONS_PATH)
    }
}

#[async_trait]
impl ChatTransport for GroqClient {
    async fn open_stream(&self, request: &ChatCompletionRequest<'_>) -> Result<LineStream> {
        info!(
            "Sending request with model: {}, messages: {}, max_tokens: {}",
            request.model,
            request.messages.len(),
            request.max_tokens
        );
        debug!(
            "Payload: {}",
            serde_json::to_string(request).unwrap_or_else(|e| format!("<unserializable: {}>", e))
        );

        let response = self
            .client
            .post(self.endpoint())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Box::pin(stream::split_lines(response.bytes_stream())))
    }
}

#[async_trait]
impl<T: ChatTransport + ?Sized> ChatTransport for Box<T> {
    async fn open_stream(&self, request: &ChatCompletionRequest<'_>) -> Result<LineStream> {
        (**self).open_stream(request).await
    }
}
