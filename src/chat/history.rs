use crate::chat::{Message, Role};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Append-only conversation log sent as context with every request.
///
/// The first message is always the system prompt.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::with_system_prompt(DEFAULT_SYSTEM_PROMPT)
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::new(Role::System, prompt)],
        }
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    /// Everything after the system prompt.
    pub fn transcript(&self) -> &[Message] {
        &self.messages[1..]
    }

    pub fn system_prompt(&self) -> &str {
        &self.messages[0].content
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    // Never true: the system prompt is always present.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
