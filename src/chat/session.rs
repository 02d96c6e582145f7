//! One interactive chat session: owns the history and runs turns.

use futures::StreamExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chat::{ConversationHistory, Role};
use crate::error::{ChatError, Result};
use crate::model::stream::{DecodeStats, StreamChunk, StreamDecoder};
use crate::model::{ChatCompletionRequest, ChatTransport, GenerationConfig};

/// Appended to partial replies while the stream is still open.
pub const CURSOR: char = '▌';

/// What the presentation layer sees during a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TurnEvent {
    Partial { text: String },
    Final { text: String },
    Failed { error: String },
}

pub trait Publisher {
    fn publish(&mut self, event: TurnEvent);
}

impl Publisher for Vec<TurnEvent> {
    fn publish(&mut self, event: TurnEvent) {
        self.push(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    /// User message committed, waiting for the response headers.
    Requesting,
    Streaming,
}

/// How a successful stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEnd {
    Sentinel,
    EndOfStream,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: Uuid,
    pub content: String,
    pub end: TurnEnd,
    pub stats: DecodeStats,
}

pub struct ChatSession<T> {
    id: Uuid,
    transport: T,
    history: ConversationHistory,
    state: TurnState,
}

impl<T: ChatTransport> ChatSession<T> {
    pub fn new(transport: T) -> Self {
        Self::with_history(transport, ConversationHistory::new())
    }

    pub fn with_history(transport: T, history: ConversationHistory) -> Self {
        let id = Uuid::new_v4();
        info!("Starting chat session {}", id);
        Self {
            id,
            transport,
            history,
            state: TurnState::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Drops the conversation and starts over with the same system prompt.
    pub fn restart(&mut self) {
        let system_prompt = self.history.system_prompt().to_string();
        self.history = ConversationHistory::with_system_prompt(system_prompt);
        self.id = Uuid::new_v4();
        self.state = TurnState::Idle;
        info!("Restarted chat session as {}", self.id);
    }

    /// Runs one turn: commits the prompt, streams the reply to `publisher`,
    /// and commits the reply once the stream ends.
    ///
    /// On failure or cancellation the partial reply is dropped and no
    /// assistant message is committed. The user message stays, unless the
    /// token was already cancelled before the turn began.
    pub async fn submit<P: Publisher>(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        cancel: &CancellationToken,
        publisher: &mut P,
    ) -> Result<TurnOutcome> {
        if prompt.trim().is_empty() {
            return Err(ChatError::EmptyPrompt);
        }
        config.validate()?;
        if cancel.is_cancelled() {
            let err = ChatError::Cancelled;
            publisher.publish(TurnEvent::Failed { error: err.to_string() });
            return Err(err);
        }

        let turn_id = Uuid::new_v4();
        self.history.append(Role::User, prompt);
        info!(
            "Turn {} in session {}: model {}, {} messages of context",
            turn_id,
            self.id,
            config.model,
            self.history.len()
        );
        debug!("Prompt: {}", prompt);

        let result = self.stream_reply(config, cancel, publisher).await;
        self.state = TurnState::Idle;

        match result {
            Ok((content, end, stats)) => {
                if stats.skipped > 0 {
                    warn!("Turn {} skipped {} undecodable stream lines", turn_id, stats.skipped);
                }
                info!(
                    "Turn {} finished ({:?}): {} characters from {} deltas",
                    turn_id,
                    end,
                    content.len(),
                    stats.deltas
                );
                publisher.publish(TurnEvent::Final { text: content.clone() });
                self.history.append(Role::Assistant, content.clone());
                Ok(TurnOutcome {
                    turn_id,
                    content,
                    end,
                    stats,
                })
            }
            Err(e) => {
                warn!("Turn {} failed: {}", turn_id, e);
                publisher.publish(TurnEvent::Failed { error: e.to_string() });
                Err(e)
            }
        }
    }

    async fn stream_reply<P: Publisher>(
        &mut self,
        config: &GenerationConfig,
        cancel: &CancellationToken,
        publisher: &mut P,
    ) -> Result<(String, TurnEnd, DecodeStats)> {
        self.state = TurnState::Requesting;
        let request = ChatCompletionRequest::streaming(self.history.snapshot(), config);
        let mut lines = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            opened = self.transport.open_stream(&request) => opened?,
        };
        self.state = TurnState::Streaming;

        let mut decoder = StreamDecoder::new();
        let mut reply = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChatError::Cancelled),
                next = lines.next() => next,
            };
            let line = match next {
                Some(line) => line?,
                None => break,
            };

            match decoder.push_line(&line) {
                Some(StreamChunk::Delta(text)) => {
                    reply.push_str(&text);
                    publisher.publish(TurnEvent::Partial {
                        text: format!("{}{}", reply, CURSOR),
                    });
                }
                Some(StreamChunk::Done) => break,
                None => {}
            }
        }

        let end = if decoder.is_finished() {
            TurnEnd::Sentinel
        } else {
            TurnEnd::EndOfStream
        };
        Ok((reply, end, decoder.stats()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use futures::stream;
    use serde_json::Value;

    use super::*;
    use crate::chat::Message;
    use crate::model::LineStream;

    const HELLO: [&str; 3] = [
        r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
        "data: [DONE]",
    ];

    fn as_lines(lines: &[&str]) -> Vec<Result<Vec<u8>>> {
        lines.iter().map(|l| Ok(l.as_bytes().to_vec())).collect()
    }

    /// Replays a fixed response and records every request body.
    #[derive(Clone, Default)]
    struct ScriptedTransport {
        lines: Vec<&'static str>,
        requests: Arc<Mutex<Vec<Value>>>,
    }

    impl ScriptedTransport {
        fn replying(lines: &[&'static str]) -> Self {
            Self {
                lines: lines.to_vec(),
                ..Default::default()
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn open_stream(&self, request: &ChatCompletionRequest<'_>) -> Result<LineStream> {
            self.requests
                .lock()
                .unwrap()
                .push(serde_json::to_value(request).unwrap());
            Ok(Box::pin(stream::iter(as_lines(&self.lines))))
        }
    }

    struct RejectingTransport;

    #[async_trait]
    impl ChatTransport for RejectingTransport {
        async fn open_stream(&self, _: &ChatCompletionRequest<'_>) -> Result<LineStream> {
            Err(ChatError::Status {
                status: 503,
                body: "service unavailable".into(),
            })
        }
    }

    /// Sends one delta, then fails mid-stream.
    struct BrokenStreamTransport;

    #[async_trait]
    impl ChatTransport for BrokenStreamTransport {
        async fn open_stream(&self, _: &ChatCompletionRequest<'_>) -> Result<LineStream> {
            let mut items = as_lines(&HELLO[..1]);
            items.push(Err(ChatError::Status {
                status: 502,
                body: "connection reset".into(),
            }));
            Ok(Box::pin(stream::iter(items)))
        }
    }

    /// Sends one delta, then never produces another line.
    struct StalledTransport;

    #[async_trait]
    impl ChatTransport for StalledTransport {
        async fn open_stream(&self, _: &ChatCompletionRequest<'_>) -> Result<LineStream> {
            Ok(Box::pin(stream::iter(as_lines(&HELLO[..1])).chain(stream::pending())))
        }
    }

    /// Cancels the turn as soon as the first partial arrives.
    struct CancelOnFirstPartial {
        token: CancellationToken,
        events: Vec<TurnEvent>,
    }

    impl Publisher for CancelOnFirstPartial {
        fn publish(&mut self, event: TurnEvent) {
            if matches!(event, TurnEvent::Partial { .. }) {
                self.token.cancel();
            }
            self.events.push(event);
        }
    }

    #[tokio::test]
    async fn hello_turn_commits_user_and_assistant() {
        let mut session = ChatSession::new(ScriptedTransport::replying(&HELLO));
        let before = session.history().len();
        let mut events: Vec<TurnEvent> = Vec::new();

        let outcome = session
            .submit("Say hello", &GenerationConfig::default(), &CancellationToken::new(), &mut events)
            .await
            .unwrap();

        assert_eq!(outcome.content, "Hello");
        assert_eq!(outcome.end, TurnEnd::Sentinel);
        assert_eq!(session.history().len(), before + 2);
        assert_eq!(
            session.history().snapshot().last(),
            Some(&Message::new(Role::Assistant, "Hello"))
        );
        assert_eq!(
            events,
            vec![
                TurnEvent::Partial { text: "Hel▌".into() },
                TurnEvent::Partial { text: "Hello▌".into() },
                TurnEvent::Final { text: "Hello".into() },
            ]
        );
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn request_carries_full_history_and_settings() {
        let transport = ScriptedTransport::replying(&HELLO);
        let mut session = ChatSession::new(transport.clone());
        let config = GenerationConfig {
            model: "gemma2-9b-it".into(),
            temperature: 1.0,
            top_p: 0.5,
            max_tokens: 2048,
        };
        let cancel = CancellationToken::new();

        session.submit("first", &config, &cancel, &mut Vec::<TurnEvent>::new()).await.unwrap();
        session.submit("second", &config, &cancel, &mut Vec::<TurnEvent>::new()).await.unwrap();

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1];
        assert_eq!(second["model"], "gemma2-9b-it");
        assert_eq!(second["top_p"], 0.5);
        assert_eq!(second["max_tokens"], 2048);
        assert_eq!(second["stream"], true);

        let roles: Vec<&str> = second["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(second["messages"][3]["content"], "second");
    }

    #[tokio::test]
    async fn empty_stream_commits_empty_reply() {
        let mut session = ChatSession::new(ScriptedTransport::replying(&["data: [DONE]"]));
        let mut events: Vec<TurnEvent> = Vec::new();

        let outcome = session
            .submit("anything?", &GenerationConfig::default(), &CancellationToken::new(), &mut events)
            .await
            .unwrap();

        assert_eq!(outcome.content, "");
        assert_eq!(events, vec![TurnEvent::Final { text: String::new() }]);
        assert_eq!(session.history().snapshot()[2], Message::new(Role::Assistant, ""));
    }

    #[tokio::test]
    async fn malformed_lines_are_counted_not_fatal() {
        let lines = [
            "not json",
            r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#,
            "data: [DONE]",
        ];
        let mut session = ChatSession::new(ScriptedTransport::replying(&lines));

        let outcome = session
            .submit("hey", &GenerationConfig::default(), &CancellationToken::new(), &mut Vec::<TurnEvent>::new())
            .await
            .unwrap();

        assert_eq!(outcome.content, "Hi");
        assert_eq!(outcome.stats.skipped, 1);
    }

    #[tokio::test]
    async fn stream_without_sentinel_still_commits() {
        let mut session = ChatSession::new(ScriptedTransport::replying(&HELLO[..2]));

        let outcome = session
            .submit("hi", &GenerationConfig::default(), &CancellationToken::new(), &mut Vec::<TurnEvent>::new())
            .await
            .unwrap();

        assert_eq!(outcome.content, "Hello");
        assert_eq!(outcome.end, TurnEnd::EndOfStream);
    }

    #[tokio::test]
    async fn rejected_request_reports_error_and_commits_no_reply() {
        let mut session = ChatSession::new(RejectingTransport);
        let mut events: Vec<TurnEvent> = Vec::new();

        let err = session
            .submit("hello?", &GenerationConfig::default(), &CancellationToken::new(), &mut events)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Status { status: 503, .. }));
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history().snapshot()[1].role, Role::User);
        assert_eq!(session.state(), TurnState::Idle);
        assert!(matches!(events.as_slice(), [TurnEvent::Failed { error }] if error.contains("503")));
    }

    #[tokio::test]
    async fn mid_stream_failure_discards_partial_reply() {
        let mut session = ChatSession::new(BrokenStreamTransport);
        let mut events: Vec<TurnEvent> = Vec::new();

        let result = session
            .submit("hello?", &GenerationConfig::default(), &CancellationToken::new(), &mut events)
            .await;

        assert!(result.is_err());
        assert!(session
            .history()
            .snapshot()
            .iter()
            .all(|m| m.role != Role::Assistant));
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], TurnEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn cancellation_aborts_stalled_stream() {
        let token = CancellationToken::new();
        let mut session = ChatSession::new(StalledTransport);
        let mut publisher = CancelOnFirstPartial {
            token: token.clone(),
            events: Vec::new(),
        };

        let err = session
            .submit("hello?", &GenerationConfig::default(), &token, &mut publisher)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Cancelled));
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.state(), TurnState::Idle);
        assert_eq!(
            publisher.events.last(),
            Some(&TurnEvent::Failed { error: "turn cancelled".into() })
        );
    }

    #[tokio::test]
    async fn blank_prompt_and_bad_settings_leave_history_alone() {
        let transport = ScriptedTransport::replying(&HELLO);
        let mut session = ChatSession::new(transport.clone());
        let cancel = CancellationToken::new();

        let err = session
            .submit("   ", &GenerationConfig::default(), &cancel, &mut Vec::<TurnEvent>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::EmptyPrompt));

        let config = GenerationConfig { max_tokens: 10, ..Default::default() };
        let err = session.submit("hi", &config, &cancel, &mut Vec::<TurnEvent>::new()).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidSettings(_)));

        assert_eq!(session.history().len(), 1);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn turn_cancelled_before_start_touches_nothing() {
        let transport = ScriptedTransport::replying(&HELLO);
        let mut session = ChatSession::new(transport.clone());
        let token = CancellationToken::new();
        token.cancel();

        let mut events: Vec<TurnEvent> = Vec::new();
        let err = session
            .submit("hi", &GenerationConfig::default(), &token, &mut events)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Cancelled));
        assert_eq!(events, vec![TurnEvent::Failed { error: "turn cancelled".into() }]);
        assert_eq!(session.history().len(), 1);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn restart_keeps_system_prompt_only() {
        let history = ConversationHistory::with_system_prompt("talk like a pirate");
        let mut session = ChatSession::with_history(ScriptedTransport::replying(&HELLO), history);
        let first_id = session.id();
        session
            .submit("ahoy", &GenerationConfig::default(), &CancellationToken::new(), &mut Vec::<TurnEvent>::new())
            .await
            .unwrap();

        session.restart();

        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history().system_prompt(), "talk like a pirate");
        assert_ne!(session.id(), first_id);
    }
}
