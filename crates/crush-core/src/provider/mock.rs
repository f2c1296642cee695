//! Deterministic providers for tests and local runs.
//!
//! [`ScriptedProvider`] replays pre-recorded event sequences, one script per
//! turn. [`ManualProvider`] hands out receivers the test feeds by hand, for
//! scenarios that need precise interleaving (queueing, cancellation).
//! [`EchoClient`] backs the `mock` provider type so a configured workspace
//! works end to end without a real LLM.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crush_shared::message::TextContent;
use crush_shared::{ContentPart, FinishReason, Message, MessageRole, ToolCall, ToolInfo};

use super::{ProviderClient, ProviderError, ProviderEvent, ProviderResponse, TokenUsage};
use crate::config::ModelConfig;

fn test_model() -> ModelConfig {
    ModelConfig {
        id: "test".into(),
        name: "Test Model".into(),
        context_window: 8192,
        default_max_tokens: 1024,
        can_reason: false,
        cost_per_1m_in: 1.0,
        cost_per_1m_out: 2.0,
    }
}

/// One scripted provider turn: the events to replay on `stream`, in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub events: Vec<ProviderEvent>,
}

impl ScriptedTurn {
    /// A turn that streams `text` and finishes with `end_turn`.
    pub fn text(text: &str) -> Self {
        Self {
            events: vec![
                ProviderEvent::ContentStart,
                ProviderEvent::ContentDelta {
                    content: text.to_string(),
                },
                ProviderEvent::ContentStop,
                ProviderEvent::Complete {
                    response: ProviderResponse {
                        content: text.to_string(),
                        usage: TokenUsage {
                            input_tokens: 10,
                            output_tokens: 5,
                            ..Default::default()
                        },
                        finish_reason: Some(FinishReason::EndTurn),
                        ..Default::default()
                    },
                },
            ],
        }
    }

    /// A turn that requests one tool call, streaming its input in two deltas.
    pub fn tool_call(id: &str, name: &str, input: &str) -> Self {
        let (head, tail) = input.split_at(input.len() / 2);
        let call = ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input: input.to_string(),
            finished: true,
        };
        Self {
            events: vec![
                ProviderEvent::ToolUseStart {
                    tool_call: ToolCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        input: String::new(),
                        finished: false,
                    },
                },
                ProviderEvent::ToolUseDelta {
                    tool_call_id: id.to_string(),
                    input: head.to_string(),
                },
                ProviderEvent::ToolUseDelta {
                    tool_call_id: id.to_string(),
                    input: tail.to_string(),
                },
                ProviderEvent::ToolUseStop {
                    tool_call_id: id.to_string(),
                },
                ProviderEvent::Complete {
                    response: ProviderResponse {
                        tool_calls: vec![call],
                        usage: TokenUsage {
                            input_tokens: 10,
                            output_tokens: 5,
                            ..Default::default()
                        },
                        finish_reason: Some(FinishReason::ToolUse),
                        ..Default::default()
                    },
                },
            ],
        }
    }

    /// A turn that fails with a non-retryable provider error.
    pub fn error(message: &str) -> Self {
        Self {
            events: vec![ProviderEvent::Error {
                error: ProviderError::fatal(message),
            }],
        }
    }
}

/// Replays scripted turns. Each `stream`/`send` call consumes the next turn.
pub struct ScriptedProvider {
    model: ModelConfig,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    /// Keep the event channel open after the terminal event, imitating
    /// backends that emit `complete` and then linger.
    hold_open: bool,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            model: test_model(),
            turns: Mutex::new(turns.into()),
            hold_open: false,
        }
    }

    /// Scripted blocking responses, for `disable_streaming` setups.
    pub fn with_responses(responses: Vec<ProviderResponse>) -> Self {
        let turns = responses
            .into_iter()
            .map(|response| ScriptedTurn {
                events: vec![ProviderEvent::Complete { response }],
            })
            .collect();
        Self::new(turns)
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    fn next_turn(&self) -> ScriptedTurn {
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedTurn::error("scripted provider ran out of turns"))
    }
}

/// Folds a turn's events into the response `send` would have returned.
fn fold_events(events: &[ProviderEvent]) -> Result<ProviderResponse, ProviderError> {
    let mut response = ProviderResponse::default();
    for event in events {
        match event {
            ProviderEvent::ContentDelta { content } => response.content.push_str(content),
            ProviderEvent::Complete { response: complete } => {
                let mut merged = complete.clone();
                if merged.content.is_empty() {
                    merged.content = response.content.clone();
                }
                return Ok(merged);
            }
            ProviderEvent::Error { error } => return Err(error.clone()),
            _ => {}
        }
    }
    Err(ProviderError::fatal("script ended without a terminal event"))
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn send(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolInfo>,
    ) -> Result<ProviderResponse, ProviderError> {
        fold_events(&self.next_turn().events)
    }

    fn stream(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolInfo>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<ProviderEvent> {
        let turn = self.next_turn();
        let hold_open = self.hold_open;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for event in turn.events {
                if cancel.is_cancelled() {
                    return;
                }
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            if hold_open {
                cancel.cancelled().await;
            }
        });
        rx
    }

    fn model(&self) -> ModelConfig {
        self.model.clone()
    }
}

/// Streams whatever the test pushes through pre-registered channels, one
/// receiver per turn.
pub struct ManualProvider {
    model: ModelConfig,
    streams: Mutex<VecDeque<mpsc::Receiver<ProviderEvent>>>,
}

impl ManualProvider {
    /// Returns the provider plus one sender per requested turn.
    pub fn with_turns(count: usize) -> (Self, Vec<mpsc::Sender<ProviderEvent>>) {
        let mut senders = Vec::with_capacity(count);
        let mut streams = VecDeque::with_capacity(count);
        for _ in 0..count {
            let (tx, rx) = mpsc::channel(16);
            senders.push(tx);
            streams.push_back(rx);
        }
        (
            Self {
                model: test_model(),
                streams: Mutex::new(streams),
            },
            senders,
        )
    }
}

#[async_trait]
impl ProviderClient for ManualProvider {
    async fn send(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolInfo>,
    ) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::fatal("manual provider has no blocking path"))
    }

    fn stream(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolInfo>,
        _cancel: CancellationToken,
    ) -> mpsc::Receiver<ProviderEvent> {
        self.streams.lock().unwrap().pop_front().unwrap_or_else(|| {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(async move {
                let _ = tx
                    .send(ProviderEvent::Error {
                        error: ProviderError::fatal("manual provider ran out of turns"),
                    })
                    .await;
            });
            rx
        })
    }

    fn model(&self) -> ModelConfig {
        self.model.clone()
    }
}

/// The `mock` provider type: echoes the last user message back. Lets a
/// workspace configured with `"type": "mock"` run end to end.
pub struct EchoClient {
    model: ModelConfig,
}

impl EchoClient {
    pub fn new(model: ModelConfig) -> Self {
        Self { model }
    }

    fn reply(messages: &[Message]) -> ProviderResponse {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content().to_string())
            .unwrap_or_default();
        ProviderResponse {
            content: format!("echo: {last_user}"),
            usage: TokenUsage {
                input_tokens: last_user.len() as i64 / 4,
                output_tokens: last_user.len() as i64 / 4,
                ..Default::default()
            },
            finish_reason: Some(FinishReason::EndTurn),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ProviderClient for EchoClient {
    async fn send(
        &self,
        messages: Vec<Message>,
        _tools: Vec<ToolInfo>,
    ) -> Result<ProviderResponse, ProviderError> {
        Ok(Self::reply(&messages))
    }

    fn stream(
        &self,
        messages: Vec<Message>,
        _tools: Vec<ToolInfo>,
        _cancel: CancellationToken,
    ) -> mpsc::Receiver<ProviderEvent> {
        let response = Self::reply(&messages);
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx
                .send(ProviderEvent::ContentDelta {
                    content: response.content.clone(),
                })
                .await;
            let _ = tx.send(ProviderEvent::Complete { response }).await;
        });
        rx
    }

    fn model(&self) -> ModelConfig {
        self.model.clone()
    }
}

/// Helper for tests that just need a user message value.
pub fn user_message(session_id: &str, text: &str) -> Message {
    Message {
        id: "msg_user".into(),
        session_id: session_id.into(),
        role: MessageRole::User,
        parts: vec![ContentPart::Text(TextContent { text: text.into() })],
        model: String::new(),
        provider: String::new(),
        created_at: 0,
        updated_at: 0,
    }
}
