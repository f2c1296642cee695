//! The uniform LLM surface the agent drives.
//!
//! Concrete wire protocols live outside the core; they plug in as
//! [`ProviderClient`] implementations. [`Provider`] wraps a client with the
//! behavior every provider shares: empty-message filtering, retry with
//! backoff on the blocking path, and the non-streaming fallback.
//!
//! Stream contract: the receiver is a finite sequence terminated by the
//! first `Complete` or `Error` event. Consumers must stop reading there and
//! must NOT wait for the channel to close; some backends hold it open during
//! cleanup.

pub mod mock;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crush_shared::{FinishReason, Message, ToolCall, ToolInfo};

use crate::config::ModelConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_creation_tokens: i64,
    pub cache_read_tokens: i64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub finish_reason: Option<FinishReason>,
}

/// Transport or protocol failure from a provider call.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub message: String,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
    pub canceled: bool,
}

impl ProviderError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            retry_after: None,
            canceled: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            retry_after: None,
            canceled: false,
        }
    }

    pub fn canceled() -> Self {
        Self {
            message: "canceled".into(),
            retryable: false,
            retry_after: None,
            canceled: true,
        }
    }

    pub fn with_retry_after(mut self, after: Duration) -> Self {
        self.retry_after = Some(after);
        self
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderError {}

#[derive(Debug, Clone)]
pub enum ProviderEvent {
    ContentStart,
    ContentDelta { content: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    ContentStop,
    ToolUseStart { tool_call: ToolCall },
    ToolUseDelta { tool_call_id: String, input: String },
    ToolUseStop { tool_call_id: String },
    Complete { response: ProviderResponse },
    Error { error: ProviderError },
    Warning { message: String },
}

impl ProviderEvent {
    /// Terminal events end the stream; the channel may stay open past them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn send(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolInfo>,
    ) -> Result<ProviderResponse, ProviderError>;

    fn stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolInfo>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<ProviderEvent>;

    fn model(&self) -> ModelConfig;
}

/// A configured provider: client + the shared behavior layered on top.
#[derive(Clone)]
pub struct Provider {
    id: String,
    client: Arc<dyn ProviderClient>,
    disable_streaming: bool,
}

impl Provider {
    pub fn new(id: impl Into<String>, client: Arc<dyn ProviderClient>, disable_streaming: bool) -> Self {
        Self {
            id: id.into(),
            client,
            disable_streaming,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> ModelConfig {
        self.client.model()
    }

    /// Blocking call with retry. Cancellation is never retried.
    pub async fn send_messages(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolInfo>,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        let messages = clean_messages(messages);
        retry::with_backoff(cancel, || {
            let messages = messages.clone();
            let tools = tools.clone();
            async move { self.client.send(messages, tools).await }
        })
        .await
    }

    /// Streaming call. With `disable_streaming` the blocking path runs
    /// underneath and exactly one terminal event is synthesized; the channel
    /// is intentionally left open afterwards, which consumers must tolerate.
    pub fn stream_response(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolInfo>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<ProviderEvent> {
        let messages = clean_messages(messages);
        if !self.disable_streaming {
            return self.client.stream(messages, tools, cancel);
        }

        let (tx, rx) = mpsc::channel(8);
        let client = self.client.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                result = client.send(messages, tools) => result,
                _ = cancel.cancelled() => Err(ProviderError::canceled()),
            };
            let event = match result {
                Ok(response) => ProviderEvent::Complete { response },
                Err(error) => ProviderEvent::Error { error },
            };
            if tx.send(event).await.is_err() {
                warn!("stream consumer went away before the synthesized terminal event");
            }
            // Mirror backends that emit the terminal event and then keep the
            // channel alive during cleanup.
            cancel.cancelled().await;
        });
        rx
    }
}

/// Messages with no parts carry nothing for the provider and are dropped.
fn clean_messages(messages: Vec<Message>) -> Vec<Message> {
    messages.into_iter().filter(|m| !m.parts.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::mock::ScriptedProvider;
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn disable_streaming_synthesizes_single_complete() {
        let client = Arc::new(ScriptedProvider::with_responses(vec![ProviderResponse {
            content: "hello".into(),
            finish_reason: Some(FinishReason::EndTurn),
            ..Default::default()
        }]));
        let provider = Provider::new("mock", client, true);

        let cancel = CancellationToken::new();
        let mut rx = provider.stream_response(vec![], vec![], cancel.clone());

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("terminal event must arrive")
            .expect("channel alive");
        match event {
            ProviderEvent::Complete { response } => {
                assert_eq!(response.content, "hello");
                assert_eq!(response.finish_reason, Some(FinishReason::EndTurn));
            }
            other => panic!("expected complete, got {other:?}"),
        }

        // The channel stays open; the consumer must not block on closure.
        let followup = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(followup.is_err(), "channel unexpectedly closed or re-sent");
        cancel.cancel();
    }

    #[tokio::test]
    async fn clean_messages_drops_empty() {
        let msgs = vec![
            Message {
                id: "a".into(),
                session_id: "s".into(),
                role: crush_shared::MessageRole::User,
                parts: vec![],
                model: String::new(),
                provider: String::new(),
                created_at: 0,
                updated_at: 0,
            },
        ];
        assert!(clean_messages(msgs).is_empty());
    }
}
