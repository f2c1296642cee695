//! The per-workspace agent: serializes turns per session, streams provider
//! events into persisted messages, dispatches tool calls, and reports
//! terminal states on the instance event stream.

pub mod prompt;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crush_shared::event::{EventKind, EventPayload};
use crush_shared::message::{BinaryContent, TextContent, ToolResult};
use crush_shared::{
    AgentEvent, Attachment, ContentPart, CreateMessageParams, FinishReason, Message, MessageRole,
    ToolCall, ToolResponse,
};

use crate::config::ModelConfig;
use crate::permission::PermissionService;
use crate::provider::{Provider, ProviderEvent, TokenUsage};
use crate::services::{provider_history, EventBroker, MessageService, SessionService};
use crate::tools::{ToolCtx, ToolError, ToolRegistry};

/// How often streamed deltas are flushed to the store mid-turn.
const PERSIST_DEBOUNCE: Duration = Duration::from_millis(150);

/// Fraction of the context window at which auto-summarization kicks in.
const SUMMARIZE_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub system_prompt: String,
    pub prompt_prefix: String,
    pub max_tokens: Option<i64>,
}

#[derive(Debug, Clone)]
struct QueuedPrompt {
    prompt: String,
    attachments: Vec<Attachment>,
}

#[derive(Default)]
struct AgentState {
    active: HashMap<String, CancellationToken>,
    queues: HashMap<String, VecDeque<QueuedPrompt>>,
}

pub struct Agent {
    broker: EventBroker,
    sessions: SessionService,
    messages: MessageService,
    permissions: Arc<PermissionService>,
    tools: ToolRegistry,
    provider: RwLock<Provider>,
    small_provider: RwLock<Provider>,
    cfg: AgentConfig,
    state: Mutex<AgentState>,
    shutdown: CancellationToken,
}

enum StreamEnd {
    Complete { usage: TokenUsage, reason: FinishReason },
    Errored(String),
    Canceled,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: EventBroker,
        sessions: SessionService,
        messages: MessageService,
        permissions: Arc<PermissionService>,
        tools: ToolRegistry,
        provider: Provider,
        small_provider: Provider,
        cfg: AgentConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker,
            sessions,
            messages,
            permissions,
            tools,
            provider: RwLock::new(provider),
            small_provider: RwLock::new(small_provider),
            cfg,
            state: Mutex::new(AgentState::default()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn model(&self) -> ModelConfig {
        self.provider.read().unwrap().model()
    }

    /// Swaps the providers in place, e.g. after a config change.
    pub fn update_model(&self, provider: Provider, small_provider: Provider) {
        *self.provider.write().unwrap() = provider;
        *self.small_provider.write().unwrap() = small_provider;
        info!(model = %self.model().id, "agent model updated");
    }

    pub fn is_busy(&self) -> bool {
        !self.state.lock().unwrap().active.is_empty()
    }

    pub fn is_session_busy(&self, session_id: &str) -> bool {
        self.state.lock().unwrap().active.contains_key(session_id)
    }

    pub fn queued_prompts(&self, session_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(session_id)
            .map_or(0, VecDeque::len)
    }

    pub fn clear_queue(&self, session_id: &str) {
        self.state.lock().unwrap().queues.remove(session_id);
    }

    /// Cancels the active turn of a session, if any. The queue is left
    /// untouched; use [`Agent::clear_queue`] to discard it.
    pub fn cancel(&self, session_id: &str) {
        let token = self
            .state
            .lock()
            .unwrap()
            .active
            .get(session_id)
            .cloned();
        if let Some(token) = token {
            info!(session_id, "canceling active turn");
            token.cancel();
        }
    }

    /// Cancels everything and drops queued prompts. The agent is unusable
    /// afterwards.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let mut state = self.state.lock().unwrap();
        for token in state.active.values() {
            token.cancel();
        }
        state.queues.clear();
    }

    /// Submits a prompt. Busy session → the prompt is queued and the
    /// returned channel immediately yields a `queued` event; otherwise the
    /// turn starts and the channel yields its terminal event.
    pub async fn run(
        self: &Arc<Self>,
        session_id: &str,
        prompt: String,
        attachments: Vec<Attachment>,
    ) -> Result<mpsc::Receiver<AgentEvent>> {
        anyhow::ensure!(
            !prompt.trim().is_empty() || !attachments.is_empty(),
            "prompt is empty"
        );
        anyhow::ensure!(!self.shutdown.is_cancelled(), "agent is shut down");

        // Empty id means "start a fresh session"; unknown ids are an error.
        let session_id = if session_id.is_empty() {
            self.sessions.create("New Session").await?.id
        } else {
            self.sessions.require(session_id)?.id
        };

        let (tx, rx) = mpsc::channel(1);
        let queued = QueuedPrompt {
            prompt,
            attachments,
        };

        // Busy check and enqueue happen under one lock so a finishing turn
        // can never slip between them and strand the prompt.
        let started = {
            let mut state = self.state.lock().unwrap();
            if state.active.contains_key(&session_id) {
                state
                    .queues
                    .entry(session_id.clone())
                    .or_default()
                    .push_back(queued);
                None
            } else {
                let cancel = self.shutdown.child_token();
                state.active.insert(session_id.clone(), cancel.clone());
                Some((cancel, queued))
            }
        };

        match started {
            None => {
                debug!(session_id, "session busy, prompt queued");
                let event = AgentEvent::queued(session_id);
                self.broker
                    .publish(EventKind::Created, EventPayload::AgentEvent(event.clone()))
                    .await;
                let _ = tx.try_send(event);
            }
            Some((cancel, queued)) => {
                let agent = self.clone();
                tokio::spawn(async move {
                    agent
                        .run_turn(session_id, queued.prompt, queued.attachments, cancel, Some(tx))
                        .await;
                });
            }
        }

        Ok(rx)
    }

    /// One full turn plus post-turn bookkeeping: session rollup, queue
    /// dequeue, and the auto-summarize check.
    ///
    /// Returns a manually boxed future (rather than `async fn`) because
    /// `finish_session` spawns a new call to `run_turn`; rustc cannot
    /// resolve the resulting self-referential opaque type when auto-trait
    /// (`Send`) leakage is involved, so the future is boxed to break the
    /// cycle.
    fn run_turn(
        self: Arc<Self>,
        session_id: String,
        prompt: String,
        attachments: Vec<Attachment>,
        cancel: CancellationToken,
        reply: Option<mpsc::Sender<AgentEvent>>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            let result = self
                .process_prompt(&session_id, &prompt, attachments, &cancel)
                .await;

            let event = match result {
                Ok(message) => AgentEvent::response(message),
                Err(e) => {
                    error!(session_id, error = %e, "turn failed");
                    AgentEvent::error(session_id.clone(), e.to_string())
                }
            };

            self.broker
                .publish(EventKind::Created, EventPayload::AgentEvent(event.clone()))
                .await;
            if let Some(reply) = reply {
                let _ = reply.try_send(event);
            }

            // Release provider-side tasks parked on this turn's token.
            cancel.cancel();

            self.finish_session(&session_id).await;
        })
    }

    /// Unmarks the session busy and starts exactly one queued prompt (FIFO).
    async fn finish_session(self: &Arc<Self>, session_id: &str) {
        let next = {
            let mut state = self.state.lock().unwrap();
            state.active.remove(session_id);
            if self.shutdown.is_cancelled() {
                None
            } else {
                let next = state
                    .queues
                    .get_mut(session_id)
                    .and_then(VecDeque::pop_front);
                if next.is_some() {
                    let cancel = self.shutdown.child_token();
                    state.active.insert(session_id.to_string(), cancel.clone());
                    next.map(|p| (p, cancel))
                } else {
                    None
                }
            }
        };

        if let Some((queued, cancel)) = next {
            debug!(session_id, "starting queued prompt");
            let agent = self.clone();
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                agent
                    .run_turn(session_id, queued.prompt, queued.attachments, cancel, None)
                    .await;
            });
        }
    }

    async fn process_prompt(
        self: &Arc<Self>,
        session_id: &str,
        prompt: &str,
        attachments: Vec<Attachment>,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        let session = self.sessions.require(session_id)?;
        let first_prompt = session.message_count == 0;

        let mut parts: Vec<ContentPart> = vec![ContentPart::Text(TextContent {
            text: prompt.to_string(),
        })];
        for attachment in attachments {
            parts.push(ContentPart::Binary(BinaryContent {
                path: attachment.file_path,
                mime_type: attachment.mime_type,
                data: attachment.content,
            }));
        }
        self.messages
            .create(
                session_id,
                CreateMessageParams {
                    role: MessageRole::User,
                    parts,
                    model: String::new(),
                    provider: String::new(),
                },
            )
            .await?;

        if first_prompt {
            let agent = self.clone();
            let session_id = session_id.to_string();
            let prompt = prompt.to_string();
            tokio::spawn(async move {
                agent.generate_title(&session_id, &prompt).await;
            });
        }

        let mut turn_usage = TokenUsage::default();
        let final_message = loop {
            let provider = self.provider.read().unwrap().clone();
            let mut history = vec![self.system_message(session_id)];
            history.extend(provider_history(self.messages.list(session_id)?));

            let mut stream =
                provider.stream_response(history, self.tools.infos(), cancel.clone());

            let mut assistant = self
                .messages
                .create(
                    session_id,
                    CreateMessageParams {
                        role: MessageRole::Assistant,
                        parts: vec![],
                        model: provider.model().id,
                        provider: provider.id().to_string(),
                    },
                )
                .await?;

            let end = self
                .consume_stream(&mut stream, &mut assistant, cancel)
                .await?;

            match end {
                StreamEnd::Canceled => {
                    assistant.add_finish(FinishReason::Canceled, String::new(), String::new());
                    break self.messages.update(&assistant).await?;
                }
                StreamEnd::Errored(message) => {
                    assistant.add_finish(FinishReason::Error, message, String::new());
                    break self.messages.update(&assistant).await?;
                }
                StreamEnd::Complete { usage, reason } => {
                    turn_usage.add(&usage);
                    assistant.finish_thinking();
                    assistant.add_finish(reason, String::new(), String::new());
                    let assistant = self.messages.update(&assistant).await?;

                    let calls: Vec<ToolCall> = assistant
                        .finished_tool_calls()
                        .into_iter()
                        .cloned()
                        .collect();
                    if reason != FinishReason::ToolUse || calls.is_empty() {
                        break assistant;
                    }

                    let (results, stop) =
                        self.dispatch_tools(session_id, &assistant.id, calls, cancel).await;
                    if !results.is_empty() {
                        self.messages
                            .create(
                                session_id,
                                CreateMessageParams {
                                    role: MessageRole::Tool,
                                    parts: results
                                        .into_iter()
                                        .map(ContentPart::ToolResult)
                                        .collect(),
                                    model: String::new(),
                                    provider: String::new(),
                                },
                            )
                            .await?;
                    }

                    if let Some(stop_reason) = stop {
                        let mut assistant = assistant;
                        assistant.add_finish(stop_reason, String::new(), String::new());
                        break self.messages.update(&assistant).await?;
                    }
                    // Tool results recorded; loop for the next provider turn.
                }
            }
        };

        self.rollup_session(session_id, &turn_usage).await?;
        Ok(final_message)
    }

    /// Reads provider events until the first terminal event. The channel is
    /// deliberately never drained to closure: `complete`/`error` end the
    /// stream even when the producer holds the channel open.
    async fn consume_stream(
        &self,
        stream: &mut mpsc::Receiver<ProviderEvent>,
        assistant: &mut Message,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd> {
        let mut last_persist = tokio::time::Instant::now();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Ok(StreamEnd::Canceled),
                event = stream.recv() => event,
            };

            let Some(event) = event else {
                // Producer vanished without a terminal event: protocol error.
                return Ok(StreamEnd::Errored(
                    "provider stream ended without a terminal event".into(),
                ));
            };

            let mut force_persist = false;
            match event {
                ProviderEvent::ContentStart | ProviderEvent::ContentStop => {}
                ProviderEvent::ContentDelta { content } => assistant.append_content(&content),
                ProviderEvent::ThinkingDelta { thinking } => assistant.append_reasoning(&thinking),
                ProviderEvent::SignatureDelta { signature } => {
                    assistant.append_reasoning_signature(&signature)
                }
                ProviderEvent::ToolUseStart { tool_call } => {
                    assistant.add_tool_call(tool_call);
                    force_persist = true;
                }
                ProviderEvent::ToolUseDelta {
                    tool_call_id,
                    input,
                } => assistant.append_tool_call_input(&tool_call_id, &input),
                ProviderEvent::ToolUseStop { tool_call_id } => {
                    assistant.finish_tool_call(&tool_call_id);
                    force_persist = true;
                }
                ProviderEvent::Warning { message } => {
                    warn!(message, "provider warning");
                }
                ProviderEvent::Complete { response } => {
                    // Non-streamed completions carry everything here.
                    if assistant.content().is_empty() && !response.content.is_empty() {
                        assistant.append_content(&response.content);
                    }
                    for call in &response.tool_calls {
                        assistant.add_tool_call(call.clone());
                    }
                    return Ok(StreamEnd::Complete {
                        usage: response.usage,
                        reason: response.finish_reason.unwrap_or(FinishReason::Unknown),
                    });
                }
                ProviderEvent::Error { error } => {
                    if error.canceled {
                        return Ok(StreamEnd::Canceled);
                    }
                    return Ok(StreamEnd::Errored(error.message));
                }
            }

            if force_persist || last_persist.elapsed() >= PERSIST_DEBOUNCE {
                *assistant = self.messages.update(assistant).await?;
                last_persist = tokio::time::Instant::now();
            }
        }
    }

    /// Runs the assistant's finished tool calls in order. Returns the
    /// results plus an optional stop reason (cancellation or denial); an
    /// ordinary tool failure is inline in its result and does not stop the
    /// loop.
    async fn dispatch_tools(
        &self,
        session_id: &str,
        message_id: &str,
        calls: Vec<ToolCall>,
        cancel: &CancellationToken,
    ) -> (Vec<ToolResult>, Option<FinishReason>) {
        let ctx = ToolCtx::new(
            session_id.to_string(),
            message_id.to_string(),
            cancel.clone(),
            self.permissions.clone(),
        );

        let mut results = Vec::with_capacity(calls.len());
        let mut stop = None;

        for (index, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                stop = Some(FinishReason::Canceled);
                self.push_skipped(&mut results, &calls[index..], "canceled");
                break;
            }

            match self.run_tool(&ctx, call).await {
                Ok(response) => results.push(tool_result(call, response)),
                Err(ToolError::PermissionDenied) => {
                    results.push(tool_result(call, ToolResponse::error("permission denied")));
                    stop = Some(FinishReason::PermissionDenied);
                    self.push_skipped(&mut results, &calls[index + 1..], "skipped: a previous tool call was denied");
                    break;
                }
                Err(ToolError::Canceled) => {
                    stop = Some(FinishReason::Canceled);
                    self.push_skipped(&mut results, &calls[index..], "canceled");
                    break;
                }
                Err(ToolError::Fatal(e)) => {
                    results.push(tool_result(call, ToolResponse::error(e.to_string())));
                }
            }
        }

        (results, stop)
    }

    fn push_skipped(&self, results: &mut Vec<ToolResult>, remaining: &[ToolCall], note: &str) {
        for call in remaining {
            if results.iter().any(|r| r.tool_call_id == call.id) {
                continue;
            }
            results.push(tool_result(call, ToolResponse::error(note)));
        }
    }

    async fn run_tool(&self, ctx: &ToolCtx, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        let Some(tool) = self.tools.get(&call.name) else {
            return Ok(ToolResponse::error(format!("unknown tool: {}", call.name)));
        };
        if !call.input.trim().is_empty() {
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&call.input) {
                return Ok(ToolResponse::error(format!("invalid tool input: {e}")));
            }
        }
        tool.run(ctx, call.clone()).await
    }

    fn system_message(&self, session_id: &str) -> Message {
        let mut text = String::new();
        if !self.cfg.prompt_prefix.is_empty() {
            text.push_str(&self.cfg.prompt_prefix);
            text.push_str("\n\n");
        }
        text.push_str(if self.cfg.system_prompt.is_empty() {
            prompt::DEFAULT_SYSTEM_PROMPT
        } else {
            &self.cfg.system_prompt
        });

        Message {
            id: String::new(),
            session_id: session_id.to_string(),
            role: MessageRole::System,
            parts: vec![ContentPart::Text(TextContent { text })],
            model: String::new(),
            provider: String::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Post-turn session rollup: token counts and cost, then the
    /// auto-summarize check.
    async fn rollup_session(self: &Arc<Self>, session_id: &str, usage: &TokenUsage) -> Result<()> {
        let model = self.model();
        let mut session = self.sessions.require(session_id)?;
        session.prompt_tokens += usage.input_tokens + usage.cache_read_tokens;
        session.completion_tokens += usage.output_tokens;
        session.cost += usage.input_tokens as f64 / 1_000_000.0 * model.cost_per_1m_in
            + usage.output_tokens as f64 / 1_000_000.0 * model.cost_per_1m_out;
        let session = self.sessions.save(&session).await?;

        let window = model.context_window;
        if window > 0
            && session.summary_message_id.is_none()
            && (session.prompt_tokens + session.completion_tokens) as f64
                > window as f64 * SUMMARIZE_THRESHOLD
        {
            info!(session_id, "context window near capacity, scheduling summarization");
            let agent = self.clone();
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = agent.summarize(&session_id).await {
                    warn!(session_id, error = %e, "auto-summarization failed");
                }
            });
        }
        Ok(())
    }

    /// Fire-and-forget title turn against the small model; failures are
    /// swallowed.
    async fn generate_title(self: &Arc<Self>, session_id: &str, prompt: &str) {
        let provider = self.small_provider.read().unwrap().clone();
        let history = vec![
            system_text_message(session_id, prompt::TITLE_SYSTEM_PROMPT),
            user_text_message(session_id, prompt),
        ];

        match provider
            .send_messages(history, vec![], &self.shutdown)
            .await
        {
            Ok(response) => {
                let title = prompt::clean_title(&response.content);
                if title.is_empty() {
                    return;
                }
                let Ok(Some(mut session)) = self.sessions.get(session_id) else {
                    return;
                };
                session.title = title;
                if let Err(e) = self.sessions.save(&session).await {
                    debug!(session_id, error = %e, "failed to store generated title");
                }
            }
            Err(e) => debug!(session_id, error = %e, "title generation failed"),
        }
    }

    /// Summarizes a session into a new child session whose first assistant
    /// message is the summary. Progress is reported as `summarize` agent
    /// events; the final one has `done` set and carries the child session id.
    pub async fn summarize(self: &Arc<Self>, session_id: &str) -> Result<()> {
        let session = self.sessions.require(session_id)?;

        let cancel = {
            let mut state = self.state.lock().unwrap();
            anyhow::ensure!(
                !state.active.contains_key(session_id),
                "session is busy"
            );
            let cancel = self.shutdown.child_token();
            state.active.insert(session_id.to_string(), cancel.clone());
            cancel
        };

        let agent = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let result = agent
                .summarize_task(&session_id, &session.title, &cancel)
                .await;
            if let Err(e) = result {
                error!(session_id, error = %e, "summarization failed");
                agent
                    .publish_agent_event(AgentEvent::error(session_id.clone(), e.to_string()))
                    .await;
            }
            cancel.cancel();
            agent.finish_session(&session_id).await;
        });
        Ok(())
    }

    async fn summarize_task(
        self: &Arc<Self>,
        session_id: &str,
        title: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.publish_agent_event(AgentEvent::summarize(session_id, "Starting summarization...", false))
            .await;

        let mut history = vec![system_text_message(session_id, prompt::SUMMARY_SYSTEM_PROMPT)];
        history.extend(provider_history(self.messages.list(session_id)?));
        history.push(user_text_message(session_id, prompt::SUMMARY_USER_PROMPT));

        self.publish_agent_event(AgentEvent::summarize(session_id, "Analyzing conversation...", false))
            .await;

        let provider = self.small_provider.read().unwrap().clone();
        let response = provider
            .send_messages(history, vec![], cancel)
            .await
            .context("summary model call failed")?;
        anyhow::ensure!(!response.content.is_empty(), "summary model returned no content");

        self.publish_agent_event(AgentEvent::summarize(session_id, "Creating summary session...", false))
            .await;

        let child = self
            .sessions
            .create_child(&format!("Summary of {title}"), session_id)
            .await?;
        let mut summary = self
            .messages
            .create(
                &child.id,
                CreateMessageParams {
                    role: MessageRole::Assistant,
                    parts: vec![ContentPart::Text(TextContent {
                        text: response.content,
                    })],
                    model: provider.model().id,
                    provider: provider.id().to_string(),
                },
            )
            .await?;
        summary.add_finish(FinishReason::EndTurn, String::new(), String::new());
        let summary = self.messages.update(&summary).await?;

        let mut parent = self.sessions.require(session_id)?;
        parent.summary_message_id = Some(summary.id.clone());
        self.sessions.save(&parent).await?;

        let mut done = AgentEvent::summarize(child.id.clone(), "Summarization complete", true);
        done.message = Some(summary);
        self.publish_agent_event(done).await;
        Ok(())
    }

    async fn publish_agent_event(&self, event: AgentEvent) {
        self.broker
            .publish(EventKind::Created, EventPayload::AgentEvent(event))
            .await;
    }
}

fn tool_result(call: &ToolCall, response: ToolResponse) -> ToolResult {
    ToolResult {
        tool_call_id: call.id.clone(),
        name: call.name.clone(),
        content: response.content,
        metadata: response.metadata,
        is_error: response.is_error,
    }
}

fn system_text_message(session_id: &str, text: &str) -> Message {
    Message {
        id: String::new(),
        session_id: session_id.to_string(),
        role: MessageRole::System,
        parts: vec![ContentPart::Text(TextContent { text: text.into() })],
        model: String::new(),
        provider: String::new(),
        created_at: 0,
        updated_at: 0,
    }
}

fn user_text_message(session_id: &str, text: &str) -> Message {
    Message {
        id: String::new(),
        session_id: session_id.to_string(),
        role: MessageRole::User,
        parts: vec![ContentPart::Text(TextContent { text: text.into() })],
        model: String::new(),
        provider: String::new(),
        created_at: 0,
        updated_at: 0,
    }
}
