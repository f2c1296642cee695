//! Entity services: store CRUD plus event publication.
//!
//! Components never write to the store or the broker ad hoc; they go through
//! these services so every durable change is observable on the instance
//! event stream. Todos deliberately have no stream tag; they are read back
//! by the todo tools instead.

use std::sync::Arc;

use anyhow::{Context, Result};

use crush_shared::event::{EventKind, EventPayload};
use crush_shared::{CreateMessageParams, FileRecord, Message, Session, Todo, TodoStatus};

use crate::pubsub::Broker;
use crate::store::{self, Store};

pub type EventBroker = Broker<EventPayload>;

#[derive(Clone)]
pub struct SessionService {
    store: Arc<Store>,
    broker: EventBroker,
}

impl SessionService {
    pub fn new(store: Arc<Store>, broker: EventBroker) -> Self {
        Self { store, broker }
    }

    pub async fn create(&self, title: &str) -> Result<Session> {
        let session = {
            let conn = self.store.conn();
            store::sessions::create(&conn, title, None)?
        };
        self.broker
            .publish(EventKind::Created, EventPayload::Session(session.clone()))
            .await;
        Ok(session)
    }

    /// Creates a child session that will hold a summary of `parent_id`.
    pub async fn create_child(&self, title: &str, parent_id: &str) -> Result<Session> {
        let session = {
            let conn = self.store.conn();
            store::sessions::create(&conn, title, Some(parent_id))?
        };
        self.broker
            .publish(EventKind::Created, EventPayload::Session(session.clone()))
            .await;
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.store.conn();
        store::sessions::get(&conn, id)
    }

    pub fn require(&self, id: &str) -> Result<Session> {
        self.get(id)?
            .with_context(|| format!("session {id:?} not found"))
    }

    pub fn list(&self) -> Result<Vec<Session>> {
        let conn = self.store.conn();
        store::sessions::list(&conn)
    }

    pub async fn save(&self, session: &Session) -> Result<Session> {
        let saved = {
            let conn = self.store.conn();
            store::sessions::save(&conn, session)?
        };
        self.broker
            .publish(EventKind::Updated, EventPayload::Session(saved.clone()))
            .await;
        Ok(saved)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let deleted = {
            let conn = self.store.conn();
            let Some(session) = store::sessions::get(&conn, id)? else {
                return Ok(false);
            };
            store::sessions::delete(&conn, id)?;
            session
        };
        self.broker
            .publish(EventKind::Deleted, EventPayload::Session(deleted))
            .await;
        Ok(true)
    }
}

#[derive(Clone)]
pub struct MessageService {
    store: Arc<Store>,
    broker: EventBroker,
}

impl MessageService {
    pub fn new(store: Arc<Store>, broker: EventBroker) -> Self {
        Self { store, broker }
    }

    pub async fn create(&self, session_id: &str, params: CreateMessageParams) -> Result<Message> {
        let message = {
            let conn = self.store.conn();
            let message = store::messages::create(
                &conn,
                session_id,
                params.role,
                &params.parts,
                &params.model,
                &params.provider,
            )?;
            store::sessions::bump_message_count(&conn, session_id, 1)?;
            message
        };
        self.broker
            .publish(EventKind::Created, EventPayload::Message(message.clone()))
            .await;
        Ok(message)
    }

    pub async fn update(&self, message: &Message) -> Result<Message> {
        let updated = {
            let conn = self.store.conn();
            store::messages::update_parts(&conn, message)?
        };
        self.broker
            .publish(EventKind::Updated, EventPayload::Message(updated.clone()))
            .await;
        Ok(updated)
    }

    pub fn get(&self, id: &str) -> Result<Option<Message>> {
        let conn = self.store.conn();
        store::messages::get(&conn, id)
    }

    pub fn list(&self, session_id: &str) -> Result<Vec<Message>> {
        let conn = self.store.conn();
        store::messages::list_by_session(&conn, session_id)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let deleted = {
            let conn = self.store.conn();
            let Some(message) = store::messages::get(&conn, id)? else {
                return Ok(false);
            };
            store::messages::delete(&conn, id)?;
            store::sessions::bump_message_count(&conn, &message.session_id, -1)?;
            message
        };
        self.broker
            .publish(EventKind::Deleted, EventPayload::Message(deleted))
            .await;
        Ok(true)
    }
}

#[derive(Clone)]
pub struct TodoService {
    store: Arc<Store>,
}

impl TodoService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn create(&self, session_id: &str, content: &str, status: TodoStatus) -> Result<Todo> {
        let conn = self.store.conn();
        store::todos::create(&conn, session_id, content, status)
    }

    pub fn update(&self, id: &str, content: &str, status: TodoStatus) -> Result<Option<Todo>> {
        let conn = self.store.conn();
        store::todos::update(&conn, id, content, status)
    }

    pub fn list(&self, session_id: &str, status: Option<TodoStatus>) -> Result<Vec<Todo>> {
        let conn = self.store.conn();
        store::todos::list_by_session(&conn, session_id, status)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.store.conn();
        store::todos::delete(&conn, id)
    }
}

#[derive(Clone)]
pub struct FileService {
    store: Arc<Store>,
    broker: EventBroker,
}

impl FileService {
    pub fn new(store: Arc<Store>, broker: EventBroker) -> Self {
        Self { store, broker }
    }

    pub async fn create_version(
        &self,
        session_id: &str,
        path: &str,
        content: &str,
    ) -> Result<FileRecord> {
        let record = {
            let conn = self.store.conn();
            store::files::create_version(&conn, session_id, path, content)?
        };
        self.broker
            .publish(EventKind::Created, EventPayload::File(record.clone()))
            .await;
        Ok(record)
    }

    pub fn latest(&self, session_id: &str, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.store.conn();
        store::files::latest(&conn, session_id, path)
    }

    pub fn list(&self, session_id: &str) -> Result<Vec<FileRecord>> {
        let conn = self.store.conn();
        store::files::list_by_session(&conn, session_id)
    }
}

/// Empty messages must not reach the provider: an assistant message with no
/// text and no finished tool call contributes nothing to the next turn.
pub fn prunable(message: &Message) -> bool {
    let has_text = !message.content().is_empty();
    let has_finished_call = !message.finished_tool_calls().is_empty();
    let has_results = !message.tool_results().is_empty();
    match message.role {
        crush_shared::MessageRole::Assistant => !has_text && !has_finished_call,
        _ => message.parts.is_empty() && !has_results,
    }
}

/// History cleanup before a provider call: drops empty messages and strips
/// interrupted (unfinished) tool calls, which providers refuse to continue
/// from.
pub fn provider_history(messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .map(|mut m| {
            let calls: Vec<_> = m
                .tool_calls()
                .into_iter()
                .filter(|tc| tc.finished)
                .cloned()
                .collect();
            m.set_tool_calls(calls);
            m
        })
        .filter(|m| !prunable(m))
        .collect()
}
