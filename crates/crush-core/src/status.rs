//! State tracking for the external LSP and MCP client stacks.
//!
//! The core never talks to language servers or MCP servers itself. The
//! embedding stacks report state changes here; the registry remembers the
//! latest state per client, publishes each change on the instance event
//! stream, and forwards restart requests through an injected seam.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crush_shared::event::{EventKind, EventPayload, LspEvent, McpEvent};

use crate::services::EventBroker;

pub const STATE_CHANGED: &str = "state_changed";

/// Restart hook implemented by the external client stack.
#[async_trait]
pub trait ClientRestarter: Send + Sync {
    async fn restart(&self, name: &str) -> Result<()>;
}

#[derive(Default)]
struct StatusState {
    lsps: BTreeMap<String, LspEvent>,
    mcps: BTreeMap<String, McpEvent>,
    lsp_restarter: Option<Arc<dyn ClientRestarter>>,
    mcp_restarter: Option<Arc<dyn ClientRestarter>>,
}

pub struct StatusRegistry {
    broker: EventBroker,
    state: Mutex<StatusState>,
}

impl StatusRegistry {
    pub fn new(broker: EventBroker) -> Self {
        Self {
            broker,
            state: Mutex::new(StatusState::default()),
        }
    }

    pub fn set_lsp_restarter(&self, restarter: Arc<dyn ClientRestarter>) {
        self.state.lock().unwrap().lsp_restarter = Some(restarter);
    }

    pub fn set_mcp_restarter(&self, restarter: Arc<dyn ClientRestarter>) {
        self.state.lock().unwrap().mcp_restarter = Some(restarter);
    }

    /// Records an LSP state change and publishes it.
    pub async fn update_lsp(
        &self,
        name: &str,
        state: &str,
        error: Option<String>,
        diagnostic_count: i64,
    ) {
        let event = LspEvent {
            kind: STATE_CHANGED.into(),
            name: name.to_string(),
            state: state.to_string(),
            error,
            diagnostic_count,
        };
        self.state
            .lock()
            .unwrap()
            .lsps
            .insert(name.to_string(), event.clone());
        self.broker
            .publish(EventKind::Updated, EventPayload::LspEvent(event))
            .await;
    }

    /// Records an MCP state change and publishes it.
    pub async fn update_mcp(&self, name: &str, state: &str, error: Option<String>) {
        let event = McpEvent {
            kind: STATE_CHANGED.into(),
            name: name.to_string(),
            state: state.to_string(),
            error,
        };
        self.state
            .lock()
            .unwrap()
            .mcps
            .insert(name.to_string(), event.clone());
        self.broker
            .publish(EventKind::Updated, EventPayload::McpEvent(event))
            .await;
    }

    pub fn lsps(&self) -> Vec<LspEvent> {
        self.state.lock().unwrap().lsps.values().cloned().collect()
    }

    pub fn mcps(&self) -> Vec<McpEvent> {
        self.state.lock().unwrap().mcps.values().cloned().collect()
    }

    pub async fn restart_lsp(&self, name: &str) -> Result<()> {
        let restarter = {
            let state = self.state.lock().unwrap();
            if !state.lsps.contains_key(name) {
                bail!("unknown LSP client {name:?}");
            }
            state.lsp_restarter.clone()
        };
        match restarter {
            Some(restarter) => restarter.restart(name).await,
            None => bail!("LSP restart functionality not available"),
        }
    }

    pub async fn restart_mcp(&self, name: &str) -> Result<()> {
        let restarter = {
            let state = self.state.lock().unwrap();
            if !state.mcps.contains_key(name) {
                bail!("unknown MCP server {name:?}");
            }
            state.mcp_restarter.clone()
        };
        match restarter {
            Some(restarter) => restarter.restart(name).await,
            None => bail!("MCP restart functionality not available"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRestarter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClientRestarter for CountingRestarter {
        async fn restart(&self, _name: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn updates_publish_and_snapshot() {
        let broker = EventBroker::new();
        let registry = StatusRegistry::new(broker.clone());
        let mut sub = broker.subscribe();

        registry.update_lsp("rust-analyzer", "ready", None, 3).await;
        registry
            .update_mcp("filesystem", "error", Some("spawn failed".into()))
            .await;

        let lsps = registry.lsps();
        assert_eq!(lsps.len(), 1);
        assert_eq!(lsps[0].state, "ready");
        assert_eq!(lsps[0].diagnostic_count, 3);

        let mcps = registry.mcps();
        assert_eq!(mcps.len(), 1);
        assert_eq!(mcps[0].error.as_deref(), Some("spawn failed"));

        let first = sub.recv().await.unwrap();
        assert!(matches!(first.payload, EventPayload::LspEvent(_)));
        let second = sub.recv().await.unwrap();
        assert!(matches!(second.payload, EventPayload::McpEvent(_)));
    }

    #[tokio::test]
    async fn restart_requires_known_client_and_hook() {
        let registry = StatusRegistry::new(EventBroker::new());
        assert!(registry.restart_lsp("gopls").await.is_err());

        registry.update_lsp("gopls", "ready", None, 0).await;
        let err = registry.restart_lsp("gopls").await.unwrap_err();
        assert!(err.to_string().contains("not available"));

        let restarter = Arc::new(CountingRestarter {
            calls: AtomicUsize::new(0),
        });
        registry.set_lsp_restarter(restarter.clone());
        registry.restart_lsp("gopls").await.unwrap();
        assert_eq!(restarter.calls.load(Ordering::SeqCst), 1);
    }
}
