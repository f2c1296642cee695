//! Per-workspace wiring: one [`App`] owns the broker, store, services,
//! permission gate, tool registry, and agent for a single instance.
//!
//! The agent only depends on the seams (services, gate, registry, provider),
//! wired here at construction, so no component holds a back-reference to its
//! owner.

use std::sync::Arc;

use anyhow::{bail, Result};

use crush_shared::event::EventPayload;

use crate::agent::{Agent, AgentConfig};
use crate::config::{Config, ModelRole};
use crate::permission::PermissionService;
use crate::provider::mock::EchoClient;
use crate::provider::Provider;
use crate::pubsub::Subscription;
use crate::services::{EventBroker, FileService, MessageService, SessionService, TodoService};
use crate::status::StatusRegistry;
use crate::store::Store;
use crate::tools::clients::{ListLspsTool, ListMcpsTool, LspRestartTool, McpRestartTool};
use crate::tools::context::ContextTool;
use crate::tools::todo::{TodoDeleteTool, TodoListTool, TodoWriteTool};
use crate::tools::ToolRegistry;

/// Builds [`Provider`]s from config. Concrete LLM wire clients live outside
/// the core and plug in through this seam; the built-in factory only knows
/// the `mock` type.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, cfg: &Config, role: ModelRole) -> Result<Provider>;
}

pub struct DefaultProviderFactory;

impl ProviderFactory for DefaultProviderFactory {
    fn create(&self, cfg: &Config, role: ModelRole) -> Result<Provider> {
        let (provider_cfg, model_cfg) = cfg.resolve(role)?;
        match provider_cfg.kind.as_str() {
            "mock" => Ok(Provider::new(
                provider_cfg.id.clone(),
                Arc::new(EchoClient::new(model_cfg.clone())),
                provider_cfg.disable_streaming,
            )),
            other => bail!("provider type not supported: {other}"),
        }
    }
}

pub struct App {
    broker: EventBroker,
    store: Arc<Store>,
    pub sessions: SessionService,
    pub messages: MessageService,
    pub todos: TodoService,
    pub files: FileService,
    pub permissions: Arc<PermissionService>,
    pub status: Arc<StatusRegistry>,
    pub agent: Arc<Agent>,
    cfg: Config,
    factory: Arc<dyn ProviderFactory>,
}

impl App {
    pub fn new(cfg: Config, store: Arc<Store>, factory: Arc<dyn ProviderFactory>) -> Result<Self> {
        cfg.validate()?;

        let broker = EventBroker::new();
        let sessions = SessionService::new(store.clone(), broker.clone());
        let messages = MessageService::new(store.clone(), broker.clone());
        let todos = TodoService::new(store.clone());
        let files = FileService::new(store.clone(), broker.clone());
        let permissions = Arc::new(PermissionService::new(
            broker.clone(),
            cfg.permissions.skip_requests,
        ));

        let status = Arc::new(StatusRegistry::new(broker.clone()));

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(TodoWriteTool::new(todos.clone())));
        tools.register(Arc::new(TodoListTool::new(todos.clone())));
        tools.register(Arc::new(TodoDeleteTool::new(todos.clone())));
        tools.register(Arc::new(ContextTool::new(
            files.clone(),
            cfg.options.workspace.clone(),
            cfg.options.context_paths.clone(),
        )));
        tools.register(Arc::new(ListLspsTool::new(status.clone())));
        tools.register(Arc::new(ListMcpsTool::new(status.clone())));
        tools.register(Arc::new(LspRestartTool::new(
            status.clone(),
            cfg.options.workspace.clone(),
        )));
        tools.register(Arc::new(McpRestartTool::new(
            status.clone(),
            cfg.options.workspace.clone(),
        )));

        let provider = factory.create(&cfg, ModelRole::Large)?;
        let small_provider = factory.create(&cfg, ModelRole::Small)?;

        let agent = Agent::new(
            broker.clone(),
            sessions.clone(),
            messages.clone(),
            permissions.clone(),
            tools,
            provider,
            small_provider,
            AgentConfig {
                max_tokens: cfg.models.large.max_tokens,
                ..Default::default()
            },
        );

        Ok(Self {
            broker,
            store,
            sessions,
            messages,
            todos,
            files,
            permissions,
            status,
            agent,
            cfg,
            factory,
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn events(&self) -> Subscription<EventPayload> {
        self.broker.subscribe()
    }

    pub fn broker(&self) -> &EventBroker {
        &self.broker
    }

    /// Re-reads the configured model selection and swaps the agent's
    /// providers.
    pub fn update_agent_model(&self) -> Result<()> {
        let provider = self.factory.create(&self.cfg, ModelRole::Large)?;
        let small = self.factory.create(&self.cfg, ModelRole::Small)?;
        self.agent.update_model(provider, small);
        Ok(())
    }

    /// Cancels all agent work and closes the event stream. The store is
    /// dropped with the app.
    pub fn shutdown(&self) {
        self.agent.shutdown();
        self.broker.close();
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, ModelSelection, ProviderConfig, SelectedModel};

    fn mock_config() -> Config {
        let mut cfg = Config::default();
        cfg.providers.insert(
            "mock".into(),
            ProviderConfig {
                id: "mock".into(),
                kind: "mock".into(),
                models: vec![ModelConfig {
                    id: "test".into(),
                    context_window: 8192,
                    default_max_tokens: 1024,
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        cfg.models = ModelSelection {
            large: SelectedModel {
                provider: "mock".into(),
                model: "test".into(),
                max_tokens: None,
            },
            small: SelectedModel {
                provider: "mock".into(),
                model: "test".into(),
                max_tokens: None,
            },
        };
        cfg
    }

    #[tokio::test]
    async fn wires_builtin_tools_and_swaps_models() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let app = App::new(mock_config(), store, Arc::new(DefaultProviderFactory)).unwrap();

        assert_eq!(app.agent.model().id, "test");
        app.update_agent_model().unwrap();

        // Status changes reach event subscribers.
        let mut sub = app.events();
        app.status.update_lsp("rust-analyzer", "ready", None, 0).await;
        let ev = sub.recv().await.unwrap();
        assert!(matches!(
            ev.payload,
            crush_shared::event::EventPayload::LspEvent(_)
        ));

        app.shutdown();
    }

    #[test]
    fn unknown_provider_type_is_rejected() {
        let mut cfg = mock_config();
        cfg.providers.get_mut("mock").unwrap().kind = "galactic".into();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let err = match App::new(cfg, store, Arc::new(DefaultProviderFactory)) {
            Err(e) => e,
            Ok(_) => panic!("expected App::new to fail for unsupported provider type"),
        };
        assert!(err.to_string().contains("provider type not supported"));
    }
}
