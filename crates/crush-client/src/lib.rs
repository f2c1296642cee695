//! Typed client for the crush local RPC server: one method per endpoint,
//! plus the SSE decoder that rebuilds typed events.

mod bootstrap;
mod http;
mod sse;

pub use bootstrap::ensure_server;
pub use sse::EventStream;

use anyhow::Result;
use hyper::Method;

use crush_shared::host::{default_host, parse_host_url};
use crush_shared::instance::Instance as InstanceSpec;
use crush_shared::{
    AgentInfo, AgentMessage, AgentSession, Attachment, FileRecord, Message, PermissionAction,
    PermissionGrant, PermissionRequest, PermissionSkipRequest, Session,
};

use http::Transport;

pub struct Client {
    transport: Transport,
    host: String,
}

impl Client {
    /// Connects to `scheme://address`; see [`default_host`] for the default.
    pub fn new(host: &str) -> Result<Self> {
        let parsed = parse_host_url(host).map_err(anyhow::Error::msg)?;
        Ok(Self {
            transport: Transport::new(parsed.scheme, parsed.address),
            host: host.to_string(),
        })
    }

    pub fn default_client() -> Result<Self> {
        Self::new(&default_host())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    // --- Server-level ---

    pub async fn health(&self) -> Result<()> {
        self.transport.roundtrip(Method::GET, "/health", None).await?;
        Ok(())
    }

    pub async fn version_info(&self) -> Result<crush_shared::version::VersionInfo> {
        let bytes = self.transport.roundtrip(Method::GET, "/version", None).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn global_config(&self) -> Result<serde_json::Value> {
        let bytes = self.transport.roundtrip(Method::GET, "/config", None).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn shutdown_server(&self) -> Result<()> {
        self.transport
            .roundtrip(
                Method::POST,
                "/control",
                Some(serde_json::json!({"command": "shutdown"})),
            )
            .await?;
        Ok(())
    }

    // --- Instances ---

    pub async fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceSpec> {
        let bytes = self
            .transport
            .roundtrip(Method::POST, "/instances", Some(serde_json::to_value(spec)?))
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn list_instances(&self) -> Result<Vec<InstanceSpec>> {
        let bytes = self.transport.roundtrip(Method::GET, "/instances", None).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn get_instance(&self, id: &str) -> Result<InstanceSpec> {
        let bytes = self
            .transport
            .roundtrip(Method::GET, &format!("/instances/{id}"), None)
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn delete_instance(&self, id: &str) -> Result<()> {
        self.transport
            .roundtrip(Method::DELETE, &format!("/instances/{id}"), None)
            .await?;
        Ok(())
    }

    pub async fn instance_config(&self, id: &str) -> Result<serde_json::Value> {
        let bytes = self
            .transport
            .roundtrip(Method::GET, &format!("/instances/{id}/config"), None)
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Subscribes to the instance's event stream.
    pub async fn events(&self, id: &str) -> Result<EventStream> {
        let response = self
            .transport
            .send(Method::GET, &format!("/instances/{id}/events"), None)
            .await?;
        EventStream::start(response)
    }

    // --- Sessions ---

    pub async fn sessions(&self, id: &str) -> Result<Vec<Session>> {
        let bytes = self
            .transport
            .roundtrip(Method::GET, &format!("/instances/{id}/sessions"), None)
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn create_session(&self, id: &str, title: &str) -> Result<Session> {
        let bytes = self
            .transport
            .roundtrip(
                Method::POST,
                &format!("/instances/{id}/sessions"),
                Some(serde_json::json!({"title": title})),
            )
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn session(&self, id: &str, sid: &str) -> Result<Session> {
        let bytes = self
            .transport
            .roundtrip(Method::GET, &format!("/instances/{id}/sessions/{sid}"), None)
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn messages(&self, id: &str, sid: &str) -> Result<Vec<Message>> {
        let bytes = self
            .transport
            .roundtrip(
                Method::GET,
                &format!("/instances/{id}/sessions/{sid}/messages"),
                None,
            )
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn session_history(&self, id: &str, sid: &str) -> Result<Vec<FileRecord>> {
        let bytes = self
            .transport
            .roundtrip(
                Method::GET,
                &format!("/instances/{id}/sessions/{sid}/history"),
                None,
            )
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // --- Agent ---

    pub async fn agent_info(&self, id: &str) -> Result<AgentInfo> {
        let bytes = self
            .transport
            .roundtrip(Method::GET, &format!("/instances/{id}/agent"), None)
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Fire-and-forget prompt submission; watch the event stream for the
    /// outcome.
    pub async fn run_agent(
        &self,
        id: &str,
        session_id: &str,
        prompt: &str,
        attachments: Vec<Attachment>,
    ) -> Result<()> {
        let message = AgentMessage {
            session_id: session_id.to_string(),
            prompt: prompt.to_string(),
            attachments,
        };
        self.transport
            .roundtrip(
                Method::POST,
                &format!("/instances/{id}/agent"),
                Some(serde_json::to_value(&message)?),
            )
            .await?;
        Ok(())
    }

    pub async fn update_agent_model(&self, id: &str) -> Result<()> {
        self.transport
            .roundtrip(Method::POST, &format!("/instances/{id}/agent/update"), None)
            .await?;
        Ok(())
    }

    pub async fn agent_session(&self, id: &str, sid: &str) -> Result<AgentSession> {
        let bytes = self
            .transport
            .roundtrip(
                Method::GET,
                &format!("/instances/{id}/agent/sessions/{sid}"),
                None,
            )
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn cancel_session(&self, id: &str, sid: &str) -> Result<()> {
        self.transport
            .roundtrip(
                Method::POST,
                &format!("/instances/{id}/agent/sessions/{sid}/cancel"),
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn queued_prompts(&self, id: &str, sid: &str) -> Result<usize> {
        let bytes = self
            .transport
            .roundtrip(
                Method::GET,
                &format!("/instances/{id}/agent/sessions/{sid}/prompts/queued"),
                None,
            )
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn clear_prompts(&self, id: &str, sid: &str) -> Result<()> {
        self.transport
            .roundtrip(
                Method::POST,
                &format!("/instances/{id}/agent/sessions/{sid}/prompts/clear"),
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn summarize_session(&self, id: &str, sid: &str) -> Result<()> {
        self.transport
            .roundtrip(
                Method::POST,
                &format!("/instances/{id}/agent/sessions/{sid}/summarize"),
                None,
            )
            .await?;
        Ok(())
    }

    // --- Permissions ---

    pub async fn skip_requests(&self, id: &str) -> Result<bool> {
        let bytes = self
            .transport
            .roundtrip(Method::GET, &format!("/instances/{id}/permissions/skip"), None)
            .await?;
        let skip: PermissionSkipRequest = serde_json::from_slice(&bytes)?;
        Ok(skip.skip)
    }

    pub async fn set_skip_requests(&self, id: &str, skip: bool) -> Result<()> {
        self.transport
            .roundtrip(
                Method::POST,
                &format!("/instances/{id}/permissions/skip"),
                Some(serde_json::to_value(PermissionSkipRequest { skip })?),
            )
            .await?;
        Ok(())
    }

    pub async fn grant_permission(
        &self,
        id: &str,
        permission: PermissionRequest,
        action: PermissionAction,
    ) -> Result<()> {
        self.transport
            .roundtrip(
                Method::POST,
                &format!("/instances/{id}/permissions/grant"),
                Some(serde_json::to_value(PermissionGrant { permission, action })?),
            )
            .await?;
        Ok(())
    }
}
