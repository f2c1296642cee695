//! The local RPC server: binds a per-user endpoint (Unix socket, named pipe,
//! or TCP), serves the `/v1` surface, and owns the instance registry.

pub mod error;
pub mod instances;
pub mod net;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tracing::info;

use crush_core::app::ProviderFactory;
use crush_shared::host::HostUrl;

use instances::InstanceManager;
use net::LocalListener;
use routes::{build_router, ServerState};

/// How long graceful shutdown may drain before the server is forced closed.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Server {
    state: ServerState,
}

impl Server {
    pub fn new(factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            state: ServerState {
                instances: Arc::new(InstanceManager::new(factory)),
                shutdown: Arc::new(Notify::new()),
            },
        }
    }

    pub fn state(&self) -> ServerState {
        self.state.clone()
    }

    /// Asks a running server to stop, same as `POST /v1/control`.
    pub fn request_shutdown(&self) {
        self.state.shutdown.notify_one();
    }

    pub async fn listen_and_serve(&self, host: &HostUrl) -> Result<()> {
        let listener = LocalListener::bind(host.scheme, &host.address).await?;
        info!(host = %host, "server listening");
        self.serve(listener).await
    }

    /// Serves until an OS signal or a control-endpoint shutdown, then drains
    /// with a bounded timeout and tears the instances down.
    pub async fn serve(&self, listener: LocalListener) -> Result<()> {
        let app = build_router(self.state.clone());

        let stop = Arc::new(Notify::new());
        let stop_for_serve = stop.clone();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    stop_for_serve.notified().await;
                })
                .await
        });

        tokio::select! {
            _ = shutdown_signal() => info!("shutdown signal received"),
            _ = self.state.shutdown.notified() => info!("shutdown requested"),
        }

        self.state.instances.shutdown_all();
        stop.notify_one();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task).await {
            Ok(result) => result??,
            Err(_) => info!("graceful shutdown timed out, forcing close"),
        }

        info!("server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
