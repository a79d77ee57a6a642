//! Running an MCP server handler on the selected transport.
//!
//! ```ignore
//! use fabulae_common::server::McpServerBuilder;
//! use fabulae_common::transport::Transport;
//!
//! McpServerBuilder::new(handler)
//!     .with_transport(Transport::http(8080))
//!     .run()
//!     .await?;
//! ```

use rmcp::{ServerHandler, ServiceExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::transport::Transport;

/// Path the streamable HTTP transport is mounted on.
pub const MCP_PATH: &str = "/mcp";

/// Errors that can occur when running an MCP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listen address
    #[error("Failed to bind {addr}: {message}")]
    BindFailed { addr: String, message: String },

    /// Transport error during communication
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs an rmcp `ServerHandler` until the client leaves or shutdown is requested.
pub struct McpServerBuilder<H> {
    handler: H,
    transport: Transport,
    shutdown: CancellationToken,
    listen_for_signals: bool,
}

impl<H> McpServerBuilder<H>
where
    H: ServerHandler + Clone + Send + Sync + 'static,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            transport: Transport::default(),
            shutdown: CancellationToken::new(),
            listen_for_signals: true,
        }
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Stop the server when `token` is cancelled instead of on SIGINT/SIGTERM.
    ///
    /// The same token can be handed to in-flight work so that it observes the
    /// shutdown too.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self.listen_for_signals = false;
        self
    }

    /// Serve until shutdown. Blocks the calling task.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(transport = %self.transport, "Starting MCP server");

        if self.listen_for_signals {
            let token = self.shutdown.clone();
            tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                token.cancel();
            });
        }

        match self.transport {
            Transport::Stdio => self.run_stdio().await,
            Transport::Http { addr } => self.run_http(addr).await,
        }
    }

    async fn run_stdio(self) -> Result<(), ServerError> {
        let service = self
            .handler
            .serve(rmcp::transport::io::stdio())
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        tokio::select! {
            result = service.waiting() => {
                result.map_err(|e| ServerError::Transport(e.to_string()))?;
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("Shutdown requested, stopping stdio server");
            }
        }
        Ok(())
    }

    async fn run_http(self, addr: std::net::SocketAddr) -> Result<(), ServerError> {
        use rmcp::transport::streamable_http_server::{
            StreamableHttpService, session::local::LocalSessionManager,
        };

        let handler = self.handler;
        let service = StreamableHttpService::new(
            move || Ok(handler.clone()),
            LocalSessionManager::default().into(),
            Default::default(),
        );
        let router = axum::Router::new().nest_service(MCP_PATH, service);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;
        tracing::info!(%addr, path = MCP_PATH, "HTTP server listening");

        let shutdown = self.shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Resolve on SIGINT or SIGTERM (Ctrl+C elsewhere).
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Signal handlers unavailable, falling back to Ctrl+C");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C");
}
