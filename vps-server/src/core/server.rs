//! Server Implementation
//!
//! HTTP 服务器启动和管理

use crate::api;
use crate::core::{BackgroundTasks, Config, ServerState};
use shared::{AppError, AppResult};
use tokio_util::sync::CancellationToken;

/// HTTP Server
pub struct Server {
    config: Config,
    state: Option<ServerState>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create server with existing state (state must share `shutdown`)
    pub fn with_state(config: Config, state: ServerState, shutdown: CancellationToken) -> Self {
        Self {
            config,
            state: Some(state),
            shutdown,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until ctrl-c or the shutdown token fires, then drain background work.
    pub async fn run(&self) -> AppResult<()> {
        let state = match &self.state {
            Some(s) => s.clone(),
            None => ServerState::initialize(&self.config, self.shutdown.clone()).await?,
        };

        let mut tasks = BackgroundTasks::with_token(self.shutdown.clone());
        state.start_background_tasks(&mut tasks).await;

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::internal(format!("Failed to bind {addr}: {e}")))?;
        tracing::info!(%addr, environment = %self.config.environment, "🦀 VPS server listening");

        let token = self.shutdown.clone();
        let shutdown = async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down..."),
                _ = token.cancelled() => {}
            }
            token.cancel();
        };

        axum::serve(listener, api::build_app(state.clone()))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| AppError::internal(format!("HTTP server error: {e}")))?;

        tasks.shutdown().await;
        state.orders.shutdown(self.config.shutdown_timeout).await;
        tracing::info!("Server stopped");
        Ok(())
    }
}
