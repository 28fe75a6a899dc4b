//! Server state and HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::auth::AuthGate;
use crate::config::RelayConfig;
use crate::ip_filter::IpFilter;
use crate::push::PushDispatcher;
use crate::registry::ConnectionRegistry;
use crate::session::SessionArbiter;

/// Shared state accessible by all request and connection handlers.
pub struct SharedState {
    pub config: RelayConfig,
    pub auth: AuthGate,
    /// user id -> live connection
    pub registry: Arc<ConnectionRegistry>,
    pub arbiter: SessionArbiter,
    pub dispatcher: PushDispatcher,
    pub ip_filter: IpFilter,
    pub started_at: Instant,
}

impl SharedState {
    /// Build state from configuration. Fails if the signing secret is
    /// missing.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let secret = config.secret()?;
        let auth = AuthGate::new(secret);
        let registry = Arc::new(ConnectionRegistry::new());
        let ip_filter = IpFilter::new(config.subnet_prefixes());
        Ok(Self {
            auth,
            arbiter: SessionArbiter::new(Arc::clone(&registry)),
            dispatcher: PushDispatcher::new(Arc::clone(&registry)),
            registry,
            ip_filter,
            started_at: Instant::now(),
            config,
        })
    }
}

pub struct Server {
    state: Arc<SharedState>,
}

impl Server {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let state = SharedState::new(config)?;
        Ok(Self {
            state: Arc::new(state),
        })
    }

    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    /// Run the server until Ctrl-C, then close every live session.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        tracing::info!("Push relay listening on {addr}");
        tracing::info!("  Push endpoint: POST http://{addr}/push");
        tracing::info!("  WebSocket: ws://{addr}/ws");
        if self.state.ip_filter.is_enabled() {
            tracing::info!(
                prefixes = ?self.state.config.subnet_prefixes(),
                "IP filter enabled for /push"
            );
        }

        let state = Arc::clone(&self.state);
        let router = crate::web::router(Arc::clone(&self.state));
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            let closed = state.registry.shutdown();
            tracing::info!(closed, "Shutting down, closed live sessions");
        })
        .await
        .context("HTTP server error")?;
        Ok(())
    }

    /// Start the server and return the bound address + task handle (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(self.state.config.listen_addr()).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");

        let router = crate::web::router(self.state);
        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;
            Ok(())
        });

        Ok((addr, handle))
    }
}
