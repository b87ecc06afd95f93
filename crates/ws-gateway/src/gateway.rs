//! Gateway builder and runner

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::TokenVerifier;
use crate::connection::DEFAULT_QUEUE_CAPACITY;
use crate::handler::{self, ConnectionSettings, GatewayState};
use crate::manager::ConnectionManager;

/// Gateway configuration and runner
pub struct Gateway {
    port: u16,
    verifier: Arc<dyn TokenVerifier>,
    connection_manager: ConnectionManager,
    settings: ConnectionSettings,
    cleanup_interval: Duration,
    enable_stats: bool,
    routes: Option<Router>,
}

impl Gateway {
    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Handle for business code to push events through.
    ///
    /// Clones share state with the running gateway.
    pub fn connections(&self) -> ConnectionManager {
        self.connection_manager.clone()
    }

    /// Serve extra routes (already given their state) alongside the gateway.
    ///
    /// For routes whose handlers need [`connections`](Self::connections),
    /// which only exists once the gateway is built.
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes = Some(match self.routes.take() {
            Some(existing) => existing.merge(routes),
            None => routes,
        });
        self
    }

    /// The full router: health, WebSocket endpoint, stats and any extra routes
    pub fn router(&self) -> Router {
        let state = GatewayState {
            connection_manager: self.connection_manager.clone(),
            verifier: self.verifier.clone(),
            settings: self.settings,
        };

        let mut app = Router::new()
            .route("/health", get(|| async { "OK" }))
            .route("/ready", get(|| async { "READY" }))
            .route("/ws", get(handler::ws_connect));

        if self.enable_stats {
            app = app.route("/api/stats", get(handler::get_stats));
        }

        let mut app = app.with_state(state);
        if let Some(routes) = &self.routes {
            app = app.merge(routes.clone());
        }

        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
    }

    /// Run the gateway server until Ctrl+C or SIGTERM
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        let cancel = CancellationToken::new();
        let cancel_for_signal = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel_for_signal.cancel();
        });

        self.serve(listener, cancel).await
    }

    /// Serve on an already bound listener until `cancel` fires
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(
            instance_id = %self.connection_manager.instance_id(),
            verifier = self.verifier.name(),
            "Starting WS Gateway"
        );

        // Start cleanup task
        let cleanup_manager = self.connection_manager.clone();
        let cleanup_cancel = cancel.clone();
        let cleanup_interval = self.cleanup_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            loop {
                tokio::select! {
                    _ = cleanup_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let cleaned = cleanup_manager.cleanup_dead_connections();
                        tracing::debug!(
                            connections = cleanup_manager.connection_count(),
                            identities = cleanup_manager.identity_count(),
                            topics = cleanup_manager.topic_count(),
                            cleaned,
                            "Connection cleanup"
                        );
                    }
                }
            }
        });

        let app = self.router();
        let manager = self.connection_manager.clone();
        let shutdown = async move {
            cancel.cancelled().await;
            let closing = manager.disconnect_all();
            tracing::info!(closing, "Closing open connections");
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Gateway shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

/// Builder for Gateway
pub struct GatewayBuilder {
    port: u16,
    verifier: Option<Arc<dyn TokenVerifier>>,
    instance_id: Option<String>,
    settings: ConnectionSettings,
    cleanup_interval: Duration,
    send_queue_capacity: usize,
    enable_stats: bool,
    routes: Option<Router>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            port: 8080,
            verifier: None,
            instance_id: None,
            settings: ConnectionSettings::default(),
            cleanup_interval: Duration::from_secs(30),
            send_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enable_stats: true,
            routes: None,
        }
    }
}

impl GatewayBuilder {
    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the handshake token verifier
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use ws_gateway::{Gateway, JwtVerifier};
    ///
    /// Gateway::builder()
    ///     .port(8080)
    ///     .verifier(JwtVerifier::new(b"secret"))
    ///     .build()?
    ///     .run()
    ///     .await
    /// ```
    pub fn verifier<V: TokenVerifier>(mut self, verifier: V) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    /// Set an already shared verifier
    pub fn shared_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Set the instance ID
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Set the upper bound on handshake token verification
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.settings.handshake_timeout = timeout;
        self
    }

    /// Set the ping interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.settings.heartbeat_interval = interval;
        self
    }

    /// Set how long a ping may go unanswered
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.settings.pong_timeout = timeout;
        self
    }

    /// Set the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the per-connection send queue depth
    pub fn send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    /// Enable or disable the stats endpoint
    pub fn stats(mut self, enable: bool) -> Self {
        self.enable_stats = enable;
        self
    }

    /// Serve extra routes (already given their state) alongside the gateway
    pub fn routes(mut self, routes: Router) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Build the gateway
    pub fn build(self) -> anyhow::Result<Gateway> {
        let verifier = self
            .verifier
            .ok_or_else(|| anyhow::anyhow!("Verifier is required"))?;
        if self.settings.heartbeat_interval.is_zero() || self.cleanup_interval.is_zero() {
            anyhow::bail!("Heartbeat and cleanup intervals must be non-zero");
        }
        let instance_id = self
            .instance_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Gateway {
            port: self.port,
            verifier,
            connection_manager: ConnectionManager::new(instance_id)
                .with_queue_capacity(self.send_queue_capacity),
            settings: self.settings,
            cleanup_interval: self.cleanup_interval,
            enable_stats: self.enable_stats,
            routes: self.routes,
        })
    }
}
