mod api;
mod config;
mod discussion;
mod state;

use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ws_gateway::{Gateway, JwtVerifier};

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let test_mode = std::env::var("TEST_MODE").map(|v| v == "1" || v == "true").unwrap_or(false);

    let config = if test_mode {
        tracing::info!("Running in TEST MODE with the development JWT secret");
        AppConfig::test_config()
    } else {
        AppConfig::load()?
    };

    tracing::info!(
        instance_id = %config.server.instance_id,
        port = config.server.port,
        send_queue_capacity = config.gateway.send_queue_capacity,
        test_mode = test_mode,
        "Gateway starting"
    );

    let verifier = JwtVerifier::new(config.auth.jwt_secret.as_bytes());

    let gateway = Gateway::builder()
        .port(config.server.port)
        .instance_id(config.server.instance_id.clone())
        .verifier(verifier.clone())
        .handshake_timeout(Duration::from_millis(config.auth.handshake_timeout_ms))
        .heartbeat_interval(Duration::from_secs(config.gateway.heartbeat_interval_secs))
        .pong_timeout(Duration::from_secs(config.gateway.pong_timeout_secs))
        .cleanup_interval(Duration::from_secs(config.gateway.cleanup_interval_secs))
        .send_queue_capacity(config.gateway.send_queue_capacity)
        .stats(config.gateway.stats)
        .build()?;

    let state = AppState::new(verifier, gateway.connections());

    gateway.with_routes(api::router(state)).run().await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comments_gateway=info,ws_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
