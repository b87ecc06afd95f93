use serde::{Deserialize, Serialize};
use std::path::Path;

/// Secret used by `TEST_MODE` and local development tokens
pub const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the credential service
    #[serde(default)]
    pub jwt_secret: String,
    /// Upper bound on handshake token verification
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Serve `/api/stats`
    #[serde(default = "default_true")]
    pub stats: bool,
}

fn default_port() -> u16 {
    8080
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_send_queue_capacity() -> usize {
    ws_gateway::DEFAULT_QUEUE_CAPACITY
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_pong_timeout_secs() -> u64 {
    10
}

fn default_cleanup_interval_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            instance_id: default_instance_id(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: default_send_queue_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            stats: true,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self {
                server: ServerConfig::default(),
                auth: AuthConfig::default(),
                gateway: GatewayConfig::default(),
            }
        };

        // Environment wins over the file
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn test_config() -> Self {
        let mut config = Self {
            server: ServerConfig {
                port: 8080,
                instance_id: format!("test-{}", &default_instance_id()[..8]),
            },
            auth: AuthConfig {
                jwt_secret: DEV_JWT_SECRET.to_string(),
                handshake_timeout_ms: default_handshake_timeout_ms(),
            },
            gateway: GatewayConfig::default(),
        };
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.server.port = port;
        }
        config
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(secret) = var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(ms) = var("HANDSHAKE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.auth.handshake_timeout_ms = ms;
        }
        if let Some(capacity) = var("SEND_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
            self.gateway.send_queue_capacity = capacity;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET environment variable is required");
        }
        if self.gateway.send_queue_capacity == 0 {
            anyhow::bail!("gateway.send_queue_capacity must be at least 1");
        }
        Ok(())
    }
}
