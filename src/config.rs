//! Startup configuration.
//!
//! Supplied via CLI flags or environment, validated before the listener
//! starts. Invalid configuration aborts startup; it never surfaces as a
//! per-request failure.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::pool::PoolConfig;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "redis-rest-gateway",
    version,
    about = "Local REST-over-HTTP gateway for any RESP-speaking Redis server"
)]
pub struct GatewayConfig {
    /// Address for the HTTP listener
    #[arg(long = "addr", default_value = "127.0.0.1:8000", env = "GATEWAY_ADDR")]
    pub listen_addr: String,

    /// Upstream Redis address (host:port)
    #[arg(long = "redis", default_value = "127.0.0.1:6379", env = "GATEWAY_REDIS_ADDR")]
    pub redis_addr: String,

    /// Username for upstream AUTH
    #[arg(long, env = "GATEWAY_REDIS_USERNAME")]
    pub redis_username: Option<String>,

    /// Password for upstream AUTH
    #[arg(long, env = "GATEWAY_REDIS_PASSWORD")]
    pub redis_password: Option<String>,

    /// Bearer token accepted as authorized
    #[arg(long, default_value = "upstash", env = "GATEWAY_TOKEN")]
    pub token: String,

    /// Idle connections retained in the pool
    #[arg(long, default_value_t = 3, env = "GATEWAY_MAX_IDLE")]
    pub max_idle: usize,

    /// Seconds an idle connection may sit before being discarded
    #[arg(long, default_value_t = 240, env = "GATEWAY_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: u64,

    /// Per-command round-trip timeout in milliseconds
    #[arg(long, default_value_t = 1000, env = "GATEWAY_COMMAND_TIMEOUT_MS")]
    pub command_timeout_ms: u64,

    /// Upstream dial timeout in milliseconds
    #[arg(long, default_value_t = 1000, env = "GATEWAY_DIAL_TIMEOUT_MS")]
    pub dial_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
            redis_addr: "127.0.0.1:6379".to_string(),
            redis_username: None,
            redis_password: None,
            token: "upstash".to_string(),
            max_idle: 3,
            idle_timeout_secs: 240,
            command_timeout_ms: 1000,
            dial_timeout_ms: 1000,
        }
    }
}

impl GatewayConfig {
    /// Rejects configurations the gateway cannot start with.
    ///
    /// # Errors
    /// Describes the first offending field.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token.is_empty() {
            anyhow::bail!("API token must not be empty");
        }
        if self.redis_addr.is_empty() {
            anyhow::bail!("upstream Redis address must not be empty");
        }
        if self.listen_addr.is_empty() {
            anyhow::bail!("listen address must not be empty");
        }
        self.listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid listen address {:?}: {e}", self.listen_addr))?;
        if self.command_timeout_ms == 0 {
            anyhow::bail!("command timeout must be positive");
        }
        if self.dial_timeout_ms == 0 {
            anyhow::bail!("dial timeout must be positive");
        }
        Ok(())
    }

    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_idle: self.max_idle,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            dial_timeout: Duration::from_millis(self.dial_timeout_ms),
            ..PoolConfig::default()
        }
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}
