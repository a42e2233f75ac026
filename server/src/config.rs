use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Presence-aware message relay
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "relay-server", version, about = "Presence-aware message relay")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "RELAY_PORT", default_value = "8765")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "RELAY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./relay.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RELAY_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long, env = "RELAY_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Lifetime of issued access tokens, in minutes
    #[arg(long, env = "RELAY_TOKEN_TTL_MINUTES", default_value = "60")]
    pub token_ttl_minutes: i64,

    /// Issue and print an access token for an existing user, then exit
    #[arg(long, value_name = "USER_ID")]
    #[serde(skip)]
    pub issue_token: Option<i64>,

    /// Connection and fan-out tuning (loaded from [relay] section in TOML)
    /// Not serialized, so the CLI layer cannot reset a TOML or env `[relay]`.
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub relay: RelayConfig,
}

/// Per-connection and broadcast tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Upper bound on one send inside a broadcast (default: 2000)
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Outbound frames queued per connection before sends start waiting (default: 64)
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Transport ping interval in seconds (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Handshake attempts allowed in a burst per client IP (default: 30)
    #[serde(default = "default_handshake_burst")]
    pub handshake_burst: u32,

    /// Seconds to replenish one handshake attempt (default: 1)
    #[serde(default = "default_handshake_replenish")]
    pub handshake_replenish_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 2000,
            outbound_buffer: 64,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            handshake_burst: 30,
            handshake_replenish_secs: 1,
        }
    }
}

impl RelayConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Never zero: `tokio::time::interval` panics on a zero period.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }
}

fn default_send_timeout_ms() -> u64 {
    2000
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

fn default_handshake_burst() -> u32 {
    30
}

fn default_handshake_replenish() -> u64 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8765,
            bind_address: "0.0.0.0".to_string(),
            config: "./relay.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            token_ttl_minutes: 60,
            issue_token: None,
            relay: RelayConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();
        let issue_token = cli.issue_token;

        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("RELAY_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()?;
        config.issue_token = issue_token;
        Ok(config)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Relay Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT,
# RELAY_RELAY__SEND_TIMEOUT_MS, etc.) or CLI flags (--port, etc.)

# Server port (default: 8765)
# port = 8765

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and token signing key
# data_dir = "./data"

# Lifetime of issued access tokens in minutes
# token_ttl_minutes = 60

# ---- Connections and fan-out ----
# [relay]

# Upper bound on one send inside a broadcast; a slower peer is evicted
# send_timeout_ms = 2000

# Outbound frames queued per connection
# outbound_buffer = 64

# Transport heartbeat
# ping_interval_secs = 30
# pong_timeout_secs = 10

# Per-IP rate limit on WebSocket handshakes
# handshake_burst = 30
# handshake_replenish_secs = 1
"#
    .to_string()
}
