use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tether_vault::{KeySource, VaultKey};

pub const VAULT_KEY_ENV: &str = "TETHER_VAULT_KEY";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

/// Gateway settings, read once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub allow_public_bind: bool,
    pub public_dir: PathBuf,
    pub body_limit_bytes: usize,

    pub heartbeat_interval: Duration,
    pub ws_max_connections: usize,
    pub ws_max_message_bytes: usize,

    pub session_capacity: usize,
    pub session_ttl: Duration,
    pub session_sweep_interval: Duration,

    pub api_rate_limit: u32,
    pub api_rate_window: Duration,
    pub api_rate_max_keys: usize,

    pub cors_allow_any: bool,
    pub allowed_origins: Vec<String>,
    pub hsts: bool,
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub(crate) fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

impl GatewayConfig {
    /// Read settings from the process environment (after `.env` is loaded).
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_bool = |name: &str, default: bool| {
            lookup(name)
                .map(|v| parse_bool(&v))
                .unwrap_or(default)
        };
        let env_u64 = |name: &str, default: u64| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let env_u32 = |name: &str, default: u32| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(default)
        };
        let env_usize = |name: &str, default: usize| {
            lookup(name)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(default)
        };

        let bind_raw = lookup("TETHER_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr: SocketAddr = bind_raw
            .trim()
            .parse()
            .with_context(|| format!("invalid TETHER_BIND_ADDR {:?}", bind_raw))?;

        let mut allowed_origins: Vec<String> = lookup("TETHER_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(normalize_origin)
            .filter(|o| !o.is_empty())
            .collect();
        if allowed_origins.is_empty() {
            allowed_origins = DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|o| normalize_origin(o))
                .collect();
        }
        allowed_origins.sort();
        allowed_origins.dedup();

        Ok(Self {
            bind_addr,
            allow_public_bind: env_bool("TETHER_ALLOW_PUBLIC_BIND", false),
            public_dir: PathBuf::from(
                lookup("TETHER_PUBLIC_DIR").unwrap_or_else(|| "public".to_string()),
            ),
            body_limit_bytes: env_usize("TETHER_BODY_LIMIT_BYTES", 1024 * 1024).max(1024),

            heartbeat_interval: Duration::from_secs(
                env_u64("TETHER_HEARTBEAT_INTERVAL_SECS", 30).max(1),
            ),
            ws_max_connections: env_usize("TETHER_WS_MAX_CONNECTIONS", 1024),
            ws_max_message_bytes: env_usize("TETHER_WS_MAX_MESSAGE_BYTES", 64 * 1024).max(1024),

            session_capacity: env_usize("TETHER_SESSION_CAPACITY", 10_000),
            session_ttl: Duration::from_secs(env_u64("TETHER_SESSION_TTL_SECS", 86_400).max(60)),
            session_sweep_interval: Duration::from_secs(60),

            api_rate_limit: env_u32("TETHER_API_RATE_LIMIT", 120),
            api_rate_window: Duration::from_secs(env_u64("TETHER_API_RATE_WINDOW_SECS", 60).max(1)),
            api_rate_max_keys: env_usize("TETHER_API_RATE_MAX_KEYS", 10_000),

            cors_allow_any: env_bool("TETHER_CORS_ALLOW_ANY", false),
            allowed_origins,
            hsts: env_bool("TETHER_HSTS", false),
        })
    }

    /// Refuse non-loopback binds unless explicitly allowed.
    pub fn check_public_bind_allowed(&self) -> anyhow::Result<()> {
        if self.bind_addr.ip().is_loopback() || self.allow_public_bind {
            return Ok(());
        }
        Err(anyhow!(
            "refusing non-loopback bind {} without TETHER_ALLOW_PUBLIC_BIND=1",
            self.bind_addr
        ))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        // Only the bind address can fail to parse and the default is a literal.
        Self::from_lookup(|_| None).unwrap_or_else(|_| unreachable!("default bind address parses"))
    }
}

/// Resolve the vault key from `TETHER_VAULT_KEY` in the given variable source.
///
/// Runs once in `main`; the key never passes through [`GatewayConfig`].
pub fn resolve_vault_key<F>(lookup: F) -> anyhow::Result<(VaultKey, KeySource)>
where
    F: Fn(&str) -> Option<String>,
{
    let configured = lookup(VAULT_KEY_ENV);
    VaultKey::resolve(configured.as_deref())
        .with_context(|| format!("{} must be 64 hex characters", VAULT_KEY_ENV))
}
