use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_gateway::{
    build_router,
    config::{resolve_vault_key, VAULT_KEY_ENV},
    security::FixedWindowRateLimiter,
    spawn_sweeper, ws, AppState, GatewayConfig, LivenessTracker, MemorySessionStore,
};
use tether_vault::Vault;

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tether_gateway=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenv::dotenv().ok();

    let config = GatewayConfig::from_env()?;
    config.check_public_bind_allowed()?;

    let (key, key_source) = resolve_vault_key(|name| std::env::var(name).ok())?;
    if key_source.is_durable() {
        tracing::info!("vault key loaded from {}", VAULT_KEY_ENV);
    } else {
        tracing::warn!(
            "{} not set; using an ephemeral vault key. Stored sessions will not survive a restart",
            VAULT_KEY_ENV
        );
    }
    let vault = Arc::new(Vault::new(key));

    let active_sessions = MemorySessionStore::shared(config.session_capacity);
    let permanent_sessions = MemorySessionStore::shared(config.session_capacity);
    let tracker = Arc::new(LivenessTracker::new());

    spawn_sweeper(tracker.clone(), config.heartbeat_interval);
    tracing::info!(
        "heartbeat sweep every {}s",
        config.heartbeat_interval.as_secs()
    );

    let expiring = active_sessions.clone();
    let session_ttl = config.session_ttl;
    let sweep_every = config.session_sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            let removed = expiring.evict_older_than(session_ttl);
            if removed > 0 {
                tracing::info!("expired {} active session(s)", removed);
            }
        }
    });

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        vault,
        key_source,
        active_sessions,
        permanent_sessions,
        tracker,
        ws_slots: ws::connection_slots(config.ws_max_connections),
        rate_limiter: Arc::new(FixedWindowRateLimiter::from_config(&config)),
    };
    let app = build_router(state);

    let addr = config.bind_addr;
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::AddrInUse => {
            let fallback_addr = SocketAddr::new(addr.ip(), 0);
            tracing::warn!(
                "gateway bind {} is already in use, falling back to {}",
                addr,
                fallback_addr
            );
            TcpListener::bind(fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };
    let bound_addr = listener.local_addr()?;
    tracing::info!("gateway listening on {}", bound_addr);
    tracing::info!("serving static files from {}", config.public_dir.display());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
