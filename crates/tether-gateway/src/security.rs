use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::config::{normalize_origin, GatewayConfig};

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; base-uri 'self'; \
     connect-src 'self' ws: wss:; img-src 'self' data:; object-src 'none'; \
     frame-ancestors 'none'; script-src 'self'; style-src 'self' 'unsafe-inline'";
const HSTS_VALUE: &str = "max-age=15552000; includeSubDomains";

#[derive(Clone, Copy)]
struct RateEntry {
    count: u32,
    window_start: Instant,
}

pub struct FixedWindowRateLimiter {
    max_requests: u32,
    window: Duration,
    max_keys: usize,
    entries: Mutex<HashMap<String, RateEntry>>,
}

impl FixedWindowRateLimiter {
    pub fn new(max_requests: u32, window: Duration, max_keys: usize) -> Self {
        Self {
            max_requests,
            window,
            max_keys,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.api_rate_limit,
            config.api_rate_window,
            config.api_rate_max_keys,
        )
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut guard = match self.entries.lock() {
            Ok(v) => v,
            Err(_) => return false,
        };

        if guard.len() >= self.max_keys && !guard.contains_key(key) {
            guard.retain(|_, entry| now.duration_since(entry.window_start) < self.window);
            if guard.len() >= self.max_keys {
                return false;
            }
        }

        let entry = guard.entry(key.to_string()).or_insert(RateEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count = entry.count.saturating_add(1);
        entry.count <= self.max_requests
    }
}

#[derive(Serialize)]
struct RateLimitError {
    error: String,
}

/// Per-client fixed-window limit for the session API.
pub async fn api_rate_limit(
    State(limiter): State<Arc<FixedWindowRateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "0.0.0.0".to_string());
    let key = format!("api:{}", client_ip);

    if !limiter.allow(&key) {
        warn!("api rate limit exceeded for {}", client_ip);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(RateLimitError {
                error: "Too many requests".to_string(),
            }),
        )
            .into_response();
    }

    next.run(req).await
}

/// Response headers added to everything the gateway serves.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityHeaders {
    pub hsts: bool,
}

impl SecurityHeaders {
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        headers.insert(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        );
        headers.insert(
            HeaderName::from_static("cross-origin-opener-policy"),
            HeaderValue::from_static("same-origin"),
        );
        headers.insert(
            HeaderName::from_static("x-dns-prefetch-control"),
            HeaderValue::from_static("off"),
        );
        headers
            .entry(header::CONTENT_SECURITY_POLICY)
            .or_insert(HeaderValue::from_static(CONTENT_SECURITY_POLICY));
        if self.hsts {
            headers.insert(
                header::STRICT_TRANSPORT_SECURITY,
                HeaderValue::from_static(HSTS_VALUE),
            );
        }
        headers.remove(header::SERVER);
        headers.remove(HeaderName::from_static("x-powered-by"));
    }
}

pub async fn security_headers(
    State(policy): State<SecurityHeaders>,
    req: Request,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;
    policy.apply(response.headers_mut());
    response
}

pub fn build_cors_layer(config: &GatewayConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if config.cors_allow_any {
        return base.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    if origins.is_empty() {
        warn!("no valid CORS origins configured; cross-origin browser access will be blocked");
        return base;
    }
    base.allow_origin(AllowOrigin::list(origins))
}

/// Browsers always send `Origin` on WebSocket upgrades; non-browser clients may omit it.
pub fn ws_origin_allowed(config: &GatewayConfig, origin: Option<&str>) -> bool {
    let Some(origin) = origin else {
        return true;
    };
    if config.cors_allow_any {
        return true;
    }
    let normalized = normalize_origin(origin);
    config.allowed_origins.iter().any(|o| *o == normalized)
}
