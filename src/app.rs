use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, request::Parts, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::handlers::{self, AppState, API_KEY_HEADER};

const BODY_LIMIT_BYTES: usize = 64 * 1024;

const ALLOWED_ORIGINS: [&str; 9] = [
    "https://crm.zoho.eu",
    "https://crm.zoho.com",
    "https://crm.zoho.in",
    "https://crm.zoho.com.au",
    "https://crm.zoho.jp",
    "http://127.0.0.1:5000",
    "http://localhost:5000",
    "https://127.0.0.1:5000",
    "https://localhost:5000",
];

fn widget_origin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https://[a-z0-9-]+\.zappsusercontent\.(eu|com)$")
            .expect("static origin pattern")
    })
}

/// CRM origins, local development and widget hosting.
pub fn is_allowed_origin(origin: &str) -> bool {
    ALLOWED_ORIGINS.contains(&origin) || widget_origin_pattern().is_match(origin)
}

/// Rejects POST bodies not declared as JSON with 415.
async fn require_json(request: Request, next: Next) -> Response {
    if request.method() == Method::POST {
        let is_json = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains("application/json"))
            .unwrap_or(false);
        if !is_json {
            return (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                Json(json!({ "error": "Tylko Content-Type: application/json jest obsługiwany" })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

/// 301 to https when the proxy reports a plain-http request.
async fn https_redirect(
    State(config): State<Arc<Config>>,
    request: Request,
    next: Next,
) -> Response {
    if !config.force_https || request.uri().path() == "/health" {
        return next.run(request).await;
    }
    let forwarded_https = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("https"))
        .unwrap_or(false);
    if forwarded_https {
        return next.run(request).await;
    }
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("https://{}{}", host, path);
    match HeaderValue::from_str(&target) {
        Ok(location) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid host" }))).into_response(),
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _parts: &Parts| {
            origin.to_str().map(is_allowed_origin).unwrap_or(false)
        }))
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(API_KEY_HEADER)])
}

/// Milliseconds between replenished slots, at least 1.
fn replenish_interval_ms(window_secs: u64, max: u32) -> u64 {
    (window_secs.saturating_mul(1000) / u64::from(max.max(1))).max(1)
}

/// Builds the full router: lookup routes behind the rate limiter, `/health` outside it.
pub fn build_router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let config = Arc::new(state.config.clone());

    // Token bucket: a full burst of `max`, one slot back every window/max
    let replenish_ms = replenish_interval_ms(config.rate_limit_window_secs, config.rate_limit_max);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenish_ms)
            .burst_size(config.rate_limit_max)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limit configuration"))?,
    );

    let protected_routes = Router::new()
        .route("/lookup/by-id", post(handlers::lookup_by_id))
        .route("/lookup/full-report", post(handlers::full_report))
        .route("/api/gus/name-by-nip", post(handlers::lookup_by_id))
        .route("/api/gus/full-report", post(handlers::full_report))
        .layer(
            ServiceBuilder::new()
                .layer(GovernorLayer {
                    config: governor_conf,
                })
                .layer(middleware::from_fn(require_json)),
        )
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES));

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(state)
        .layer(middleware::from_fn_with_state(config, https_redirect))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http());

    Ok(app)
}
