use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::{SharedState, HEALTH_PATH, METRICS_PATH};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Response extension set on requests turned away by the global limit
#[derive(Debug, Clone, Copy)]
pub struct RateLimited;

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);
    let request_id = Uuid::new_v4().to_string();

    info!(
        target: "greeter::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    let status = response.status();
    info!(
        target: "greeter::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

/// Global admission gate. Every request, whatever the route or caller, draws
/// from the same quota; only `/health` may be exempted by configuration.
pub async fn rate_limit_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let rate_limit = &state.settings.rate_limit;
    if rate_limit.exempt_health && request.uri().path() == HEALTH_PATH {
        return Ok(next.run(request).await);
    }

    let admission = state.limiter.admit()?;
    let now_secs = admission.at / 1000;

    let mut response = if admission.allowed {
        state.denials.clear_stale_at(now_secs)?;
        next.run(request).await
    } else {
        let mut rejection = state.denials.response_at(now_secs)?;
        rejection.extensions_mut().insert(RateLimited);
        rejection
    };

    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(rate_limit.capacity));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(admission.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(admission.reset_at));

    Ok(response)
}

/// Request count, latency and in-flight tracking. The scrape endpoint is
/// left out so scraping does not skew its own numbers.
pub async fn metrics_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if endpoint == METRICS_PATH {
        return next.run(request).await;
    }

    let method = request.method().to_string();
    let metrics = &state.metrics;
    let _in_flight = metrics.track_in_flight();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    metrics.observe_request(&method, &endpoint, status, start.elapsed().as_secs_f64());

    if response.extensions().get::<RateLimited>().is_some() {
        metrics.record_rate_limit_hit();
    }

    if let Some(remaining) = response
        .headers()
        .get(X_RATELIMIT_REMAINING)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok())
    {
        metrics.set_rate_limit_remaining(remaining);
    }

    response
}

fn get_client_ip(request: &Request) -> String {
    // Try to get real IP from headers first
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}
