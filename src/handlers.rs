use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::config::Settings;
use crate::denial::DenialResponder;
use crate::error::ApiError;
use crate::metrics::{MetricsCollector, METRICS_CONTENT_TYPE};
use crate::rate_limiter::GlobalRateLimiter;
use crate::response::{GreetingResponse, HealthResponse};
use crate::version::VersionInfo;

pub const ROOT_PATH: &str = "/";
pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Everything the handlers and middleware share. Each component guards its
/// own mutable state, so the state itself needs no outer lock.
pub struct AppState {
    pub settings: Settings,
    pub version: VersionInfo,
    pub limiter: GlobalRateLimiter,
    pub denials: DenialResponder,
    pub metrics: MetricsCollector,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self, ApiError> {
        let version = VersionInfo::resolve(&settings.version_source);
        let metrics = MetricsCollector::new(version.as_str())?;

        Ok(Self {
            limiter: GlobalRateLimiter::new(settings.rate_limit.clone()),
            denials: DenialResponder::new(settings.rate_limit.clone()),
            settings,
            version,
            metrics,
        })
    }
}

/// Greeting with the agent name, version and current UTC time
pub async fn greeting(State(state): State<SharedState>) -> impl IntoResponse {
    let response = GreetingResponse::new(
        &state.settings.agent_name,
        state.version.as_str(),
        Utc::now(),
    );

    debug!(
        agent = %state.settings.agent_name,
        version = state.version.as_str(),
        "Handling greeting request"
    );

    Json(response)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    debug!("Health check request received");
    (StatusCode::OK, Json(HealthResponse::healthy()))
}

/// Prometheus scrape endpoint
pub async fn metrics(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body))
}
