//! Rejection responses for the global rate limit.
//!
//! The retry countdown is measured from the first denial of the current run
//! of rejections (the denial epoch), so successive rejected callers see the
//! advertised wait shrink instead of a constant window length.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::rate_limit_config::RateLimitConfig;

const SECONDS_IN_MINUTE: u64 = 60;

/// JSON body of a rate-limit rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitExceeded {
    pub code: u16,
    pub error: String,
    pub message: String,
    pub retry_after: u64,
}

/// Builds rejection responses and owns the process-wide denial epoch.
#[derive(Clone)]
pub struct DenialResponder {
    config: Arc<RateLimitConfig>,
    /// Limiter clock seconds of the first denial in the current run
    first_denied_at: Arc<Mutex<Option<u64>>>,
}

impl DenialResponder {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            first_denied_at: Arc::new(Mutex::new(None)),
        }
    }

    /// Compute the rejection for a request denied at `now` (limiter clock
    /// seconds, see [`crate::rate_limiter::Admission::at`]).
    pub fn respond_at(&self, now: u64) -> Result<RateLimitExceeded> {
        let window = self.config.window_secs();

        let mut epoch = self.first_denied_at.lock().map_err(|_| {
            ApiError::InternalServerError("Failed to acquire denial epoch lock".to_string())
        })?;

        let started = match *epoch {
            Some(started) if now.saturating_sub(started) < window => started,
            Some(started) => {
                debug!(
                    target: "greeter::denial",
                    started,
                    now,
                    "Denial window elapsed, starting a new epoch"
                );
                *epoch = Some(now);
                now
            }
            None => {
                debug!(target: "greeter::denial", now, "New global rate limit epoch");
                *epoch = Some(now);
                now
            }
        };

        let elapsed = now.saturating_sub(started);
        let retry_after = window.saturating_sub(elapsed).max(1);

        debug!(
            target: "greeter::denial",
            started,
            elapsed,
            retry_after,
            "Rate limit countdown"
        );

        Ok(RateLimitExceeded {
            code: self.config.status_code,
            error: self.config.message.clone(),
            message: format!(
                "The API has exceeded the allowed {} requests per {} seconds. \
                 Please try again in {}.",
                self.config.capacity,
                window,
                format_retry_time(retry_after)
            ),
            retry_after,
        })
    }

    /// Drop an epoch older than twice the window. Runs on the admission path
    /// so the epoch is bounded even once denials stop arriving.
    pub fn clear_stale_at(&self, now: u64) -> Result<bool> {
        let stale_after = self.config.window_secs().saturating_mul(2);

        let mut epoch = self.first_denied_at.lock().map_err(|_| {
            ApiError::InternalServerError("Failed to acquire denial epoch lock".to_string())
        })?;

        match *epoch {
            Some(started) if now.saturating_sub(started) > stale_after => {
                debug!(target: "greeter::denial", started, now, "Clearing stale denial epoch");
                *epoch = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn first_denied_at(&self) -> Option<u64> {
        self.first_denied_at.lock().ok().and_then(|epoch| *epoch)
    }

    /// Full HTTP rejection for a request denied at `now` (limiter clock seconds)
    pub fn response_at(&self, now: u64) -> Result<Response> {
        let body = self.respond_at(now)?;

        warn!(
            target: "greeter::denial",
            retry_after = body.retry_after,
            "Global rate limit exceeded"
        );

        let status = StatusCode::from_u16(body.code).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
        let retry_after = HeaderValue::from(body.retry_after);

        let mut response = (status, Json(body)).into_response();
        response.headers_mut().insert("Retry-After", retry_after);
        Ok(response)
    }
}

/// Render a retry delay in seconds as text, e.g. `1 minute and 30 seconds`.
pub fn format_retry_time(seconds: u64) -> String {
    if seconds < SECONDS_IN_MINUTE {
        return format!("{} {}", seconds, plural(seconds, "second"));
    }

    let minutes = seconds / SECONDS_IN_MINUTE;
    let remaining = seconds % SECONDS_IN_MINUTE;

    let mut text = format!("{} {}", minutes, plural(minutes, "minute"));
    if remaining > 0 {
        text.push_str(&format!(" and {} {}", remaining, plural(remaining, "second")));
    }
    text
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        unit.to_string()
    } else {
        format!("{}s", unit)
    }
}
