use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::ApiError;

pub const DEFAULT_CAPACITY: u64 = 100;
pub const DEFAULT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_STATUS_CODE: u16 = 429;
pub const DEFAULT_MESSAGE: &str = "Rate limit exceeded.";
/// Longest accepted window (one week)
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

/// Parameters of the service-wide rate limit. Immutable once the server starts.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RateLimitConfig {
    /// Maximum number of admitted requests per window
    #[validate(range(min = 1))]
    pub capacity: u64,
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_window"))]
    pub window: Duration,
    pub strategy: RateLimitStrategy,
    /// Status code used for rejections
    #[validate(range(min = 400, max = 599))]
    pub status_code: u16,
    /// Fixed `error` field of the rejection body
    #[validate(length(min = 1))]
    pub message: String,
    /// Whether `/health` bypasses the gate
    pub exempt_health: bool,
}

/// Rate limit strategy enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitStrategy {
    FixedWindow,
    MovingWindow,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            strategy: RateLimitStrategy::MovingWindow,
            status_code: DEFAULT_STATUS_CODE,
            message: DEFAULT_MESSAGE.to_string(),
            exempt_health: false,
        }
    }
}

impl RateLimitConfig {
    pub fn new(capacity: u64, window: Duration) -> Self {
        Self {
            capacity,
            window,
            ..Self::default()
        }
    }

    /// Window length in whole seconds
    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }

    pub fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }
}

fn validate_window(window: &Duration) -> Result<(), ValidationError> {
    if window.as_secs() == 0 {
        return Err(ValidationError::new("window_too_short"));
    }
    if window.as_secs() > MAX_WINDOW_SECS {
        return Err(ValidationError::new("window_too_long"));
    }
    Ok(())
}

impl FromStr for RateLimitStrategy {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed-window" | "fixed_window" => Ok(Self::FixedWindow),
            "moving-window" | "moving_window" | "sliding-window" => Ok(Self::MovingWindow),
            other => Err(ApiError::ConfigurationError(format!(
                "unknown rate limit strategy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for RateLimitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedWindow => write!(f, "fixed-window"),
            Self::MovingWindow => write!(f, "moving-window"),
        }
    }
}
