use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::error::{ApiError, Result};
use crate::rate_limit_config::{RateLimitConfig, RateLimitStrategy};

/// Outcome of a single admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// `capacity - count_in_window`, never negative
    pub remaining: u64,
    /// Unix seconds at which the oldest in-window request stops counting
    pub reset_at: u64,
    /// Limiter clock reading (millis since the limiter was created) the
    /// decision was taken at
    pub at: u64,
}

/// One request admission gate shared by every route and every caller.
///
/// There is exactly one bucket: callers are not distinguished, so the quota
/// protects the service as a whole. Windows are measured on a monotonic
/// clock started with the limiter, so wall clock adjustments cannot stretch
/// or shrink them.
#[derive(Clone)]
pub struct GlobalRateLimiter {
    config: Arc<RateLimitConfig>,
    origin: Instant,
    origin_unix_millis: u64,
    state: Arc<Mutex<LimiterState>>,
}

#[derive(Debug)]
struct LimiterState {
    /// Latest clock reading seen; timestamps never go below it
    last_seen: u64,
    window: WindowState,
}

/// Counter state guarded by the limiter's lock
#[derive(Debug)]
enum WindowState {
    /// Clock readings of admitted requests in the trailing window, oldest first
    Moving { admitted: VecDeque<u64> },
    /// Count of admitted requests since `started_at`
    Fixed { started_at: u64, count: u64 },
}

impl GlobalRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let window = match config.strategy {
            RateLimitStrategy::MovingWindow => WindowState::Moving {
                admitted: VecDeque::with_capacity(config.capacity.min(4096) as usize),
            },
            RateLimitStrategy::FixedWindow => WindowState::Fixed {
                started_at: 0,
                count: 0,
            },
        };

        Self {
            config: Arc::new(config),
            origin: Instant::now(),
            origin_unix_millis: unix_millis(),
            state: Arc::new(Mutex::new(LimiterState {
                last_seen: 0,
                window,
            })),
        }
    }

    /// Check and record one request against the global quota. The clock is
    /// read under the lock so recorded timestamps stay ordered.
    pub fn admit(&self) -> Result<Admission> {
        let mut state = self.lock()?;
        let now = self.clock_millis();
        Ok(self.admit_locked(&mut state, now))
    }

    /// Admission check at an explicit limiter clock reading (millis since
    /// creation). A reading older than one already seen is treated as that
    /// newest reading.
    pub fn admit_at(&self, now: u64) -> Result<Admission> {
        let mut state = self.lock()?;
        Ok(self.admit_locked(&mut state, now))
    }

    /// Unix seconds corresponding to a limiter clock reading
    pub fn unix_secs_at(&self, at: u64) -> u64 {
        self.origin_unix_millis.saturating_add(at) / 1000
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LimiterState>> {
        self.state.lock().map_err(|_| {
            ApiError::InternalServerError("Failed to acquire limiter lock".to_string())
        })
    }

    fn clock_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    // Eviction, capacity check and recording happen under one lock so
    // concurrent callers cannot over-admit at the boundary.
    fn admit_locked(&self, state: &mut LimiterState, now: u64) -> Admission {
        let capacity = self.config.capacity;
        let window = self.config.window_millis();

        let now = now.max(state.last_seen);
        state.last_seen = now;

        let (allowed, remaining, window_end) = match &mut state.window {
            WindowState::Moving { admitted } => {
                while admitted
                    .front()
                    .is_some_and(|&ts| now.saturating_sub(ts) >= window)
                {
                    admitted.pop_front();
                }

                let count = admitted.len() as u64;
                let allowed = count < capacity;
                if allowed {
                    admitted.push_back(now);
                }
                let oldest = admitted.front().copied().unwrap_or(now);
                let remaining = if allowed { capacity - count - 1 } else { 0 };
                (allowed, remaining, oldest.saturating_add(window))
            }
            WindowState::Fixed { started_at, count } => {
                if *count == 0 || now.saturating_sub(*started_at) >= window {
                    debug!(target: "greeter::rate_limiter", "Starting new fixed window");
                    *started_at = now;
                    *count = 0;
                }

                let allowed = *count < capacity;
                if allowed {
                    *count += 1;
                }
                let remaining = if allowed { capacity - *count } else { 0 };
                (allowed, remaining, started_at.saturating_add(window))
            }
        };

        Admission {
            allowed,
            remaining,
            reset_at: self.unix_secs_at(window_end),
            at: now,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
