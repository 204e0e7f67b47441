use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::error::Result;

/// Content type of the Prometheus text exposition format
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Request, latency and rate-limit metrics backed by a private registry.
///
/// Built once at startup and shared with the middleware and the scrape
/// handler; cloning is cheap.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    in_flight: IntGauge,
    rate_limit_hits: IntCounter,
    rate_limit_remaining: IntGauge,
    uptime: Gauge,
    started: Instant,
}

impl MetricsCollector {
    pub fn new(version: &str) -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            &["method", "endpoint"],
        )?;
        let in_flight = IntGauge::new(
            "http_requests_in_flight",
            "Current number of HTTP requests in flight",
        )?;
        let rate_limit_hits = IntCounter::new(
            "http_rate_limit_hits_total",
            "Total number of rate limit hits",
        )?;
        let rate_limit_remaining = IntGauge::new(
            "http_rate_limit_remaining",
            "Remaining requests in current rate limit window",
        )?;
        let app_info = GaugeVec::new(
            Opts::new("app_info", "Application information"),
            &["version"],
        )?;
        let start_time = Gauge::new(
            "app_start_time_seconds",
            "Unix timestamp of application start time",
        )?;
        let uptime = Gauge::new("app_uptime_seconds", "Application uptime in seconds")?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;
        registry.register(Box::new(rate_limit_hits.clone()))?;
        registry.register(Box::new(rate_limit_remaining.clone()))?;
        registry.register(Box::new(app_info.clone()))?;
        registry.register(Box::new(start_time.clone()))?;
        registry.register(Box::new(uptime.clone()))?;

        // Zero-valued children so a fresh scrape is never empty
        requests_total.with_label_values(&["GET", "/", "200"]);
        request_duration.with_label_values(&["GET", "/"]);
        app_info.with_label_values(&[version]).set(1.0);
        start_time.set(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
        );

        debug!(target: "greeter::metrics", version, "Metrics registry initialized");

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                requests_total,
                request_duration,
                in_flight,
                rate_limit_hits,
                rate_limit_remaining,
                uptime,
                started: Instant::now(),
            }),
        })
    }

    /// Mark a request as started; the returned guard marks it finished on drop.
    pub fn track_in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.inc();
        InFlightGuard {
            gauge: self.inner.in_flight.clone(),
        }
    }

    /// Record a completed request
    pub fn observe_request(&self, method: &str, endpoint: &str, status: u16, elapsed_secs: f64) {
        self.inner
            .request_duration
            .with_label_values(&[method, endpoint])
            .observe(elapsed_secs);
        let status = status.to_string();
        self.inner
            .requests_total
            .with_label_values(&[method, endpoint, status.as_str()])
            .inc();
    }

    pub fn record_rate_limit_hit(&self) {
        self.inner.rate_limit_hits.inc();
    }

    pub fn set_rate_limit_remaining(&self, remaining: i64) {
        self.inner.rate_limit_remaining.set(remaining);
    }

    pub fn request_count(&self, method: &str, endpoint: &str, status: u16) -> u64 {
        let status = status.to_string();
        self.inner
            .requests_total
            .with_label_values(&[method, endpoint, status.as_str()])
            .get()
    }

    pub fn rate_limit_hits(&self) -> u64 {
        self.inner.rate_limit_hits.get()
    }

    pub fn in_flight(&self) -> i64 {
        self.inner.in_flight.get()
    }

    /// Refresh the uptime gauge and encode the whole registry
    pub fn render(&self) -> Result<String> {
        self.inner
            .uptime
            .set(self.inner.started.elapsed().as_secs_f64());

        let families = self.inner.registry.gather();
        debug!(
            target: "greeter::metrics",
            families = families.len(),
            "Rendering metrics"
        );

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

pub struct InFlightGuard {
    gauge: IntGauge,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
