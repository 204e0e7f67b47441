use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use greeter::config::{Environment, Settings};
use greeter::handlers::AppState;
use greeter::rate_limit_config::RateLimitStrategy;
use greeter::server::{create_app, Server};
use greeter::version::VersionSource;
use http_body_util::BodyExt;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tower::ServiceExt;

fn settings(capacity: u64, window_secs: u64) -> Settings {
    let mut settings = Settings::for_environment(Environment::Testing);
    settings.agent_name = "Smith".to_string();
    settings.rate_limit.capacity = capacity;
    settings.rate_limit.window = Duration::from_secs(window_secs);
    settings
}

fn app(settings: Settings) -> Router {
    create_app(Arc::new(AppState::new(settings).unwrap()))
}

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

fn header_u64(response: &Response, name: &str) -> u64 {
    response.headers()[name].to_str().unwrap().parse().unwrap()
}

/// Value of the first exposition sample matching `name` and every label pair
fn sample(text: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let line_re = Regex::new(r"^([a-zA-Z_:][a-zA-Z0-9_:]*)(?:\{(.*)\})? (\S+)$").unwrap();
    text.lines()
        .filter_map(|line| line_re.captures(line))
        .find(|caps| {
            &caps[1] == name
                && labels.iter().all(|(k, v)| {
                    let wanted = format!("{}=\"{}\"", k, v);
                    caps.get(2)
                        .is_some_and(|l| l.as_str().split(',').any(|pair| pair == wanted))
                })
        })
        .and_then(|caps| caps[3].parse().ok())
}

#[tokio::test]
async fn test_greeting_endpoint() {
    let path = std::env::temp_dir().join(format!("greeter-it-{}", uuid::Uuid::new_v4()));
    std::fs::write(&path, "3.1.4\n").unwrap();

    let mut settings = settings(100, 60);
    settings.version_source = VersionSource::File(path.clone());
    let app = app(settings);

    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let message = body["message"].as_str().unwrap();
    let re =
        Regex::new(r"^Hello, my name is Smith version 3\.1\.4 the time is \d{2}:\d{2}$").unwrap();
    assert!(re.is_match(message), "unexpected greeting: {}", message);

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn test_greeting_with_missing_version_file() {
    let mut settings = settings(100, 60);
    settings.version_source = VersionSource::File("/nonexistent/version.info".into());
    let app = app(settings);

    let body = body_json(get(&app, "/").await).await;
    assert!(body["message"].as_str().unwrap().contains("version unknown"));
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = app(settings(100, 60));

    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({"status": "healthy"}));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = app(settings(100, 60));
    get(&app, "/").await;

    let response = get(&app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; version=0.0.4; charset=utf-8"
    );

    let text = body_text(response).await;
    for family in [
        "http_requests_total",
        "http_request_duration_seconds",
        "http_requests_in_flight",
        "app_info",
        "app_uptime_seconds",
        "app_start_time_seconds",
    ] {
        assert!(text.contains(&format!("# TYPE {} ", family)), "missing {}", family);
    }

    assert!(text.contains("app_info{version="));
    assert_eq!(
        sample(
            &text,
            "http_requests_total",
            &[("method", "GET"), ("endpoint", "/"), ("status", "200")]
        ),
        Some(1.0)
    );
    assert_eq!(sample(&text, "http_requests_in_flight", &[]), Some(0.0));
}

#[tokio::test]
async fn test_metrics_scrape_is_not_self_instrumented() {
    let app = app(settings(100, 60));
    get(&app, "/health").await;

    let first = body_text(get(&app, "/metrics").await).await;
    sleep(Duration::from_millis(20)).await;
    let second = body_text(get(&app, "/metrics").await).await;

    let without_uptime = |text: &str| -> Vec<String> {
        text.lines()
            .filter(|line| !line.contains("app_uptime_seconds"))
            .map(str::to_string)
            .collect()
    };
    assert_eq!(without_uptime(&first), without_uptime(&second));
    assert!(!first.contains("endpoint=\"/metrics\""));

    let first_uptime = sample(&first, "app_uptime_seconds", &[]).unwrap();
    let second_uptime = sample(&second, "app_uptime_seconds", &[]).unwrap();
    assert!(second_uptime >= first_uptime);
}

#[tokio::test]
async fn test_admitted_requests_count_down_remaining() {
    let app = app(settings(5, 60));

    let mut previous = u64::MAX;
    for _ in 0..5 {
        let response = get(&app, "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_u64(&response, "x-ratelimit-limit"), 5);

        let remaining = header_u64(&response, "x-ratelimit-remaining");
        assert!(remaining <= previous);
        previous = remaining;
    }
    assert_eq!(previous, 0);
}

#[tokio::test]
async fn test_rate_limit_exceeded_response() {
    let app = app(settings(3, 60));
    for _ in 0..3 {
        assert_eq!(get(&app, "/").await.status(), StatusCode::OK);
    }

    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let header_retry = header_u64(&response, "retry-after");
    assert_eq!(header_u64(&response, "x-ratelimit-remaining"), 0);

    let body = body_json(response).await;
    assert_eq!(body["code"], 429);
    assert_eq!(body["error"], "Rate limit exceeded.");
    let retry_after = body["retry_after"].as_u64().unwrap();
    assert!(retry_after >= 1);
    assert_eq!(retry_after, header_retry);
    let message = body["message"].as_str().unwrap();
    assert!(message.starts_with(
        "The API has exceeded the allowed 3 requests per 60 seconds. Please try again in "
    ));
}

#[tokio::test]
async fn test_rate_limit_is_global_across_routes() {
    let app = app(settings(100, 60));
    for _ in 0..100 {
        assert_eq!(get(&app, "/").await.status(), StatusCode::OK);
    }

    assert_eq!(get(&app, "/").await.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(get(&app, "/health").await.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(get(&app, "/metrics").await.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_health_exemption_policy() {
    let mut settings = settings(2, 60);
    settings.rate_limit.exempt_health = true;
    let app = app(settings);

    // Exempt health checks do not consume quota
    for _ in 0..5 {
        assert_eq!(get(&app, "/health").await.status(), StatusCode::OK);
    }
    assert_eq!(get(&app, "/").await.status(), StatusCode::OK);
    assert_eq!(get(&app, "/").await.status(), StatusCode::OK);
    assert_eq!(get(&app, "/").await.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(get(&app, "/health").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rejections_are_recorded_in_metrics() {
    // The scrape endpoint is limited too, so read the collector directly
    let state = Arc::new(AppState::new(settings(1, 60)).unwrap());
    let app = create_app(state.clone());
    get(&app, "/").await;
    get(&app, "/").await;
    get(&app, "/health").await;

    assert_eq!(state.metrics.rate_limit_hits(), 2);
    assert_eq!(state.metrics.request_count("GET", "/", 429), 1);
    assert_eq!(state.metrics.request_count("GET", "/health", 429), 1);
    assert_eq!(state.metrics.request_count("GET", "/", 200), 1);

    let text = state.metrics.render().unwrap();
    assert_eq!(sample(&text, "http_rate_limit_hits_total", &[]), Some(2.0));
    assert_eq!(sample(&text, "http_rate_limit_remaining", &[]), Some(0.0));
}

#[tokio::test]
async fn test_only_limiter_rejections_count_as_hits() {
    let mut settings = settings(10, 60);
    settings.rate_limit.status_code = 404;
    let state = Arc::new(AppState::new(settings).unwrap());
    let app = create_app(state.clone());

    // Same status as a rejection, but produced by the router fallback
    let response = get(&app, "/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!response.headers().contains_key("retry-after"));

    assert_eq!(state.metrics.request_count("GET", "unknown", 404), 1);
    assert_eq!(state.metrics.rate_limit_hits(), 0);
}

#[tokio::test]
async fn test_retry_countdown_shrinks_between_denials() {
    let app = app(settings(1, 60));
    get(&app, "/").await;

    let first = header_u64(&get(&app, "/").await, "retry-after");
    sleep(Duration::from_millis(1100)).await;
    let second = header_u64(&get(&app, "/").await, "retry-after");

    assert_eq!(first, 60);
    assert!(second < first);
}

#[tokio::test]
async fn test_requests_admitted_again_after_window() {
    let app = app(settings(2, 1));
    get(&app, "/").await;
    get(&app, "/").await;
    assert_eq!(get(&app, "/").await.status(), StatusCode::TOO_MANY_REQUESTS);

    sleep(Duration::from_millis(1100)).await;

    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_u64(&response, "x-ratelimit-remaining"), 1);
}

#[tokio::test]
async fn test_fixed_window_strategy_through_router() {
    let mut settings = settings(2, 1);
    settings.rate_limit.strategy = RateLimitStrategy::FixedWindow;
    let app = app(settings);

    let first = get(&app, "/").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header_u64(&first, "x-ratelimit-remaining"), 1);
    let second = get(&app, "/").await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header_u64(&second, "x-ratelimit-remaining"), 0);
    assert_eq!(
        header_u64(&first, "x-ratelimit-reset"),
        header_u64(&second, "x-ratelimit-reset")
    );
    assert_eq!(get(&app, "/").await.status(), StatusCode::TOO_MANY_REQUESTS);

    sleep(Duration::from_millis(1100)).await;

    // The whole quota comes back once the window rolls over
    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_u64(&response, "x-ratelimit-remaining"), 1);
}

#[tokio::test]
async fn test_stale_denial_epoch_cleared_on_admission() {
    let state = Arc::new(AppState::new(settings(1, 1)).unwrap());
    let app = create_app(state.clone());

    assert_eq!(get(&app, "/").await.status(), StatusCode::OK);
    assert_eq!(get(&app, "/").await.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(state.denials.first_denied_at().is_some());

    // Past twice the window, the next admitted request drops the epoch
    sleep(Duration::from_millis(3100)).await;
    assert_eq!(get(&app, "/").await.status(), StatusCode::OK);
    assert_eq!(state.denials.first_denied_at(), None);

    // A fresh run of denials starts its countdown from the full window
    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_u64(&response, "retry-after"), 1);
}

#[tokio::test]
async fn test_server_over_tcp() {
    let mut settings = settings(10, 60);
    settings.bind_addr = "127.0.0.1:0".parse().unwrap();

    let listener = TcpListener::bind(settings.bind_addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(settings).unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(listener, async move {
        stop_rx.await.ok();
    }));

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-ratelimit-remaining"], "9");

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");

    stop_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
