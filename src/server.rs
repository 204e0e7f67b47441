use crate::config::Settings;
use crate::error::Result;
use crate::handlers::{
    greeting, health_check, metrics, AppState, SharedState, HEALTH_PATH, METRICS_PATH, ROOT_PATH,
};
use crate::middleware::{logging_middleware, metrics_middleware, rate_limit_middleware};
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the router with the full middleware stack. Metrics wrap the rate
/// limit gate so rejected requests are counted too.
pub fn create_app(state: SharedState) -> Router {
    Router::new()
        .route(ROOT_PATH, get(greeting))
        .route(HEALTH_PATH, get(health_check))
        .route(METRICS_PATH, get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware))
                .layer(middleware::from_fn_with_state(state.clone(), metrics_middleware))
                .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware)),
        )
        .with_state(state)
}

pub struct Server {
    app: Router,
    addr: SocketAddr,
}

impl Server {
    pub fn new(settings: Settings) -> Result<Self> {
        let addr = settings.bind_addr;
        let state = Arc::new(AppState::new(settings)?);

        tracing::info!(
            environment = %state.settings.environment,
            agent = %state.settings.agent_name,
            version = state.version.as_str(),
            capacity = state.settings.rate_limit.capacity,
            window_secs = state.settings.rate_limit.window_secs(),
            strategy = %state.settings.rate_limit.strategy,
            exempt_health = state.settings.rate_limit.exempt_health,
            "Application state initialized"
        );

        Ok(Self {
            app: create_app(state),
            addr,
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Greeter server listening on {}", listener.local_addr()?);
        tracing::info!("Health check available at {}", HEALTH_PATH);
        tracing::info!("Metrics available at {}", METRICS_PATH);

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
