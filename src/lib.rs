pub mod config;
pub mod denial;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod version;

pub use config::{Config, Settings};
pub use error::{ApiError, Result};
pub use handlers::{AppState, SharedState};
pub use server::{create_app, Server};
