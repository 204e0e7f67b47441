use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct GreetingResponse {
    pub message: String,
}

impl GreetingResponse {
    pub fn new(agent_name: &str, version: &str, now: DateTime<Utc>) -> Self {
        Self {
            message: format!(
                "Hello, my name is {} version {} the time is {}",
                agent_name,
                version,
                now.format("%H:%M")
            ),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}
