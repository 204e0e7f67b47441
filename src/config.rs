use envconfig::Envconfig;
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::error::{ApiError, Result};
use crate::rate_limit_config::{RateLimitConfig, RateLimitStrategy};
use crate::version::VersionSource;

/// Raw process configuration as read from the environment.
#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Deployment environment selecting the limits/debug profile
    #[envconfig(from = "APP_ENV", default = "development")]
    pub environment: String,

    /// Name used in the greeting
    #[envconfig(from = "AGENT_NAME", default = "Unknown")]
    pub agent_name: String,

    /// Text file holding the release version
    #[envconfig(from = "VERSION_FILE")]
    pub version_file: Option<PathBuf>,

    /// Listen address, defaults depend on the environment
    #[envconfig(from = "BIND_HOST")]
    pub bind_host: Option<IpAddr>,

    #[envconfig(from = "BIND_PORT", default = "5000")]
    pub bind_port: u16,

    #[envconfig(from = "LOG_LEVEL")]
    pub log_level: Option<String>,

    #[envconfig(from = "RATELIMIT_CAPACITY")]
    pub rate_limit_capacity: Option<u64>,

    #[envconfig(from = "RATELIMIT_WINDOW_SECS")]
    pub rate_limit_window_secs: Option<u64>,

    #[envconfig(from = "RATELIMIT_STRATEGY")]
    pub rate_limit_strategy: Option<String>,

    #[envconfig(from = "RATELIMIT_STATUS_CODE")]
    pub rate_limit_status_code: Option<u16>,

    /// Let `/health` bypass the global limiter
    #[envconfig(from = "RATELIMIT_EXEMPT_HEALTH", default = "false")]
    pub rate_limit_exempt_health: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> std::result::Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Resolve the environment profile and overrides into validated settings.
    /// An unknown environment name or invalid limits are fatal.
    pub fn resolve(&self) -> Result<Settings> {
        let environment: Environment = self.environment.parse()?;
        let profile = environment.profile();

        let mut rate_limit = profile.rate_limit;
        if let Some(capacity) = self.rate_limit_capacity {
            rate_limit.capacity = capacity;
        }
        if let Some(secs) = self.rate_limit_window_secs {
            rate_limit.window = Duration::from_secs(secs);
        }
        if let Some(strategy) = &self.rate_limit_strategy {
            rate_limit.strategy = strategy.parse::<RateLimitStrategy>()?;
        }
        if let Some(code) = self.rate_limit_status_code {
            rate_limit.status_code = code;
        }
        rate_limit.exempt_health = self.rate_limit_exempt_health;

        let host = self.bind_host.unwrap_or(if environment == Environment::Development {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });

        let log_level = self
            .log_level
            .clone()
            .unwrap_or_else(|| if profile.debug { "debug" } else { "info" }.to_string());

        let settings = Settings {
            environment,
            debug: profile.debug,
            testing: profile.testing,
            agent_name: self.agent_name.clone(),
            version_source: self
                .version_file
                .clone()
                .map(VersionSource::File)
                .unwrap_or(VersionSource::Embedded),
            bind_addr: SocketAddr::new(host, self.bind_port),
            log_level,
            rate_limit,
        };

        settings.validate()?;
        Ok(settings)
    }
}

/// Deployment environments with a configuration profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Testing,
    Production,
}

/// Static parameters selected by the environment name
#[derive(Debug, Clone)]
pub struct Profile {
    pub debug: bool,
    pub testing: bool,
    pub rate_limit: RateLimitConfig,
}

impl Environment {
    pub fn profile(self) -> Profile {
        match self {
            Environment::Development => Profile {
                debug: true,
                testing: false,
                rate_limit: RateLimitConfig::default(),
            },
            Environment::Testing => Profile {
                debug: false,
                testing: true,
                rate_limit: RateLimitConfig::default(),
            },
            Environment::Production => Profile {
                debug: false,
                testing: false,
                rate_limit: RateLimitConfig::default(),
            },
        }
    }
}

impl FromStr for Environment {
    type Err = ApiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "development" | "default" => Ok(Environment::Development),
            "testing" => Ok(Environment::Testing),
            "production" => Ok(Environment::Production),
            other => Err(ApiError::UnknownEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Testing => write!(f, "testing"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Fully resolved settings the server is built from.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct Settings {
    pub environment: Environment,
    pub debug: bool,
    pub testing: bool,
    #[validate(length(min = 1))]
    pub agent_name: String,
    pub version_source: VersionSource,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    #[validate(nested)]
    pub rate_limit: RateLimitConfig,
}

impl Settings {
    /// Settings for the given environment with no overrides applied
    pub fn for_environment(environment: Environment) -> Self {
        let profile = environment.profile();
        Self {
            environment,
            debug: profile.debug,
            testing: profile.testing,
            agent_name: "Unknown".to_string(),
            version_source: VersionSource::Embedded,
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000),
            log_level: if profile.debug { "debug" } else { "info" }.to_string(),
            rate_limit: profile.rate_limit,
        }
    }
}
