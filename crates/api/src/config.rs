// Server configuration loaded from environment variables.
// Decision: No DATABASE_URL means in-memory stores (local development)
// Decision: No NOTIFIER_WEBHOOK_URL means confirmation links are only logged

use std::net::SocketAddr;
use std::time::Duration;

use newsletter_engine::{EngineConfig, RedirectPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Longest accepted confirmation window (one year)
pub const MAX_CONFIRMATION_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Runtime configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Prefix for all routes except /health (e.g. "/api")
    pub api_prefix: String,

    /// PostgreSQL connection string
    pub database_url: Option<String>,

    /// Default base URL placed in confirmation links
    pub confirmation_endpoint: String,

    pub confirmation_window: Duration,

    /// Interval of the overdue sweep; `None` disables it
    pub sweep_interval: Option<Duration>,

    /// Mail relay endpoint
    pub notifier_webhook_url: Option<String>,
    pub notifier_auth_token: Option<String>,
    pub from_address: String,

    pub reject_concurrent_requests: bool,

    pub redirects: RedirectPolicy,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env_or("BIND_ADDR", "0.0.0.0:9000");
        let bind_addr = bind_addr.parse().map_err(|_| ConfigError::Invalid {
            name: "BIND_ADDR",
            value: bind_addr,
        })?;

        let confirmation_window =
            Duration::from_secs(parse_env("CONFIRMATION_WINDOW_SECS", 24 * 60 * 60)?);

        let sweep_secs = parse_env("EXPIRY_SWEEP_INTERVAL_SECS", 60)?;
        let sweep_interval = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));

        let defaults = RedirectPolicy::default();
        let redirects = RedirectPolicy {
            subscribed: env_or("REDIRECT_SUBSCRIBED_URL", &defaults.subscribed),
            unsubscribed: env_or("REDIRECT_UNSUBSCRIBED_URL", &defaults.unsubscribed),
            noop: env_or("REDIRECT_NOOP_URL", &defaults.noop),
            expired: env_or("REDIRECT_EXPIRED_URL", &defaults.expired),
            retry_later: env_or("REDIRECT_RETRY_LATER_URL", &defaults.retry_later),
            invalid_link: env_or("REDIRECT_INVALID_URL", &defaults.invalid_link),
        };

        Ok(Self {
            bind_addr,
            api_prefix: env_or("API_PREFIX", ""),
            database_url: non_empty_env("DATABASE_URL"),
            confirmation_endpoint: env_or(
                "CONFIRMATION_ENDPOINT",
                "http://localhost:9000/confirm",
            ),
            confirmation_window,
            sweep_interval,
            notifier_webhook_url: non_empty_env("NOTIFIER_WEBHOOK_URL"),
            notifier_auth_token: non_empty_env("NOTIFIER_AUTH_TOKEN"),
            from_address: env_or("FROM_EMAIL_ADDRESS", "newsletter@localhost"),
            reject_concurrent_requests: std::env::var("REJECT_CONCURRENT_REQUESTS")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            redirects,
        })
    }

    /// Engine settings derived from this config
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let invalid_window = || ConfigError::Invalid {
            name: "CONFIRMATION_WINDOW_SECS",
            value: self.confirmation_window.as_secs().to_string(),
        };
        if self.confirmation_window.is_zero()
            || self.confirmation_window > MAX_CONFIRMATION_WINDOW
        {
            return Err(invalid_window());
        }
        let confirmation_window =
            chrono::Duration::from_std(self.confirmation_window).map_err(|_| invalid_window())?;

        Ok(EngineConfig {
            confirmation_window,
            reject_concurrent_requests: self.reject_concurrent_requests,
            ..EngineConfig::default()
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
