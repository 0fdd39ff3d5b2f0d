use std::env;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub deployment: DeploymentConfig,
    pub reminders: ReminderConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin of the dispatch dashboard, allowed through CORS.
    pub frontend_url: String,
    /// Publicly reachable base URL of this service. When set, outbound
    /// messages carry `{public_base_url}/webhooks/sms/status` as their
    /// delivery-status callback.
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    pub api_base_url: String,
    /// Upper bound for a single outbound call; an elapsed call is recorded as failed.
    pub timeout_seconds: u64,
    /// Shared secret used to verify delivery-status callbacks (`X-Signature`).
    pub webhook_secret: Option<String>,
}

impl GatewayConfig {
    /// True when every credential needed to talk to the provider is present.
    pub fn is_configured(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.account_sid) && present(&self.auth_token) && present(&self.from_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Production,
    Development,
}

impl DeploymentMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Some(DeploymentMode::Production),
            "development" | "dev" => Some(DeploymentMode::Development),
            _ => None,
        }
    }

    pub fn is_production(self) -> bool {
        self == DeploymentMode::Production
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    pub mode: DeploymentMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReminderConfig {
    /// Whether the in-process reminder scan worker runs.
    pub enabled: bool,
    /// Seconds between scan passes of the worker.
    pub scan_interval_seconds: u64,
    /// IANA time zone of the service area. Used for the calendar-day window
    /// of the day-ahead reminder and for formatting dates in messages.
    pub timezone: Tz,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for webhook endpoints
    pub webhook_per_second: u32,
    /// Burst size for webhook endpoints
    pub webhook_burst: u32,
}

fn parse_bool(value: Result<String, env::VarError>, default: bool) -> bool {
    match value {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Unset means development; anything unrecognized is rejected so a typo can
/// never turn production into simulated sends.
fn parse_mode(value: Result<String, env::VarError>) -> Result<DeploymentMode, ConfigError> {
    match value {
        Ok(v) => DeploymentMode::from_str(&v)
            .ok_or_else(|| ConfigError::InvalidValue(format!("APP_ENV ({})", v))),
        Err(_) => Ok(DeploymentMode::Development),
    }
}

fn parse_timezone(value: Result<String, env::VarError>) -> Result<Tz, ConfigError> {
    match value {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidValue(format!("REMINDER_TIMEZONE ({})", v))),
        _ => Ok(Tz::UTC),
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
                public_base_url: non_empty("PUBLIC_BASE_URL")
                    .map(|u| u.trim_end_matches('/').to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/notifications.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            gateway: GatewayConfig {
                account_sid: non_empty("SMS_ACCOUNT_SID"),
                auth_token: non_empty("SMS_AUTH_TOKEN"),
                from_number: non_empty("SMS_FROM_NUMBER"),
                api_base_url: env::var("SMS_API_BASE_URL")
                    .unwrap_or_else(|_| "https://api.twilio.com/2010-04-01".to_string()),
                timeout_seconds: env::var("SMS_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("SMS_TIMEOUT_SECONDS".to_string()))?,
                webhook_secret: non_empty("SMS_WEBHOOK_SECRET"),
            },
            deployment: DeploymentConfig {
                mode: parse_mode(env::var("APP_ENV"))?,
            },
            reminders: ReminderConfig {
                enabled: parse_bool(env::var("REMINDER_SCAN_ENABLED"), true),
                scan_interval_seconds: env::var("REMINDER_SCAN_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300u64),
                timezone: parse_timezone(env::var("REMINDER_TIMEZONE"))?,
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: env::var("RATE_LIMIT_WEBHOOKS_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                webhook_burst: env::var("RATE_LIMIT_WEBHOOKS_BURST")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
        })
    }

    pub fn service_timezone(&self) -> Tz {
        self.reminders.timezone
    }

    /// URL the provider should call back with delivery receipts, if reachable.
    pub fn status_callback_url(&self) -> Option<String> {
        self.server
            .public_base_url
            .as_ref()
            .map(|base| format!("{}/webhooks/sms/status", base))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
                public_base_url: None,
            },
            database: DatabaseConfig {
                url: "sqlite://data/notifications.db".to_string(),
                max_connections: 5,
            },
            gateway: GatewayConfig {
                account_sid: None,
                auth_token: None,
                from_number: None,
                api_base_url: "https://api.twilio.com/2010-04-01".to_string(),
                timeout_seconds: 15,
                webhook_secret: None,
            },
            deployment: DeploymentConfig {
                mode: DeploymentMode::Development,
            },
            reminders: ReminderConfig {
                enabled: true,
                scan_interval_seconds: 300,
                timezone: Tz::UTC,
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: 10,
                webhook_burst: 50,
            },
        }
    }
}
