use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::apply_security_headers;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/storefront";
const DEFAULT_AUTH_URL: &str = "http://localhost:9999";
const DEFAULT_PAYMENT_DELAY_MS: u64 = 2000;
const DEFAULT_PAYMENT_SUCCESS_RATE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Hosted Postgres plus the hosted auth service.
    Postgres,
    /// Everything in process; for demos and tests.
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "postgres" => Ok(BackendKind::Postgres),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentConfig {
    pub success_rate: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            success_rate: DEFAULT_PAYMENT_SUCCESS_RATE,
            min_delay: Duration::from_millis(DEFAULT_PAYMENT_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_PAYMENT_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DemoAdmin {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub backend: BackendKind,
    pub database_url: String,
    pub database_max_connections: u32,
    pub auth: AuthConfig,
    pub payment: PaymentConfig,
    pub surface_inventory_errors: bool,
    pub cors_allowed_origins: String,
    pub production: bool,
    pub demo_admin: Option<DemoAdmin>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Invalid values fall back
    /// to their defaults with a warning.
    pub fn from_source<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = parse_or(&lookup, "BIND_ADDR", || {
            SocketAddr::from(([0, 0, 0, 0], 3001))
        });
        let min_delay_ms = parse_or(&lookup, "PAYMENT_MIN_DELAY_MS", || DEFAULT_PAYMENT_DELAY_MS);
        let max_delay_ms = parse_or(&lookup, "PAYMENT_MAX_DELAY_MS", || min_delay_ms);
        let success_rate = parse_or(&lookup, "PAYMENT_SUCCESS_RATE", || {
            DEFAULT_PAYMENT_SUCCESS_RATE
        });
        let success_rate = if (0.0..=1.0).contains(&success_rate) {
            success_rate
        } else {
            tracing::warn!(
                value = success_rate,
                "PAYMENT_SUCCESS_RATE outside [0, 1], using default"
            );
            DEFAULT_PAYMENT_SUCCESS_RATE
        };

        let demo_admin = match (lookup("DEMO_ADMIN_EMAIL"), lookup("DEMO_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(DemoAdmin { email, password }),
            _ => None,
        };

        Self {
            bind_addr,
            backend: parse_or(&lookup, "BACKEND", || BackendKind::Postgres),
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", || 5),
            auth: AuthConfig {
                url: lookup("AUTH_URL")
                    .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                api_key: lookup("AUTH_API_KEY").unwrap_or_default(),
                timeout: Duration::from_secs(parse_or(&lookup, "AUTH_TIMEOUT_SECS", || 10)),
            },
            payment: PaymentConfig {
                success_rate,
                min_delay: Duration::from_millis(min_delay_ms.min(max_delay_ms)),
                max_delay: Duration::from_millis(min_delay_ms.max(max_delay_ms)),
            },
            surface_inventory_errors: parse_or(&lookup, "SURFACE_INVENTORY_ERRORS", || false),
            cors_allowed_origins: lookup("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|| cors::DEFAULT_ALLOWED_ORIGINS.to_string()),
            production: lookup("RUST_ENV")
                .map(|v| v.to_lowercase() == "production")
                .unwrap_or(false),
            demo_admin,
        }
    }
}

fn parse_or<F, T, D>(lookup: &F, key: &str, default: D) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
    D: FnOnce() -> T,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, value = %raw, error = %e, "Invalid configuration value, using default");
                default()
            }
        },
        None => default(),
    }
}
