use std::time::Duration;

use taskforge_core::admission::{
    AdmissionLimits, DEFAULT_MAX_CONCURRENT_PER_USER, DEFAULT_MAX_ITERATIONS,
};

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields except the JWT secret have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time given to embedded coordinators to stop after a shutdown signal.
    pub shutdown_timeout_secs: u64,
    /// Bus URL; unset means the in-process bus.
    pub bus_url: Option<String>,
    /// SQLite lock wait bound.
    pub busy_timeout: Duration,
    /// Per-user cap and per-task ceiling applied on submit.
    pub admission: AdmissionLimits,
    /// Coordinators run inside the gateway process, sharing its bus.
    pub embedded_coordinators: usize,
    /// JWT token configuration.
    pub jwt: JwtConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                    |
    /// |---------------------------------|----------------------------|
    /// | `HOST`                          | `0.0.0.0`                  |
    /// | `PORT`                          | `3000`                     |
    /// | `CORS_ORIGINS`                  | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`          | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`         | `30`                       |
    /// | `BUS_URL`                       | unset (in-process bus)     |
    /// | `DB_BUSY_TIMEOUT_MS`            | `5000`                     |
    /// | `MAX_CONCURRENT_TASKS_PER_USER` | `5`                        |
    /// | `MAX_ITERATIONS`                | `1e15`                     |
    /// | `EMBEDDED_COORDINATORS`         | `0`                        |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let bus_url = std::env::var("BUS_URL").ok().filter(|s| !s.trim().is_empty());

        let busy_timeout_ms: u64 = std::env::var("DB_BUSY_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".into())
            .parse()
            .expect("DB_BUSY_TIMEOUT_MS must be a valid u64");

        let max_concurrent_per_user: i64 = std::env::var("MAX_CONCURRENT_TASKS_PER_USER")
            .unwrap_or_else(|_| DEFAULT_MAX_CONCURRENT_PER_USER.to_string())
            .parse()
            .expect("MAX_CONCURRENT_TASKS_PER_USER must be a valid i64");
        assert!(
            max_concurrent_per_user > 0,
            "MAX_CONCURRENT_TASKS_PER_USER must be at least 1"
        );

        let max_iterations = match std::env::var("MAX_ITERATIONS") {
            Ok(raw) => parse_count(&raw).expect("MAX_ITERATIONS must be a positive integer"),
            Err(_) => DEFAULT_MAX_ITERATIONS,
        };

        let embedded_coordinators: usize = std::env::var("EMBEDDED_COORDINATORS")
            .unwrap_or_else(|_| "0".into())
            .parse()
            .expect("EMBEDDED_COORDINATORS must be a valid usize");

        let jwt = JwtConfig::from_env();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            bus_url,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
            admission: AdmissionLimits {
                max_concurrent_per_user,
                max_iterations,
            },
            embedded_coordinators,
            jwt,
        }
    }
}

/// Parse a positive count written either as an integer or in exponent
/// notation (`1e15`).
fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim().replace('_', "");
    if let Ok(n) = raw.parse::<u64>() {
        return (n > 0).then_some(n);
    }
    let f = raw.parse::<f64>().ok()?;
    (f.is_finite() && f >= 1.0 && f <= u64::MAX as f64 && f.fract() == 0.0).then_some(f as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accept_exponent_notation() {
        assert_eq!(parse_count("1e15"), Some(1_000_000_000_000_000));
        assert_eq!(parse_count("1_000"), Some(1000));
        assert_eq!(parse_count("42"), Some(42));
        assert_eq!(parse_count("0"), None);
        assert_eq!(parse_count("2.5"), None);
        assert_eq!(parse_count("lots"), None);
    }
}
