use std::{env, time::Duration};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub security: SecurityConfig,
    pub checkout_timeout: Duration,
    pub session_purge_interval: Duration,
}

/// Token signing and session lifetime settings.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub session_ttl: chrono::Duration,
    pub remember_me_ttl: chrono::Duration,
    /// Idle lifetime of a session nobody has logged into.
    pub anonymous_ttl: chrono::Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_var("APP_PORT", 3000u16)?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        let session_hours = parse_var("SESSION_TTL_HOURS", 12i64)?;
        let remember_days = parse_var("REMEMBER_ME_DAYS", 30i64)?;
        let anonymous_days = parse_var("ANONYMOUS_SESSION_DAYS", 7i64)?;
        let checkout_ms = parse_var("CHECKOUT_TIMEOUT_MS", 5000u64)?;
        let purge_minutes = parse_var("SESSION_PURGE_MINUTES", 60u64)?;

        Ok(Self {
            port,
            database_url,
            host,
            security: SecurityConfig {
                jwt_secret,
                session_ttl: chrono::Duration::hours(session_hours),
                remember_me_ttl: chrono::Duration::days(remember_days),
                anonymous_ttl: chrono::Duration::days(anonymous_days),
            },
            checkout_timeout: Duration::from_millis(checkout_ms),
            session_purge_interval: Duration::from_secs(purge_minutes.max(1).saturating_mul(60)),
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
