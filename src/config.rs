use std::{str::FromStr, time::Duration};

use anyhow::{anyhow, ensure, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Login used by the session-scoped client.
    pub url: String,
    /// Login used by the privileged client. Defaults to `url`.
    pub service_url: String,
    /// Password of the `url` login.
    pub anon_key: String,
    /// Password of the `service_url` login.
    pub service_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model_version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub poll_secs: u64,
    pub batch_size: i64,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub provider: ProviderConfig,
    pub rate_limit: RateLimitConfig,
    pub worker: WorkerConfig,
    pub cors_origins: Vec<String>,
    /// Credits charged per generation job.
    pub generation_cost: i32,
    /// Credits granted on registration.
    pub signup_credits: i32,
}

/// Unset or blank falls back to `default`; anything else must parse.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(key, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow!("{key}={raw:?} is invalid: {e}"))
}

fn non_negative(key: &str, value: i32) -> anyhow::Result<i32> {
    ensure!(value >= 0, "{key} must not be negative, got {value}");
    Ok(value)
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let url = required("DATABASE_URL")?;
        let database = DatabaseConfig {
            service_url: std::env::var("DATABASE_SERVICE_URL").unwrap_or_else(|_| url.clone()),
            url,
            anon_key: required("DATABASE_ANON_KEY")?,
            service_key: required("DATABASE_SERVICE_KEY")?,
        };
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "wan-api".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "wan-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 30)?,
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14)?,
        };
        let provider = ProviderConfig {
            api_key: required("REPLICATE_API_KEY")?,
            base_url: std::env::var("REPLICATE_BASE_URL")
                .unwrap_or_else(|_| "https://api.replicate.com".into()),
            model_version: std::env::var("REPLICATE_MODEL_VERSION").unwrap_or_else(|_| {
                "3f0457e4619daac51203dedb472816fd4af51f3149fa7a9e0b5ffcf1b8172438".into()
            }),
        };
        let rate_limit = RateLimitConfig {
            max_requests: env_or("RATE_LIMIT_MAX", 100)?,
            window_secs: env_or("RATE_LIMIT_WINDOW_SECS", 900)?,
        };
        let worker = WorkerConfig {
            poll_secs: env_or("WORKER_POLL_SECS", 5)?,
            batch_size: env_or("WORKER_BATCH_SIZE", 10)?,
        };
        ensure!(worker.batch_size > 0, "WORKER_BATCH_SIZE must be positive");
        let cors_origins = std::env::var("CORS_ORIGINS")
            .map(|v| parse_origins(&v))
            .unwrap_or_else(|_| vec!["http://localhost:3000".into()]);

        let generation_cost = non_negative("GENERATION_COST", env_or("GENERATION_COST", 10)?)?;
        let signup_credits = non_negative("SIGNUP_CREDITS", env_or("SIGNUP_CREDITS", 100)?)?;

        Ok(Self {
            database,
            jwt,
            provider,
            rate_limit,
            worker,
            cors_origins,
            generation_cost,
            signup_credits,
        })
    }
}

/// Comma-separated list; blanks are dropped.
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
