// src/config.rs

use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_ttl_days: i64,
    pub site_url: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub vision_timeout: Duration,
    pub dodo_checkout_base_url: String,
    pub dodo_product_id: Option<String>,
    pub dodo_api_base_url: String,
    pub dodo_secret_key: Option<String>,
    pub dodo_webhook_secret: Option<String>,
    pub dodo_test_mode: bool,
    pub probe_timeout: Duration,
    pub sweep_interval: Option<Duration>,
}

impl Config {
    /// Loads settings from the process environment. Panics on a missing
    /// required variable so a misconfigured deploy fails at startup.
    pub fn from_env() -> Self {
        let sweep_secs: u64 = parsed_env("SWEEP_INTERVAL_SECS", 0);

        Config {
            database_url: required_env("DATABASE_URL"),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed_env("PORT", 8065),
            jwt_secret: required_env("JWT_SECRET"),
            jwt_ttl_days: parsed_env("JWT_TTL_DAYS", 30),
            site_url: env::var("SITE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            openai_api_key: required_env("OPENAI_API_KEY"),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            vision_timeout: Duration::from_secs(parsed_env("VISION_TIMEOUT_SECS", 60)),
            dodo_checkout_base_url: env::var("DODO_CHECKOUT_BASE_URL")
                .unwrap_or_else(|_| "https://checkout.dodopayments.com".to_string()),
            dodo_product_id: optional_env("DODO_PRODUCT_ID"),
            dodo_api_base_url: env::var("DODO_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.dodopayments.com".to_string()),
            dodo_secret_key: optional_env("DODO_SECRET_KEY"),
            dodo_webhook_secret: optional_env("DODO_WEBHOOK_SECRET"),
            dodo_test_mode: flag_env("DODO_TEST_MODE"),
            probe_timeout: Duration::from_secs(parsed_env("PROBE_TIMEOUT_SECS", 10)),
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        }
    }
}

fn required_env(key: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => panic!("{key} must be set"),
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub(crate) fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn flag_env(key: &str) -> bool {
    env::var(key).map(|v| parse_flag(&v)).unwrap_or(false)
}
