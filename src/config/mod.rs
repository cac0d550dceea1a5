//! Runtime configuration, built once at startup and shared read-only

use std::time::Duration;

use anyhow::{Context, Result};

/// Listing page size forced onto every category URL
pub const PAGE_SIZE: u32 = 48;

/// Number of concurrent product requests when none is given
pub const DEFAULT_CONCURRENCY: usize = 3;

const DEFAULT_BASE_URL: &str = "https://www.tesco.com/groceries/en-GB";
const DEFAULT_DATABASE_URL: &str = "sqlite:data.db";
const DEFAULT_SOURCE: &str = "tesco";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Configuration for scraping a single grocery site
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Site root; product pages live at `{base_url}/products/{id}`
    pub base_url: String,
    /// sqlx connection string for the product store
    pub database_url: String,
    /// Tag stored alongside every row, scoping "already fetched" lookups
    pub source: String,
    /// Value forced onto the `count` query parameter of category URLs
    pub page_size: u32,
    pub concurrency: usize,
    /// Whole-request timeout for each page fetch
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            source: DEFAULT_SOURCE.to_string(),
            page_size: PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ScraperConfig {
    /// Load overrides from the environment (`.env` is read by the caller)
    ///
    /// | Variable | Field |
    /// | --- | --- |
    /// | `TESCO_BASE_URL` | `base_url` |
    /// | `DATABASE_URL` | `database_url` |
    /// | `TESCO_SOURCE` | `source` |
    /// | `TESCO_REQUEST_TIMEOUT_SECS` | `request_timeout` |
    /// | `TESCO_CONNECT_TIMEOUT_SECS` | `connect_timeout` |
    /// | `TESCO_USER_AGENT` | `user_agent` |
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var("TESCO_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            config.database_url = database_url;
        }
        if let Ok(source) = std::env::var("TESCO_SOURCE") {
            config.source = source;
        }
        if let Some(timeout) = duration_from_env("TESCO_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = timeout;
        }
        if let Some(timeout) = duration_from_env("TESCO_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = timeout;
        }
        if let Ok(user_agent) = std::env::var("TESCO_USER_AGENT") {
            config.user_agent = user_agent;
        }

        Ok(config)
    }
}

fn duration_from_env(key: &str) -> Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(raw) => {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{key} must be a whole number of seconds, got {raw:?}"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}
