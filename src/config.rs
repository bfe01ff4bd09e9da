use crate::cache::DEFAULT_QUERY_TTL;
use crate::error::{Error, Result};
use crate::search::RetryPolicy;
use crate::transport::DEFAULT_BASE_URL;
use regex::Regex;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub max_results: u32,
    pub cache_duration: Duration,
    pub requests_per_second: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub request_timeout: Duration,
    pub mention_capacity: usize,
    pub post_interval: Duration,
    pub bind_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key -> value source; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("PUBMED_API_KEY")
            .ok_or_else(|| Error::Config("PUBMED_API_KEY is required".into()))?;
        let key_re = Regex::new(r"^[A-Za-z0-9_-]+$").map_err(|e| Error::Config(e.to_string()))?;
        if !key_re.is_match(&api_key) {
            return Err(Error::Config(
                "PUBMED_API_KEY must only contain letters, numbers, underscores, and hyphens".into(),
            ));
        }

        let base_url = get("PUBMED_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        url::Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("PUBMED_BASE_URL is not a valid URL: {}", e)))?;

        let max_results: u32 = parse(&get, "PUBMED_MAX_RESULTS", 10)?;
        check_range("PUBMED_MAX_RESULTS", max_results, 1, 100)?;

        let cache_secs: u64 = parse(&get, "PUBMED_CACHE_DURATION", 3600)?;

        let requests_per_second: usize = parse(&get, "PUBMED_REQUESTS_PER_SECOND", 3)?;
        check_range("PUBMED_REQUESTS_PER_SECOND", requests_per_second, 1, 10)?;

        let max_retries: u32 = parse(&get, "PUBMED_MAX_RETRIES", 3)?;
        check_range("PUBMED_MAX_RETRIES", max_retries, 1, 5)?;

        let retry_base_ms: u64 = parse(&get, "PUBMED_RETRY_BASE_MS", 1000)?;
        check_range("PUBMED_RETRY_BASE_MS", retry_base_ms, 1, u64::MAX)?;

        let timeout_secs: u64 = parse(&get, "PUBMED_TIMEOUT_SECS", 10)?;
        check_range("PUBMED_TIMEOUT_SECS", timeout_secs, 1, u64::MAX)?;

        let mention_capacity: usize = parse(&get, "MENTION_LEDGER_CAPACITY", 1000)?;
        check_range("MENTION_LEDGER_CAPACITY", mention_capacity, 1, usize::MAX)?;

        let post_interval_secs: u64 = parse(&get, "POST_INTERVAL_SECS", 4 * 60 * 60)?;
        check_range("POST_INTERVAL_SECS", post_interval_secs, 60, u64::MAX)?;

        let bind_addr = parse(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 5000)))?;

        Ok(Self {
            api_key,
            base_url,
            max_results,
            cache_duration: Duration::from_secs(cache_secs),
            requests_per_second,
            max_retries,
            retry_base_delay: Duration::from_millis(retry_base_ms),
            request_timeout: Duration::from_secs(timeout_secs),
            mention_capacity,
            post_interval: Duration::from_secs(post_interval_secs),
            bind_addr,
        })
    }

    /// Lifetime of cached query entries: `cache_duration`, but never below
    /// 24 hours.
    pub fn query_ttl(&self) -> Duration {
        self.cache_duration.max(DEFAULT_QUERY_TTL)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
        }
    }
}

fn parse<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("{} has invalid value '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn check_range<T>(key: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(Error::Config(format!(
            "{} must be between {} and {}, got {}",
            key, min, max, value
        )));
    }
    Ok(())
}
