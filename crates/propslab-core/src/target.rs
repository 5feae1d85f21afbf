use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which fetch mechanism to use for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Plain HTTP GET with a rotated client identity.
    #[default]
    Http,
    /// Headless Chromium with stealth configuration.
    Browser,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Http => "http",
            Strategy::Browser => "browser",
        }
    }

    /// The fallback strategy tried once after this one is exhausted.
    pub fn alternate(&self) -> Strategy {
        match self {
            Strategy::Http => Strategy::Browser,
            Strategy::Browser => Strategy::Http,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Strategy::Http),
            "browser" => Ok(Strategy::Browser),
            _ => Err(format!("Unknown strategy: {s}")),
        }
    }
}

/// One unit of scheduled collection: a URL, an extraction schema
/// reference, and a preferred strategy. Immutable once dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub url: String,
    /// Opaque schema reference, resolved by the configuration layer.
    pub schema: String,
    #[serde(default)]
    pub strategy: Strategy,
}

impl Target {
    pub fn new(url: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            schema: schema.into(),
            strategy: Strategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Raw markup plus fetch metadata. Lives only between the fetch and
/// the extraction step.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub html: String,
    pub status: u16,
    pub elapsed: Duration,
    pub strategy: Strategy,
}

/// Global rate limit: at most `max_requests` dispatches per `window`,
/// shared across both strategies.
#[derive(Debug, Clone)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_requests: 4,
            window: Duration::from_secs(1),
        }
    }
}

/// Configuration for a collection run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Retry budget per strategy for transient failures. Challenge
    /// pages share a single budget of this size across strategies.
    pub max_retries: u32,
    pub rate_limit: RateLimit,
    pub http_timeout: Duration,
    pub browser_timeout: Duration,
    /// Concurrency cap for lightweight fetches (I/O-bound).
    pub http_concurrency: usize,
    /// Concurrency cap for browser fetches (resource-bound, keep low).
    pub browser_concurrency: usize,
    /// First backoff delay; doubles per retry up to `max_backoff`.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// How long an in-flight fetch may finish after cancellation.
    pub grace_period: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            rate_limit: RateLimit::default(),
            http_timeout: Duration::from_secs(30),
            browser_timeout: Duration::from_secs(45),
            http_concurrency: 8,
            browser_concurrency: 2,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            grace_period: Duration::from_secs(5),
        }
    }
}

impl RunConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.rate_limit = RateLimit {
            max_requests,
            window,
        };
        self
    }

    pub fn with_timeouts(mut self, http: Duration, browser: Duration) -> Self {
        self.http_timeout = http;
        self.browser_timeout = browser;
        self
    }

    pub fn with_concurrency(mut self, http: usize, browser: usize) -> Self {
        self.http_concurrency = http.max(1);
        self.browser_concurrency = browser.max(1);
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_roundtrip() {
        for strategy in [Strategy::Http, Strategy::Browser] {
            let parsed: Strategy = strategy.as_str().parse().unwrap();
            assert_eq!(parsed, strategy);
        }
    }

    #[test]
    fn strategy_alternate_flips() {
        assert_eq!(Strategy::Http.alternate(), Strategy::Browser);
        assert_eq!(Strategy::Browser.alternate(), Strategy::Http);
    }

    #[test]
    fn target_deserializes_without_strategy() {
        let target: Target =
            serde_json::from_str(r#"{"url": "https://example.com", "schema": "match"}"#).unwrap();
        assert_eq!(target.strategy, Strategy::Http);
    }

    #[test]
    fn run_config_builders() {
        let config = RunConfig::default()
            .with_max_retries(5)
            .with_concurrency(16, 0);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.http_concurrency, 16);
        // Zero would deadlock the pool; clamped to one.
        assert_eq!(config.browser_concurrency, 1);
    }

    #[test]
    fn run_config_per_strategy_timeouts() {
        let config = RunConfig::default()
            .with_timeouts(Duration::from_secs(10), Duration::from_secs(60));
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.browser_timeout, Duration::from_secs(60));
    }
}
