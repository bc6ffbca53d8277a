//! Scraper configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Public bearer token the web client ships with.
pub const DEFAULT_BEARER_TOKEN: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

/// Base for REST (v1.1 / v2) endpoints.
pub const DEFAULT_API_BASE: &str = "https://api.x.com";

/// Base for GraphQL endpoints.
pub const DEFAULT_GRAPHQL_BASE: &str = "https://x.com/i/api";

/// Settings shared by a [`Session`](crate::Session) and the operations built on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Base URL for REST endpoints (guest activation, login, legacy timelines).
    pub api_base: String,
    /// Base URL for GraphQL endpoints.
    pub graphql_base: String,
    /// Bearer token sent with every request.
    pub bearer_token: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// How long a guest token is reused before fetching a new one.
    pub guest_token_ttl_secs: u64,
    /// Attempts made to activate a guest token before giving up.
    pub guest_token_attempts: u32,
    /// Fixed delay between guest token attempts.
    pub guest_token_backoff_ms: u64,
    /// Hard cap on pages fetched in one pagination loop.
    pub max_pages: usize,
    /// Entries requested per page.
    pub page_size: usize,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            graphql_base: DEFAULT_GRAPHQL_BASE.to_string(),
            bearer_token: DEFAULT_BEARER_TOKEN.to_string(),
            request_timeout_ms: 30_000,
            guest_token_ttl_secs: 3 * 60 * 60,
            guest_token_attempts: 3,
            guest_token_backoff_ms: 1_000,
            max_pages: 500,
            page_size: 20,
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ScraperConfig {
    /// Point both REST and GraphQL requests at one base URL (used with mock servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.api_base = url.clone();
        self.graphql_base = url;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = saturating_millis(timeout);
        self
    }

    /// Set the guest token retry policy.
    pub fn with_guest_token_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.guest_token_attempts = attempts;
        self.guest_token_backoff_ms = saturating_millis(backoff);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn guest_token_ttl(&self) -> Duration {
        Duration::from_secs(self.guest_token_ttl_secs)
    }

    pub fn guest_token_backoff(&self) -> Duration {
        Duration::from_millis(self.guest_token_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ScraperConfig =
            serde_json::from_str(r#"{"request_timeout_ms": 500}"#).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(500));
        assert_eq!(config.guest_token_attempts, 3);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn test_with_base_url() {
        let config = ScraperConfig::default().with_base_url("http://127.0.0.1:9000");
        assert_eq!(config.api_base, "http://127.0.0.1:9000");
        assert_eq!(config.graphql_base, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_huge_durations_saturate() {
        let config = ScraperConfig::default()
            .with_timeout(Duration::MAX)
            .with_guest_token_retries(2, Duration::MAX);
        assert_eq!(config.request_timeout_ms, u64::MAX);
        assert_eq!(config.guest_token_backoff_ms, u64::MAX);

        let config = ScraperConfig::default().with_timeout(Duration::from_millis(250));
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
    }
}
