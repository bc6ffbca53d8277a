//! Tweet permalink parsing.

use std::fmt;

use thiserror::Error;

use crate::{TweetId, UserHandle};

/// Error when parsing a tweet permalink.
#[derive(Debug, Error)]
#[error("invalid tweet permalink: {0}")]
pub struct PermalinkError(String);

const HOSTS: &[&str] = &[
    "twitter.com",
    "www.twitter.com",
    "mobile.twitter.com",
    "x.com",
    "www.x.com",
    "mobile.x.com",
];

/// A parsed tweet URL.
///
/// Permalinks have the format: `https://{host}/{handle}/status/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permalink {
    pub handle: UserHandle,
    pub tweet_id: TweetId,
}

impl Permalink {
    /// Parse a permalink string.
    ///
    /// # Example
    ///
    /// ```
    /// use roost_scraper::Permalink;
    ///
    /// let link = Permalink::parse("https://x.com/someone/status/1234?s=20").unwrap();
    /// assert_eq!(link.handle.0, "someone");
    /// assert_eq!(link.tweet_id.0, 1234);
    /// ```
    pub fn parse(url: &str) -> Result<Self, PermalinkError> {
        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .ok_or_else(|| PermalinkError(format!("missing scheme: {url}")))?;

        let rest = rest.split(['?', '#']).next().unwrap_or(rest);
        let parts: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
        if parts.len() < 4 || !HOSTS.contains(&parts[0]) {
            return Err(PermalinkError(format!("expected host/handle/status/id: {url}")));
        }
        if parts[2] != "status" && parts[2] != "statuses" {
            return Err(PermalinkError(format!("not a status URL: {url}")));
        }
        if parts[1].is_empty() {
            return Err(PermalinkError(format!("empty handle in URL: {url}")));
        }

        let tweet_id = parts[3]
            .parse::<i64>()
            .map_err(|_| PermalinkError(format!("non-numeric tweet id in URL: {url}")))?;

        Ok(Self {
            handle: UserHandle::from(parts[1]),
            tweet_id: TweetId(tweet_id),
        })
    }
}

impl fmt::Display for Permalink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "https://x.com/{}/status/{}", self.handle, self.tweet_id)
    }
}
