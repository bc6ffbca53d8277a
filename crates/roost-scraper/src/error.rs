//! Error types for the scraper.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while fetching, decoding or assembling a trove.
#[derive(Debug, Error)]
pub enum ScraperError {
    /// The request exceeded the per-request timeout.
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure (DNS, TLS, reset).
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Rate limited (HTTP 429).
    #[error("rate limited (resume after {resume_at})")]
    RateLimited {
        /// Earliest time a retry may succeed.
        resume_at: DateTime<Utc>,
    },

    /// HTTP 401 with the upstream "could not authenticate" body.
    #[error("session invalidated: upstream could not authenticate the session")]
    SessionInvalidated,

    /// Any other non-2xx response.
    #[error("request failed ({status}): {body}")]
    RequestFailed { status: u16, body: String },

    /// JSON body did not match the expected wire shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response decoded but a value could not be interpreted.
    #[error("decode error: {0}")]
    Decode(String),

    /// The requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The user account is suspended.
    #[error("user is banned: {0}")]
    UserBanned(String),

    /// The user account has been deleted or deactivated.
    #[error("user is deleted: {0}")]
    UserDeleted(String),

    /// The tweet exists but cannot be viewed.
    #[error("tweet unavailable: {0}")]
    TweetUnavailable(String),

    /// A state the decoder must never reach. Never coerced into a guess.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// An operation required an authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Authenticated request attempted with no CSRF token set.
    #[error("authenticated request attempted without a CSRF token")]
    MissingCsrfToken,

    /// Login flow failure.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// IO error (session store).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A failure annotated with the operation and target it happened on.
    #[error("{operation} failed for {target}: {source}")]
    Operation {
        operation: &'static str,
        target: String,
        #[source]
        source: Box<ScraperError>,
    },
}

/// Broad classification of a [`ScraperError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeout or connection failure. Retryable by the caller.
    Transport,
    /// Unexpected status or malformed body. Fatal to the current request.
    Protocol,
    /// Not-found, banned, deleted or unavailable.
    Domain,
    /// Upstream rate limit; carries a resume time.
    RateLimit,
    /// Decoder bug or impossible state.
    Invariant,
    /// Missing or invalid credentials.
    Auth,
}

impl ScraperError {
    /// Classify this error, looking through operation context.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScraperError::Timeout | ScraperError::Network(_) => ErrorKind::Transport,
            ScraperError::RequestFailed { .. }
            | ScraperError::Json(_)
            | ScraperError::Decode(_)
            | ScraperError::Io(_) => ErrorKind::Protocol,
            ScraperError::NotFound(_)
            | ScraperError::UserBanned(_)
            | ScraperError::UserDeleted(_)
            | ScraperError::TweetUnavailable(_) => ErrorKind::Domain,
            ScraperError::RateLimited { .. } => ErrorKind::RateLimit,
            ScraperError::InvariantViolation(_) => ErrorKind::Invariant,
            ScraperError::SessionInvalidated
            | ScraperError::NotAuthenticated
            | ScraperError::MissingCsrfToken
            | ScraperError::Auth(_) => ErrorKind::Auth,
            ScraperError::Operation { source, .. } => source.kind(),
        }
    }

    /// Whether the caller may retry the same request as-is.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// The innermost error, with operation context removed.
    pub fn root(&self) -> &ScraperError {
        match self {
            ScraperError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Resume time, if this is (or wraps) a rate-limit error.
    pub fn resume_at(&self) -> Option<DateTime<Utc>> {
        match self.root() {
            ScraperError::RateLimited { resume_at } => Some(*resume_at),
            _ => None,
        }
    }

    /// Attach the failing operation and its target id.
    pub fn context(self, operation: &'static str, target: impl fmt::Display) -> Self {
        ScraperError::Operation {
            operation,
            target: target.to_string(),
            source: Box::new(self),
        }
    }
}

impl From<reqwest::Error> for ScraperError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ScraperError::Timeout
        } else {
            ScraperError::Network(err)
        }
    }
}

/// Adds `.context(operation, target)` to results.
pub(crate) trait ResultExt<T> {
    fn context(self, operation: &'static str, target: impl fmt::Display) -> Result<T, ScraperError>;
}

impl<T> ResultExt<T> for Result<T, ScraperError> {
    fn context(self, operation: &'static str, target: impl fmt::Display) -> Result<T, ScraperError> {
        self.map_err(|e| e.context(operation, target))
    }
}
