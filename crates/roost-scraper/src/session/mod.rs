//! Guest and authenticated sessions.
//!
//! A [`Session`] owns the HTTP client, the cached guest token and, once
//! logged in, the account cookies and rotating CSRF token. All mutable state
//! sits behind async locks so one session can be shared between tasks.

mod login;

pub use login::{LoginOutcome, PendingLogin};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, SET_COOKIE};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::wire::ApiError;
use crate::{ScraperConfig, ScraperError, UserHandle, UserId};

/// Cookie the CSRF token is mirrored from.
const CSRF_COOKIE: &str = "ct0";

/// Upstream error code for an expired or rejected guest token.
const GUEST_TOKEN_REJECTED: i64 = 239;

/// Upstream error code for "Could not authenticate you".
const COULD_NOT_AUTHENTICATE: i64 = 32;

/// Used when a 429 carries no usable reset header.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(15 * 60);

/// The logged-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub handle: UserHandle,
    pub user_id: UserId,
}

/// Cookies and CSRF token of an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub identity: Identity,
    pub cookies: BTreeMap<String, String>,
    pub csrf_token: Option<String>,
}

impl Credentials {
    fn cookie_header(&self) -> String {
        cookie_header(&self.cookies)
    }
}

/// Everything needed to resume an authenticated session after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub credentials: Credentials,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn handle(&self) -> &UserHandle {
        &self.credentials.identity.handle
    }

    /// Encode as an opaque blob (base64 of the JSON form).
    pub fn to_blob(&self) -> Result<String, ScraperError> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    pub fn from_blob(blob: &str) -> Result<Self, ScraperError> {
        let bytes = STANDARD
            .decode(blob.trim())
            .map_err(|e| ScraperError::Decode(format!("invalid session blob: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug)]
enum SessionState {
    Guest,
    Authenticated(Credentials),
}

#[derive(Debug)]
struct GuestToken {
    value: String,
    acquired_at: Instant,
}

#[derive(Debug, Deserialize)]
struct GuestTokenResponse {
    guest_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ApiError>,
}

fn error_codes(body: &str) -> Vec<i64> {
    serde_json::from_str::<ErrorBody>(body)
        .unwrap_or_default()
        .errors
        .into_iter()
        .map(|e| e.code)
        .collect()
}

fn cookie_header(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Apply `Set-Cookie` headers. An empty value deletes the cookie.
fn merge_set_cookies(cookies: &mut BTreeMap<String, String>, headers: &HeaderMap) {
    for header in headers.get_all(SET_COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        let pair = raw.split(';').next().unwrap_or_default();
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if value.is_empty() {
            cookies.remove(name);
        } else {
            cookies.insert(name.to_string(), value.to_string());
        }
    }
}

/// When a rate-limited request may be retried.
///
/// Prefers the `x-rate-limit-reset` epoch, then `Retry-After` seconds.
fn rate_limit_resume_at(headers: &HeaderMap, now: DateTime<Utc>) -> DateTime<Utc> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
    };
    if let Some(reset) = header("x-rate-limit-reset").and_then(|s| DateTime::from_timestamp(s, 0)) {
        return reset;
    }
    if let Some(secs) = header("retry-after") {
        return now + chrono::Duration::seconds(secs);
    }
    now + chrono::Duration::from_std(DEFAULT_RATE_LIMIT_WAIT).unwrap_or_default()
}

/// Classify a non-2xx response.
pub fn classify_failure(
    status: u16,
    headers: &HeaderMap,
    body: &str,
    now: DateTime<Utc>,
) -> ScraperError {
    match status {
        429 => ScraperError::RateLimited {
            resume_at: rate_limit_resume_at(headers, now),
        },
        401 if error_codes(body).contains(&COULD_NOT_AUTHENTICATE)
            || body.contains("Could not authenticate you") =>
        {
            ScraperError::SessionInvalidated
        }
        _ => ScraperError::RequestFailed {
            status,
            body: body.to_string(),
        },
    }
}

/// Read a response body, classifying any non-2xx status.
async fn read_response(response: reqwest::Response) -> Result<Vec<u8>, ScraperError> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;
    if status.is_success() {
        return Ok(body.to_vec());
    }
    let text = String::from_utf8_lossy(&body);
    let err = classify_failure(status.as_u16(), &headers, &text, Utc::now());
    debug!(status = status.as_u16(), error = %err, "request failed");
    Err(err)
}

/// A guest or authenticated session against the upstream API.
#[derive(Clone)]
pub struct Session {
    http: Client,
    config: ScraperConfig,
    state: Arc<RwLock<SessionState>>,
    guest_token: Arc<Mutex<Option<GuestToken>>>,
}

impl Session {
    /// Create a guest session.
    pub fn new(config: ScraperConfig) -> Result<Self, ScraperError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            config,
            state: Arc::new(RwLock::new(SessionState::Guest)),
            guest_token: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.config.bearer_token)
    }

    pub async fn is_authenticated(&self) -> bool {
        matches!(*self.state.read().await, SessionState::Authenticated(_))
    }

    /// The logged-in account, if any.
    pub async fn identity(&self) -> Option<Identity> {
        match &*self.state.read().await {
            SessionState::Authenticated(creds) => Some(creds.identity.clone()),
            SessionState::Guest => None,
        }
    }

    /// Fail with `NotAuthenticated` unless logged in.
    pub async fn require_identity(&self) -> Result<Identity, ScraperError> {
        self.identity().await.ok_or(ScraperError::NotAuthenticated)
    }

    /// Snapshot the authenticated state for persistence.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        match &*self.state.read().await {
            SessionState::Authenticated(credentials) => Some(SessionSnapshot {
                credentials: credentials.clone(),
                saved_at: Utc::now(),
            }),
            SessionState::Guest => None,
        }
    }

    /// Resume a previously saved authenticated session.
    pub async fn restore(&self, snapshot: SessionSnapshot) {
        info!(handle = %snapshot.handle(), saved_at = %snapshot.saved_at, "restored session");
        *self.state.write().await = SessionState::Authenticated(snapshot.credentials);
    }

    /// Drop credentials and return to guest mode.
    pub async fn logout(&self) {
        *self.state.write().await = SessionState::Guest;
    }

    async fn set_authenticated(&self, credentials: Credentials) {
        *self.state.write().await = SessionState::Authenticated(credentials);
    }

    /// The cached guest token, activating a new one if missing or stale.
    pub async fn guest_token(&self) -> Result<String, ScraperError> {
        let mut cached = self.guest_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.acquired_at.elapsed() < self.config.guest_token_ttl() {
                return Ok(token.value.clone());
            }
            debug!("guest token expired");
        }

        let value = self.activate_guest_token().await?;
        *cached = Some(GuestToken {
            value: value.clone(),
            acquired_at: Instant::now(),
        });
        Ok(value)
    }

    /// Forget the cached guest token so the next request activates a new one.
    pub async fn invalidate_guest_token(&self) {
        *self.guest_token.lock().await = None;
    }

    /// Activate a guest token, retrying transport failures with a fixed backoff.
    async fn activate_guest_token(&self) -> Result<String, ScraperError> {
        let attempts = self.config.guest_token_attempts.max(1);
        let backoff = self.config.guest_token_backoff();
        let mut attempt = 1;
        loop {
            match self.request_guest_token().await {
                Ok(token) => {
                    debug!(attempt, "activated guest token");
                    return Ok(token);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        attempt,
                        backoff_ms = self.config.guest_token_backoff_ms,
                        error = %e,
                        "guest token request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_guest_token(&self) -> Result<String, ScraperError> {
        let url = format!("{}/1.1/guest/activate.json", self.config.api_base);
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;
        let body = read_response(response).await?;
        let parsed: GuestTokenResponse = serde_json::from_slice(&body)?;
        Ok(parsed.guest_token)
    }

    /// GET `url` as whichever identity the session currently holds.
    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>, ScraperError> {
        if self.is_authenticated().await {
            self.get_authenticated(url, query).await
        } else {
            self.get_as_guest(url, query).await
        }
    }

    async fn get_as_guest(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, ScraperError> {
        let mut refreshed = false;
        loop {
            let token = self.guest_token().await?;
            let response = self
                .http
                .get(url)
                .query(query)
                .header(AUTHORIZATION, self.bearer())
                .header("x-guest-token", &token)
                .send()
                .await?;

            match read_response(response).await {
                Err(ScraperError::RequestFailed { status: 403, body })
                    if !refreshed && error_codes(&body).contains(&GUEST_TOKEN_REJECTED) =>
                {
                    warn!("guest token rejected, activating a new one");
                    self.invalidate_guest_token().await;
                    refreshed = true;
                }
                other => return other,
            }
        }
    }

    async fn get_authenticated(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, ScraperError> {
        let (cookies, csrf) = {
            let state = self.state.read().await;
            let SessionState::Authenticated(credentials) = &*state else {
                return Err(ScraperError::NotAuthenticated);
            };
            let csrf = credentials
                .csrf_token
                .clone()
                .ok_or(ScraperError::MissingCsrfToken)?;
            (credentials.cookie_header(), csrf)
        };

        let response = self
            .http
            .get(url)
            .query(query)
            .header(AUTHORIZATION, self.bearer())
            .header("x-csrf-token", &csrf)
            .header("x-twitter-auth-type", "OAuth2Session")
            .header(COOKIE, cookies)
            .send()
            .await?;

        self.absorb_cookies(response.headers()).await;
        read_response(response).await
    }

    /// Merge response cookies and re-derive the CSRF token from them.
    async fn absorb_cookies(&self, headers: &HeaderMap) {
        let mut state = self.state.write().await;
        if let SessionState::Authenticated(credentials) = &mut *state {
            merge_set_cookies(&mut credentials.cookies, headers);
            // A jar without ct0 keeps the token it was restored with.
            if let Some(rotated) = credentials.cookies.get(CSRF_COOKIE) {
                if credentials.csrf_token.as_ref() != Some(rotated) {
                    debug!("csrf token rotated");
                    credentials.csrf_token = Some(rotated.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> ScraperConfig {
        ScraperConfig::default()
            .with_base_url(server.uri())
            .with_guest_token_retries(3, Duration::from_millis(10))
    }

    fn credentials(csrf: Option<&str>) -> Credentials {
        let mut cookies = BTreeMap::new();
        cookies.insert("auth_token".to_string(), "secret".to_string());
        if let Some(csrf) = csrf {
            cookies.insert("ct0".to_string(), csrf.to_string());
        }
        Credentials {
            identity: Identity {
                handle: UserHandle::from("me"),
                user_id: UserId(1),
            },
            cookies,
            csrf_token: csrf.map(str::to_string),
        }
    }

    async fn mount_guest_token(server: &MockServer, token: &str, expected: u64) {
        Mock::given(method("POST"))
            .and(path("/1.1/guest/activate.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"guest_token": token})))
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_guest_token_is_cached() {
        let server = MockServer::start().await;
        mount_guest_token(&server, "gt1", 1).await;

        let session = Session::new(config(&server)).unwrap();
        assert_eq!(session.guest_token().await.unwrap(), "gt1");
        assert_eq!(session.guest_token().await.unwrap(), "gt1");
    }

    #[tokio::test]
    async fn test_guest_token_http_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1.1/guest/activate.json"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .expect(1)
            .mount(&server)
            .await;

        let session = Session::new(config(&server)).unwrap();
        assert!(matches!(
            session.guest_token().await,
            Err(ScraperError::RequestFailed { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_rejected_guest_token_is_refreshed_once() {
        let server = MockServer::start().await;
        mount_guest_token(&server, "gt", 2).await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({"errors": [{"code": 239, "message": "Bad guest token"}]})),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let session = Session::new(config(&server)).unwrap();
        let body = session.get(&format!("{}/feed", server.uri()), &[]).await.unwrap();
        assert_eq!(body, b"{}");
    }

    #[tokio::test]
    async fn test_missing_csrf_is_hard_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let session = Session::new(config(&server)).unwrap();
        session
            .restore(SessionSnapshot {
                credentials: credentials(None),
                saved_at: Utc::now(),
            })
            .await;

        let result = session.get(&format!("{}/bookmarks", server.uri()), &[]).await;
        assert!(matches!(result, Err(ScraperError::MissingCsrfToken)));
    }

    #[tokio::test]
    async fn test_csrf_rotates_from_response_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bookmarks"))
            .and(header("x-csrf-token", "old"))
            .and(header("x-twitter-auth-type", "OAuth2Session"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "ct0=new; Path=/; Secure")
                    .set_body_string("{}"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let session = Session::new(config(&server)).unwrap();
        session
            .restore(SessionSnapshot {
                credentials: credentials(Some("old")),
                saved_at: Utc::now(),
            })
            .await;
        session
            .get(&format!("{}/bookmarks", server.uri()), &[])
            .await
            .unwrap();

        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.credentials.csrf_token.as_deref(), Some("new"));
        assert_eq!(snapshot.credentials.cookies["auth_token"], "secret");
    }

    #[tokio::test]
    async fn test_csrf_kept_when_jar_has_no_ct0() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bookmarks"))
            .and(header("x-csrf-token", "saved"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "lang=en; Path=/")
                    .set_body_string("{}"),
            )
            .expect(2)
            .mount(&server)
            .await;

        let mut creds = credentials(None);
        creds.csrf_token = Some("saved".to_string());
        let session = Session::new(config(&server)).unwrap();
        session
            .restore(SessionSnapshot {
                credentials: creds,
                saved_at: Utc::now(),
            })
            .await;

        let url = format!("{}/bookmarks", server.uri());
        session.get(&url, &[]).await.unwrap();
        session.get(&url, &[]).await.unwrap();

        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.credentials.csrf_token.as_deref(), Some("saved"));
        assert_eq!(snapshot.credentials.cookies["lang"], "en");
    }

    #[tokio::test]
    async fn test_session_invalidated_on_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/likes"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(
                    json!({"errors": [{"code": 32, "message": "Could not authenticate you."}]}),
                ),
            )
            .mount(&server)
            .await;

        let session = Session::new(config(&server)).unwrap();
        session
            .restore(SessionSnapshot {
                credentials: credentials(Some("tok")),
                saved_at: Utc::now(),
            })
            .await;
        let result = session.get(&format!("{}/likes", server.uri()), &[]).await;
        assert!(matches!(result, Err(ScraperError::SessionInvalidated)));
    }

    #[test]
    fn test_classify_rate_limit_prefers_reset_header() {
        let now = Utc::now();
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-reset", HeaderValue::from_static("1700000000"));
        headers.insert("retry-after", HeaderValue::from_static("30"));
        match classify_failure(429, &headers, "", now) {
            ScraperError::RateLimited { resume_at } => assert_eq!(resume_at.timestamp(), 1_700_000_000),
            other => panic!("unexpected {other:?}"),
        }

        headers.remove("x-rate-limit-reset");
        match classify_failure(429, &headers, "", now) {
            ScraperError::RateLimited { resume_at } => {
                assert_eq!(resume_at, now + chrono::Duration::seconds(30))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_generic_401_is_not_invalidation() {
        let err = classify_failure(401, &HeaderMap::new(), "{\"errors\":[{\"code\":89}]}", Utc::now());
        assert!(matches!(err, ScraperError::RequestFailed { status: 401, .. }));
        let err = classify_failure(404, &HeaderMap::new(), "nope", Utc::now());
        assert!(matches!(err, ScraperError::RequestFailed { status: 404, .. }));
    }

    #[test]
    fn test_snapshot_blob() {
        let snapshot = SessionSnapshot {
            credentials: credentials(Some("tok")),
            saved_at: Utc::now(),
        };
        let blob = snapshot.to_blob().unwrap();
        assert!(!blob.contains("auth_token"));
        assert_eq!(SessionSnapshot::from_blob(&blob).unwrap(), snapshot);
        assert!(matches!(
            SessionSnapshot::from_blob("not base64!"),
            Err(ScraperError::Decode(_))
        ));
    }

    #[test]
    fn test_set_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("ct0=abc; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("gone=; Max-Age=0"));
        let mut cookies = BTreeMap::new();
        cookies.insert("gone".to_string(), "x".to_string());
        merge_set_cookies(&mut cookies, &headers);
        assert_eq!(cookies.get("ct0").map(String::as_str), Some("abc"));
        assert!(!cookies.contains_key("gone"));
        assert_eq!(cookie_header(&cookies), "ct0=abc");
    }
}
