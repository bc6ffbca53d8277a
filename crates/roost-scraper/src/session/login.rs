//! The multi-step onboarding flow used to log in.
//!
//! Each response names the next subtask. Most are answered automatically;
//! identity challenges are handed back to the caller as a [`PendingLogin`].

use std::collections::BTreeMap;

use reqwest::header::{AUTHORIZATION, COOKIE};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{
    CSRF_COOKIE, Credentials, Identity, Session, cookie_header, merge_set_cookies, read_response,
};
use crate::{ScraperError, UserHandle};

/// Upper bound on round trips before the flow is considered stuck.
const MAX_LOGIN_STEPS: usize = 12;

#[derive(Debug, Deserialize)]
pub(crate) struct FlowResponse {
    flow_token: String,
    #[serde(default)]
    subtasks: Vec<Subtask>,
}

#[derive(Debug, Deserialize)]
struct Subtask {
    subtask_id: String,
    #[serde(default)]
    open_account: Option<OpenAccount>,
    #[serde(default)]
    enter_text: Option<EnterText>,
    #[serde(default)]
    cta: Option<Cta>,
}

#[derive(Debug, Deserialize)]
struct OpenAccount {
    user: AccountUser,
}

#[derive(Debug, Deserialize)]
struct AccountUser {
    id_str: String,
    screen_name: String,
}

#[derive(Debug, Deserialize)]
struct EnterText {
    #[serde(default)]
    header: Option<TextHeader>,
}

#[derive(Debug, Deserialize)]
struct Cta {
    #[serde(default)]
    primary_text: Option<RichText>,
}

#[derive(Debug, Deserialize)]
struct TextHeader {
    #[serde(default)]
    primary_text: Option<RichText>,
}

#[derive(Debug, Deserialize)]
struct RichText {
    text: String,
}

/// What the flow wants next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoginStep {
    /// Answer `subtask_id` automatically and continue.
    Next { flow_token: String, subtask_id: String },
    /// The flow finished and the account is logged in.
    Success { identity: Identity },
    /// The flow wants text only the account owner can supply.
    Challenge {
        flow_token: String,
        subtask_id: String,
        prompt: String,
    },
}

/// A login paused on an identity challenge.
///
/// Serializable so a caller can persist it while waiting for the user. The
/// password is never written out; restore it with [`PendingLogin::with_password`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingLogin {
    pub handle: UserHandle,
    pub flow_token: String,
    pub subtask_id: String,
    /// Text to show the user.
    pub prompt: String,
    cookies: BTreeMap<String, String>,
    guest_token: String,
    #[serde(skip)]
    password: String,
}

impl PendingLogin {
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }
}

#[derive(Debug)]
pub enum LoginOutcome {
    LoggedIn(Identity),
    Challenge(PendingLogin),
}

/// Cookies and guest token carried between flow requests.
struct FlowState {
    guest_token: String,
    cookies: BTreeMap<String, String>,
}

/// Decide the next step from a flow response.
pub(crate) fn interpret(response: &FlowResponse) -> Result<LoginStep, ScraperError> {
    let subtask = response
        .subtasks
        .first()
        .ok_or_else(|| ScraperError::Auth("login flow returned no subtask".into()))?;

    match subtask.subtask_id.as_str() {
        "LoginSuccessSubtask" => {
            let user = subtask
                .open_account
                .as_ref()
                .map(|account| &account.user)
                .ok_or_else(|| ScraperError::Auth("login succeeded without an account".into()))?;
            Ok(LoginStep::Success {
                identity: Identity {
                    handle: UserHandle::from(user.screen_name.as_str()),
                    user_id: user.id_str.parse()?,
                },
            })
        }
        "LoginEnterAlternateIdentifierSubtask" | "LoginAcid" | "LoginTwoFactorAuthChallenge" => {
            let prompt = subtask
                .enter_text
                .as_ref()
                .and_then(|e| e.header.as_ref())
                .and_then(|h| h.primary_text.as_ref())
                .map(|t| t.text.clone())
                .unwrap_or_else(|| subtask.subtask_id.clone());
            Ok(LoginStep::Challenge {
                flow_token: response.flow_token.clone(),
                subtask_id: subtask.subtask_id.clone(),
                prompt,
            })
        }
        "DenyLoginSubtask" => {
            let reason = subtask
                .cta
                .as_ref()
                .and_then(|c| c.primary_text.as_ref())
                .map(|t| t.text.as_str())
                .unwrap_or("login denied");
            Err(ScraperError::Auth(reason.to_string()))
        }
        other => Ok(LoginStep::Next {
            flow_token: response.flow_token.clone(),
            subtask_id: other.to_string(),
        }),
    }
}

/// The input answering an automatic subtask.
fn subtask_input(subtask_id: &str, handle: &UserHandle, password: &str) -> Result<Value, ScraperError> {
    let input = match subtask_id {
        "LoginJsInstrumentationSubtask" => json!({
            "subtask_id": subtask_id,
            "js_instrumentation": {"response": "{}", "link": "next_link"},
        }),
        "LoginEnterUserIdentifierSSO" => json!({
            "subtask_id": subtask_id,
            "settings_list": {
                "setting_responses": [{
                    "key": "user_identifier",
                    "response_data": {"text_data": {"result": handle.0}},
                }],
                "link": "next_link",
            },
        }),
        "LoginEnterPassword" => {
            if password.is_empty() {
                return Err(ScraperError::Auth("password required to continue login".into()));
            }
            json!({
                "subtask_id": subtask_id,
                "enter_password": {"password": password, "link": "next_link"},
            })
        }
        "AccountDuplicationCheck" => json!({
            "subtask_id": subtask_id,
            "check_logged_in_account": {"link": "AccountDuplicationCheck_false"},
        }),
        other => {
            return Err(ScraperError::Auth(format!("unsupported login subtask {other}")));
        }
    };
    Ok(input)
}

/// Client errors from the flow endpoint mean the credentials were rejected.
fn rejected_as_auth(err: ScraperError) -> ScraperError {
    match err {
        ScraperError::RequestFailed { status, body } if (400..500).contains(&status) => {
            ScraperError::Auth(format!("login rejected ({status}): {body}"))
        }
        other => other,
    }
}

impl Session {
    /// Start a login. Either finishes or stops at an identity challenge.
    #[tracing::instrument(skip_all, fields(handle = %handle))]
    pub async fn login(
        &self,
        handle: &UserHandle,
        password: &str,
    ) -> Result<LoginOutcome, ScraperError> {
        let mut flow = FlowState {
            guest_token: self.guest_token().await?,
            cookies: BTreeMap::new(),
        };
        let start = json!({
            "input_flow_data": {
                "flow_context": {
                    "debug_overrides": {},
                    "start_location": {"location": "unknown"},
                },
            },
            "subtask_versions": {},
        });
        let response = self.flow_request(&mut flow, &start, true).await?;
        self.drive_login(flow, response, handle, password).await
    }

    /// Answer a challenge and continue the flow.
    #[tracing::instrument(skip_all, fields(handle = %pending.handle, subtask = %pending.subtask_id))]
    pub async fn resume_login(
        &self,
        pending: PendingLogin,
        answer: &str,
    ) -> Result<LoginOutcome, ScraperError> {
        let PendingLogin {
            handle,
            flow_token,
            subtask_id,
            cookies,
            guest_token,
            password,
            ..
        } = pending;
        let mut flow = FlowState {
            guest_token,
            cookies,
        };
        let body = json!({
            "flow_token": flow_token,
            "subtask_inputs": [{
                "subtask_id": subtask_id,
                "enter_text": {"text": answer, "link": "next_link"},
            }],
        });
        let response = self.flow_request(&mut flow, &body, false).await?;
        self.drive_login(flow, response, &handle, &password).await
    }

    async fn drive_login(
        &self,
        mut flow: FlowState,
        mut response: FlowResponse,
        handle: &UserHandle,
        password: &str,
    ) -> Result<LoginOutcome, ScraperError> {
        for _ in 0..MAX_LOGIN_STEPS {
            match interpret(&response)? {
                LoginStep::Success { identity } => {
                    let csrf = flow.cookies.get(CSRF_COOKIE).cloned().ok_or_else(|| {
                        ScraperError::Auth("login finished without a csrf cookie".into())
                    })?;
                    info!(handle = %identity.handle, user_id = %identity.user_id, "logged in");
                    self.set_authenticated(Credentials {
                        identity: identity.clone(),
                        cookies: flow.cookies,
                        csrf_token: Some(csrf),
                    })
                    .await;
                    return Ok(LoginOutcome::LoggedIn(identity));
                }
                LoginStep::Challenge {
                    flow_token,
                    subtask_id,
                    prompt,
                } => {
                    info!(subtask = %subtask_id, "login needs a challenge answer");
                    return Ok(LoginOutcome::Challenge(PendingLogin {
                        handle: handle.clone(),
                        flow_token,
                        subtask_id,
                        prompt,
                        cookies: flow.cookies,
                        guest_token: flow.guest_token,
                        password: password.to_string(),
                    }));
                }
                LoginStep::Next {
                    flow_token,
                    subtask_id,
                } => {
                    debug!(subtask = %subtask_id, "answering login subtask");
                    let body = json!({
                        "flow_token": flow_token,
                        "subtask_inputs": [subtask_input(&subtask_id, handle, password)?],
                    });
                    response = self.flow_request(&mut flow, &body, false).await?;
                }
            }
        }
        Err(ScraperError::Auth(format!(
            "login flow did not finish within {MAX_LOGIN_STEPS} steps"
        )))
    }

    async fn flow_request(
        &self,
        flow: &mut FlowState,
        body: &Value,
        start: bool,
    ) -> Result<FlowResponse, ScraperError> {
        let url = format!("{}/1.1/onboarding/task.json", self.config.api_base);
        let mut request = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.bearer())
            .header("x-guest-token", &flow.guest_token)
            .json(body);
        if start {
            request = request.query(&[("flow_name", "login")]);
        }
        if !flow.cookies.is_empty() {
            request = request.header(COOKIE, cookie_header(&flow.cookies));
        }

        let response = request.send().await?;
        merge_set_cookies(&mut flow.cookies, response.headers());
        let bytes = read_response(response).await.map_err(rejected_as_auth)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ScraperConfig, UserId};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn flow(token: &str, subtask: Value) -> Value {
        json!({"flow_token": token, "status": "success", "subtasks": [subtask]})
    }

    fn parse(value: Value) -> FlowResponse {
        serde_json::from_value(value).unwrap()
    }

    async fn mount_step(server: &MockServer, after: &str, reply: Value) {
        Mock::given(method("POST"))
            .and(path("/1.1/onboarding/task.json"))
            .and(body_partial_json(json!({"flow_token": after})))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_start(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/1.1/guest/activate.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"guest_token": "gt"})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1.1/onboarding/task.json"))
            .and(query_param("flow_name", "login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "att=flow; Path=/")
                    .set_body_json(flow("t1", json!({"subtask_id": "LoginJsInstrumentationSubtask"}))),
            )
            .expect(1)
            .mount(server)
            .await;
        mount_step(server, "t1", flow("t2", json!({"subtask_id": "LoginEnterUserIdentifierSSO"}))).await;
        mount_step(server, "t2", flow("t3", json!({"subtask_id": "LoginEnterPassword"}))).await;
    }

    fn success(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .append_header("set-cookie", "ct0=csrf1; Path=/")
            .append_header("set-cookie", "auth_token=tok; Path=/; HttpOnly")
            .set_body_json(flow(
                token,
                json!({
                    "subtask_id": "LoginSuccessSubtask",
                    "open_account": {"user": {"id_str": "42", "screen_name": "me"}},
                }),
            ))
    }

    fn session(server: &MockServer) -> Session {
        Session::new(
            ScraperConfig::default()
                .with_base_url(server.uri())
                .with_guest_token_retries(1, Duration::from_millis(1)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_full_login_flow() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        mount_step(
            &server,
            "t3",
            flow("t4", json!({"subtask_id": "AccountDuplicationCheck"})),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/1.1/onboarding/task.json"))
            .and(body_partial_json(json!({"flow_token": "t4"})))
            .respond_with(success("t5"))
            .mount(&server)
            .await;

        let session = session(&server);
        let outcome = session.login(&UserHandle::from("me"), "hunter2").await.unwrap();
        let LoginOutcome::LoggedIn(identity) = outcome else {
            panic!("expected login to finish");
        };
        assert_eq!(identity.user_id, UserId(42));

        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.credentials.csrf_token.as_deref(), Some("csrf1"));
        assert_eq!(snapshot.credentials.cookies["att"], "flow");
        assert_eq!(snapshot.credentials.cookies["auth_token"], "tok");
    }

    #[tokio::test]
    async fn test_challenge_then_resume() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        mount_step(
            &server,
            "t3",
            flow(
                "acid",
                json!({
                    "subtask_id": "LoginAcid",
                    "enter_text": {"header": {"primary_text": {"text": "Enter your email"}}},
                }),
            ),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/1.1/onboarding/task.json"))
            .and(body_partial_json(json!({"flow_token": "acid"})))
            .respond_with(success("done"))
            .expect(1)
            .mount(&server)
            .await;

        let session = session(&server);
        let outcome = session.login(&UserHandle::from("me"), "hunter2").await.unwrap();
        let LoginOutcome::Challenge(pending) = outcome else {
            panic!("expected a challenge");
        };
        assert_eq!(pending.prompt, "Enter your email");
        assert!(!session.is_authenticated().await);

        let stored = serde_json::to_string(&pending).unwrap();
        assert!(!stored.contains("hunter2"));

        let outcome = session.resume_login(pending, "me@example.com").await.unwrap();
        assert!(matches!(outcome, LoginOutcome::LoggedIn(_)));
        assert!(session.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_rejected_password_is_auth_error() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        Mock::given(method("POST"))
            .and(path("/1.1/onboarding/task.json"))
            .and(body_partial_json(json!({"flow_token": "t3"})))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"errors": [{"code": 399, "message": "Wrong password!"}]})),
            )
            .mount(&server)
            .await;

        let result = session(&server).login(&UserHandle::from("me"), "nope").await;
        assert!(matches!(result, Err(ScraperError::Auth(_))));
    }

    #[test]
    fn test_deny_login_is_auth_error() {
        let response = parse(flow(
            "t",
            json!({"subtask_id": "DenyLoginSubtask", "cta": {"primary_text": {"text": "Suspicious login"}}}),
        ));
        match interpret(&response) {
            Err(ScraperError::Auth(reason)) => assert_eq!(reason, "Suspicious login"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_subtask_cannot_be_answered() {
        let response = parse(flow("t", json!({"subtask_id": "SomethingNew"})));
        let LoginStep::Next { subtask_id, .. } = interpret(&response).unwrap() else {
            panic!("expected a next step");
        };
        assert!(matches!(
            subtask_input(&subtask_id, &UserHandle::from("me"), "pw"),
            Err(ScraperError::Auth(_))
        ));
    }

    #[test]
    fn test_empty_subtasks_is_auth_error() {
        let response = parse(json!({"flow_token": "t", "subtasks": []}));
        assert!(matches!(interpret(&response), Err(ScraperError::Auth(_))));
    }
}
