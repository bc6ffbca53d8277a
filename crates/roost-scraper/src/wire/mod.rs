//! Wire shapes for the two upstream API generations.
//!
//! Nothing outside [`crate::normalize`] reads these types; domain code only
//! sees normalized entities. Each resource kind has a single decode entry
//! point that detects which generation produced the body.

pub mod graphql;
pub mod legacy;

use serde::Deserialize;
use serde_json::Value;

use crate::{Cursor, ScraperError};
use graphql::{AudioSpace, GraphqlResponse, GraphqlUser, Timeline, UserResult};
use legacy::{ApiUser, LegacyResponse};

/// An entry in an upstream `errors` array.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl ApiError {
    fn into_error(self, target: &str) -> ScraperError {
        match self.code {
            34 | 50 | 144 => ScraperError::NotFound(target.to_string()),
            63 => ScraperError::UserBanned(target.to_string()),
            _ => ScraperError::RequestFailed {
                status: 200,
                body: format!("upstream error {}: {}", self.code, self.message),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorsOnly {
    #[serde(default)]
    errors: Vec<ApiError>,
}

/// A timeline page in either generation.
#[derive(Debug)]
pub enum TimelineResponse {
    Legacy(Box<LegacyResponse>),
    Graphql(Box<GraphqlResponse>),
}

impl TimelineResponse {
    pub fn content_entry_ids(&self) -> Vec<String> {
        match self {
            TimelineResponse::Legacy(r) => r.content_entry_ids(),
            TimelineResponse::Graphql(r) => r
                .timeline()
                .map(Timeline::content_entry_ids)
                .unwrap_or_default(),
        }
    }

    pub fn bottom_cursor(&self) -> Option<Cursor> {
        match self {
            TimelineResponse::Legacy(r) => r.bottom_cursor(),
            TimelineResponse::Graphql(r) => r.timeline()?.bottom_cursor(),
        }
    }
}

/// A user profile in either generation.
#[derive(Debug)]
pub enum UserResponse {
    Legacy(Box<ApiUser>),
    Graphql(Box<GraphqlUser>),
}

enum Shape {
    Legacy,
    Graphql,
    ErrorsOnly,
}

fn detect(value: &Value) -> Result<Shape, ScraperError> {
    let object = value
        .as_object()
        .ok_or_else(|| ScraperError::Decode("response body is not a JSON object".into()))?;
    if object.contains_key("globalObjects") {
        Ok(Shape::Legacy)
    } else if object.contains_key("data") {
        Ok(Shape::Graphql)
    } else if object.contains_key("errors") {
        Ok(Shape::ErrorsOnly)
    } else {
        let keys: Vec<&str> = object.keys().map(String::as_str).collect();
        Err(ScraperError::Decode(format!(
            "unrecognized response shape with keys {keys:?}"
        )))
    }
}

fn first_error(errors: Vec<ApiError>, target: &str) -> ScraperError {
    match errors.into_iter().next() {
        Some(error) => error.into_error(target),
        None => ScraperError::Decode("empty errors array".into()),
    }
}

fn unavailable_user(reason: &str, target: &str) -> ScraperError {
    match reason {
        "Suspended" => ScraperError::UserBanned(target.to_string()),
        _ => ScraperError::UserDeleted(target.to_string()),
    }
}

/// Decode one timeline page (feed, likes, bookmarks, thread, notifications).
pub fn decode_timeline(body: &[u8], target: &str) -> Result<TimelineResponse, ScraperError> {
    let value: Value = serde_json::from_slice(body)?;
    match detect(&value)? {
        Shape::Legacy => Ok(TimelineResponse::Legacy(Box::new(serde_json::from_value(
            value,
        )?))),
        Shape::ErrorsOnly => {
            let ErrorsOnly { errors } = serde_json::from_value(value)?;
            Err(first_error(errors, target))
        }
        Shape::Graphql => {
            let response: GraphqlResponse = serde_json::from_value(value)?;
            if response.timeline().is_some() {
                return Ok(TimelineResponse::Graphql(Box::new(response)));
            }
            if let Some(UserResult::UserUnavailable { reason, .. }) = response
                .data
                .user
                .as_ref()
                .and_then(|u| u.result.as_ref())
            {
                return Err(unavailable_user(reason, target));
            }
            if !response.errors.is_empty() {
                return Err(first_error(response.errors, target));
            }
            if response.data.user.is_some() {
                return Err(ScraperError::NotFound(target.to_string()));
            }
            Err(ScraperError::Decode(format!(
                "response for {target} carries no timeline"
            )))
        }
    }
}

/// Decode a user profile lookup.
pub fn decode_user(body: &[u8], target: &str) -> Result<UserResponse, ScraperError> {
    let value: Value = serde_json::from_slice(body)?;
    let object = value
        .as_object()
        .ok_or_else(|| ScraperError::Decode("response body is not a JSON object".into()))?;

    if object.contains_key("screen_name") {
        return Ok(UserResponse::Legacy(Box::new(serde_json::from_value(value)?)));
    }
    match detect(&value)? {
        Shape::Graphql => {
            let response: GraphqlResponse = serde_json::from_value(value)?;
            match response.data.user.and_then(|u| u.result) {
                Some(UserResult::User(user)) => Ok(UserResponse::Graphql(user)),
                Some(UserResult::UserUnavailable { reason, .. }) => {
                    Err(unavailable_user(&reason, target))
                }
                None if !response.errors.is_empty() => Err(first_error(response.errors, target)),
                None => Err(ScraperError::NotFound(target.to_string())),
            }
        }
        Shape::ErrorsOnly => {
            let ErrorsOnly { errors } = serde_json::from_value(value)?;
            Err(first_error(errors, target))
        }
        Shape::Legacy => Err(ScraperError::Decode(
            "timeline response where a user was expected".into(),
        )),
    }
}

/// Decode an audio space detail lookup.
pub fn decode_space(body: &[u8], target: &str) -> Result<AudioSpace, ScraperError> {
    let response: GraphqlResponse = serde_json::from_slice(body)?;
    match response.data.audio_space {
        Some(space) => Ok(space),
        None if !response.errors.is_empty() => Err(first_error(response.errors, target)),
        None => Err(ScraperError::NotFound(target.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_legacy_shape() {
        let body = br#"{"globalObjects": {"tweets": {}}, "timeline": {"instructions": []}}"#;
        assert!(matches!(
            decode_timeline(body, "t").unwrap(),
            TimelineResponse::Legacy(_)
        ));
    }

    #[test]
    fn test_detects_nested_shape() {
        let body = br#"{"data": {"threaded_conversation_with_injections_v2": {"instructions": []}}}"#;
        assert!(matches!(
            decode_timeline(body, "t").unwrap(),
            TimelineResponse::Graphql(_)
        ));
    }

    #[test]
    fn test_errors_only_body_maps_to_domain_error() {
        let body = br#"{"errors": [{"code": 144, "message": "No status found with that ID."}]}"#;
        assert!(matches!(
            decode_timeline(body, "1").unwrap_err(),
            ScraperError::NotFound(_)
        ));
    }

    #[test]
    fn test_suspended_user_is_banned() {
        let body = br#"{"data": {"user": {"result": {"__typename": "UserUnavailable", "reason": "Suspended"}}}}"#;
        assert!(matches!(
            decode_user(body, "someone").unwrap_err(),
            ScraperError::UserBanned(_)
        ));
        assert!(matches!(
            decode_timeline(body, "someone").unwrap_err(),
            ScraperError::UserBanned(_)
        ));
    }

    #[test]
    fn test_missing_user_is_not_found() {
        let body = br#"{"data": {"user": {}}}"#;
        assert!(matches!(
            decode_user(body, "nobody").unwrap_err(),
            ScraperError::NotFound(_)
        ));
    }

    #[test]
    fn test_legacy_user_shape() {
        let body = br#"{"id_str": "12", "screen_name": "someone", "followers_count": 4}"#;
        match decode_user(body, "someone").unwrap() {
            UserResponse::Legacy(user) => assert_eq!(user.followers_count, 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_mistyped_field_is_structural_error() {
        let body = br#"{"globalObjects": {"tweets": {"1": {"id_str": "1", "reply_count": "many"}}}}"#;
        assert!(matches!(
            decode_timeline(body, "t").unwrap_err(),
            ScraperError::Json(_)
        ));
    }
}
