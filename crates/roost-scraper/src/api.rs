//! Upstream endpoints and the fetch operations built on them.
//!
//! Every operation goes through one [`Session`], decodes with [`crate::wire`]
//! and normalizes into a [`Trove`]. Paginated operations return a
//! [`Harvest`] so callers can tell a finished feed from an interrupted one.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::error::ResultExt;
use crate::normalize::{TimelineKind, space_to_trove, timeline_to_trove, user_from_response};
use crate::pagination::{Harvest, Hydrator, PaginatedQuery, collect};
use crate::wire::{TimelineResponse, decode_space, decode_timeline, decode_user};
use crate::{
    Cursor, Permalink, ScraperError, Session, SpaceId, Trove, TweetId, User, UserHandle, UserId,
};

/// A persisted GraphQL query: its operation name and the hash the server knows it by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphqlOperation {
    pub name: &'static str,
    pub query_id: &'static str,
}

pub const USER_BY_SCREEN_NAME: GraphqlOperation = GraphqlOperation {
    name: "UserByScreenName",
    query_id: "xmU6X_CKVnQ5lSrCbAmJsg",
};
pub const USER_TWEETS: GraphqlOperation = GraphqlOperation {
    name: "UserTweets",
    query_id: "E3opETHurmVJflFsUBVuUQ",
};
pub const TWEET_DETAIL: GraphqlOperation = GraphqlOperation {
    name: "TweetDetail",
    query_id: "xOhkmRac04YFZmOzU9PJHg",
};
pub const LIKES: GraphqlOperation = GraphqlOperation {
    name: "Likes",
    query_id: "aeJWz--kknVBOl7wQ7gh7Q",
};
pub const BOOKMARKS: GraphqlOperation = GraphqlOperation {
    name: "Bookmarks",
    query_id: "xLjCVTqYWz8CGSprLU349w",
};
pub const AUDIO_SPACE_BY_ID: GraphqlOperation = GraphqlOperation {
    name: "AudioSpaceById",
    query_id: "gpc0LEdR6URXZ7HOo42_bQ",
};

const NOTIFICATIONS_PATH: &str = "/2/notifications/all.json";

/// Feature switches sent with every GraphQL query.
static FEATURES: LazyLock<String> = LazyLock::new(|| {
    json!({
        "responsive_web_graphql_exclude_directive_enabled": true,
        "verified_phone_label_enabled": false,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "communities_web_enable_tweet_community_results_fetch": true,
        "c9s_tweet_anatomy_moderator_badge_enabled": true,
        "tweetypie_unmention_optimization_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "responsive_web_twitter_article_tweet_consumption_enabled": true,
        "tweet_awards_web_tipping_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "rweb_video_timestamps_enabled": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "responsive_web_enhance_cards_enabled": false,
        "spaces_2022_h2_spaces_communities": true,
        "spaces_2022_h2_clipping": true,
        "hidden_profile_likes_enabled": true,
        "hidden_profile_subscriptions_enabled": true,
        "highlights_tweets_tab_ui_enabled": true,
        "subscriptions_verification_info_is_identity_verified_enabled": true,
        "subscriptions_verification_info_verified_since_enabled": true,
    })
    .to_string()
});

/// Query parameters for a GraphQL request, with `cursor` merged into the variables.
pub fn graphql_params(variables: &Value, cursor: Option<&Cursor>) -> Vec<(&'static str, String)> {
    let mut variables = variables.clone();
    if let Some(cursor) = cursor {
        if let Some(map) = variables.as_object_mut() {
            map.insert("cursor".to_string(), Value::String(cursor.0.clone()));
        }
    }
    vec![
        ("variables", variables.to_string()),
        ("features", FEATURES.clone()),
    ]
}

/// Query parameters every legacy REST timeline accepts.
fn legacy_params(count: usize) -> Vec<(&'static str, String)> {
    [
        ("include_profile_interstitial_type", "1"),
        ("include_blocking", "1"),
        ("include_blocked_by", "1"),
        ("include_followed_by", "1"),
        ("include_want_retweets", "1"),
        ("include_mute_edge", "1"),
        ("include_can_dm", "1"),
        ("include_can_media_tag", "1"),
        ("skip_status", "1"),
        ("cards_platform", "Web-12"),
        ("include_cards", "1"),
        ("include_ext_alt_text", "true"),
        ("include_quote_count", "true"),
        ("include_reply_count", "1"),
        ("tweet_mode", "extended"),
        ("include_entities", "true"),
        ("include_user_entities", "true"),
        ("include_ext_media_availability", "true"),
        ("send_error_codes", "true"),
        ("simple_quoted_tweet", "true"),
    ]
    .into_iter()
    .map(|(k, v)| (k, v.to_string()))
    .chain(std::iter::once(("count", count.to_string())))
    .collect()
}

#[derive(Debug, Clone)]
enum Request {
    Graphql { url: String, variables: Value },
    Rest { url: String, params: Vec<(&'static str, String)> },
}

/// One paginated timeline endpoint.
pub struct TimelineQuery<'a> {
    session: &'a Session,
    request: Request,
    kind: TimelineKind,
    target: String,
}

impl TimelineQuery<'_> {
    fn params(&self, cursor: Option<&Cursor>) -> Vec<(&'static str, String)> {
        match &self.request {
            Request::Graphql { variables, .. } => graphql_params(variables, cursor),
            Request::Rest { params, .. } => {
                let mut params = params.clone();
                if let Some(cursor) = cursor {
                    params.push(("cursor", cursor.0.clone()));
                }
                params
            }
        }
    }

    fn url(&self) -> &str {
        match &self.request {
            Request::Graphql { url, .. } | Request::Rest { url, .. } => url,
        }
    }
}

#[async_trait]
impl<'a> PaginatedQuery for TimelineQuery<'a> {
    type Page = TimelineResponse;

    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<TimelineResponse, ScraperError> {
        let body = self.session.get(self.url(), &self.params(cursor)).await?;
        decode_timeline(&body, &self.target)
    }

    fn content_entry_ids(&self, page: &TimelineResponse) -> Vec<String> {
        page.content_entry_ids()
    }

    fn bottom_cursor(&self, page: &TimelineResponse) -> Option<Cursor> {
        page.bottom_cursor()
    }

    fn to_trove(&self, page: &TimelineResponse) -> Result<Trove, ScraperError> {
        timeline_to_trove(page, &self.kind)
    }

    fn describe(&self) -> String {
        format!("{:?} {}", self.kind, self.target)
    }
}

/// Fetch operations over one session.
#[derive(Clone)]
pub struct Scraper {
    session: Session,
}

impl Scraper {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn graphql_url(&self, operation: GraphqlOperation) -> String {
        format!(
            "{}/graphql/{}/{}",
            self.session.config().graphql_base,
            operation.query_id,
            operation.name
        )
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}{}", self.session.config().api_base, path)
    }

    fn graphql_query(
        &self,
        operation: GraphqlOperation,
        variables: Value,
        kind: TimelineKind,
        target: impl ToString,
    ) -> TimelineQuery<'_> {
        TimelineQuery {
            session: &self.session,
            request: Request::Graphql {
                url: self.graphql_url(operation),
                variables,
            },
            kind,
            target: target.to_string(),
        }
    }

    fn page_size(&self) -> usize {
        self.session.config().page_size
    }

    async fn harvest(
        &self,
        query: &TimelineQuery<'_>,
        min_entries: usize,
    ) -> Result<Harvest, ScraperError> {
        let mut harvest = collect(
            query,
            min_entries,
            self.session.config().max_pages,
            Some(self as &dyn Hydrator),
        )
        .await?;
        harvest.trove.stamp_scraped(Utc::now());
        Ok(harvest)
    }

    /// Look up a profile by handle.
    pub async fn user_by_handle(&self, handle: &UserHandle) -> Result<User, ScraperError> {
        let variables = json!({
            "screen_name": handle.0,
            "withSafetyModeUserFields": true,
        });
        let body = self
            .session
            .get(
                &self.graphql_url(USER_BY_SCREEN_NAME),
                &graphql_params(&variables, None),
            )
            .await
            .context("user_by_handle", handle)?;
        let response = decode_user(&body, &handle.0).context("user_by_handle", handle)?;
        let user = user_from_response(&response).context("user_by_handle", handle)?;
        debug!(handle = %handle, user_id = %user.id, "resolved user");
        Ok(user)
    }

    /// A user's own tweets and retweets.
    pub async fn user_feed(&self, user_id: UserId, min_entries: usize) -> Result<Harvest, ScraperError> {
        let variables = json!({
            "userId": user_id.to_string(),
            "count": self.page_size(),
            "includePromotedContent": false,
            "withQuickPromoteEligibilityTweetFields": false,
            "withVoice": true,
            "withV2Timeline": true,
        });
        let query = self.graphql_query(USER_TWEETS, variables, TimelineKind::Feed, user_id);
        self.harvest(&query, min_entries)
            .await
            .context("user_feed", user_id)
    }

    /// Tweets a user has liked, with one `Like` per entry.
    pub async fn likes(&self, user_id: UserId, min_entries: usize) -> Result<Harvest, ScraperError> {
        let variables = json!({
            "userId": user_id.to_string(),
            "count": self.page_size(),
            "includePromotedContent": false,
            "withClientEventToken": false,
            "withBirdwatchNotes": false,
            "withVoice": true,
            "withV2Timeline": true,
        });
        let kind = TimelineKind::Likes { owner: user_id };
        let query = self.graphql_query(LIKES, variables, kind, user_id);
        self.harvest(&query, min_entries).await.context("likes", user_id)
    }

    /// The conversation around `focal`.
    ///
    /// `focal_handle` is the author handle from the permalink, used when the
    /// focal tweet itself turns out to be a tombstone.
    pub async fn tweet_thread(
        &self,
        focal: TweetId,
        focal_handle: Option<UserHandle>,
        min_entries: usize,
    ) -> Result<Harvest, ScraperError> {
        let variables = json!({
            "focalTweetId": focal.to_string(),
            "with_rux_injections": false,
            "includePromotedContent": false,
            "withCommunity": true,
            "withQuickPromoteEligibilityTweetFields": false,
            "withBirdwatchNotes": true,
            "withVoice": true,
            "withV2Timeline": true,
        });
        let kind = TimelineKind::Thread {
            focal,
            focal_handle,
        };
        let query = self.graphql_query(TWEET_DETAIL, variables, kind, focal);
        let harvest = self
            .harvest(&query, min_entries)
            .await
            .context("tweet_thread", focal)?;
        mark_conversation_scraped(harvest, focal).context("tweet_thread", focal)
    }

    /// Fetch the thread a permalink points at.
    pub async fn tweet_by_permalink(
        &self,
        link: &Permalink,
        min_entries: usize,
    ) -> Result<Harvest, ScraperError> {
        self.tweet_thread(link.tweet_id, Some(link.handle.clone()), min_entries)
            .await
    }

    /// The conversation around `focal` from the flat legacy endpoint.
    pub async fn legacy_conversation(
        &self,
        focal: TweetId,
        focal_handle: Option<UserHandle>,
        min_entries: usize,
    ) -> Result<Harvest, ScraperError> {
        let query = TimelineQuery {
            session: &self.session,
            request: Request::Rest {
                url: self.rest_url(&format!("/2/timeline/conversation/{focal}.json")),
                params: legacy_params(self.page_size()),
            },
            kind: TimelineKind::Thread {
                focal,
                focal_handle,
            },
            target: focal.to_string(),
        };
        let harvest = self
            .harvest(&query, min_entries)
            .await
            .context("legacy_conversation", focal)?;
        mark_conversation_scraped(harvest, focal).context("legacy_conversation", focal)
    }

    /// The logged-in account's bookmarks.
    pub async fn bookmarks(&self, min_entries: usize) -> Result<Harvest, ScraperError> {
        let identity = self.session.require_identity().await?;
        let variables = json!({
            "count": self.page_size(),
            "includePromotedContent": false,
        });
        let kind = TimelineKind::Bookmarks {
            owner: identity.user_id,
        };
        let query = self.graphql_query(BOOKMARKS, variables, kind, &identity.handle);
        self.harvest(&query, min_entries)
            .await
            .context("bookmarks", &identity.handle)
    }

    /// The logged-in account's notifications.
    pub async fn notifications(&self, min_entries: usize) -> Result<Harvest, ScraperError> {
        let identity = self.session.require_identity().await?;
        let query = TimelineQuery {
            session: &self.session,
            request: Request::Rest {
                url: self.rest_url(NOTIFICATIONS_PATH),
                params: legacy_params(self.page_size()),
            },
            kind: TimelineKind::Notifications {
                owner: identity.user_id,
            },
            target: identity.handle.to_string(),
        };
        self.harvest(&query, min_entries)
            .await
            .context("notifications", &identity.handle)
    }

    /// Details and participants of one audio space.
    pub async fn space(&self, id: &SpaceId) -> Result<Trove, ScraperError> {
        let variables = json!({
            "id": id.0,
            "isMetatagsQuery": false,
            "withReplays": true,
            "withListeners": true,
        });
        let body = self
            .session
            .get(
                &self.graphql_url(AUDIO_SPACE_BY_ID),
                &graphql_params(&variables, None),
            )
            .await
            .context("space", id)?;
        let space = decode_space(&body, &id.0).context("space", id)?;
        let mut trove = space_to_trove(&space).context("space", id)?;
        trove.stamp_scraped(Utc::now());
        info!(space = %id, users = trove.users.len(), "fetched space");
        Ok(trove)
    }
}

/// The focal tweet must be present; its conversation is now captured.
fn mark_conversation_scraped(mut harvest: Harvest, focal: TweetId) -> Result<Harvest, ScraperError> {
    harvest.trove.require_tweet(focal)?;
    if let Some(tweet) = harvest.trove.tweets.get_mut(&focal) {
        tweet.is_conversation_scraped = true;
    }
    Ok(harvest)
}

#[async_trait]
impl Hydrator for Scraper {
    async fn resolve_user(&self, handle: &UserHandle) -> Result<User, ScraperError> {
        self.user_by_handle(handle).await
    }

    async fn fetch_space(&self, id: &SpaceId) -> Result<Trove, ScraperError> {
        self.space(id).await
    }
}
