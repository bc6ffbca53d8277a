//! Canonical entities produced by the normalizer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ScraperError;
use crate::tombstone::TombstoneReason;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ScraperError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<i64>().map($name).map_err(|e| {
                    ScraperError::Decode(format!("invalid {} {:?}: {}", stringify!($name), s, e))
                })
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

numeric_id!(
    /// Upstream tweet id.
    TweetId
);
numeric_id!(
    /// Upstream user id. Negative values are synthesized placeholders.
    UserId
);
numeric_id!(
    /// Id of the retweet itself, distinct from the retweeted tweet.
    RetweetId
);
numeric_id!(PollId);
numeric_id!(ImageId);
numeric_id!(VideoId);
numeric_id!(
    /// Sort index of a like in the owner's likes feed.
    LikeSortId
);
numeric_id!(BookmarkSortId);

string_id!(
    /// Audio space id (e.g. `1vOxwdPgrNnGB`).
    SpaceId
);
string_id!(NotificationId);
string_id!(
    /// Opaque continuation token from a timeline response.
    Cursor
);
string_id!(
    /// Screen name, without the leading `@`.
    UserHandle
);

impl UserHandle {
    /// Handles compare case-insensitively upstream.
    pub fn eq_ignore_case(&self, other: &UserHandle) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

/// Bit marking placeholder ids derived from a handle.
const HANDLE_PLACEHOLDER_BIT: i64 = 1 << 61;

impl UserId {
    /// Shared placeholder for authors with neither id nor handle.
    pub const UNKNOWN: UserId = UserId(-(1 << 62));

    /// Deterministic placeholder id for a user known only by handle.
    ///
    /// Always negative, so it never collides with a real id, and disjoint
    /// from [`UserId::UNKNOWN`].
    pub fn placeholder_for(handle: &UserHandle) -> Self {
        let digest = Sha256::digest(handle.0.to_ascii_lowercase().as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let low = (u64::from_be_bytes(bytes) & ((1u64 << 61) - 1)) as i64;
        UserId(-(HANDLE_PLACEHOLDER_BIT | low))
    }

    pub fn is_placeholder(&self) -> bool {
        self.0 < 0
    }
}

/// An attached image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    pub tweet_id: TweetId,
    pub width: u32,
    pub height: u32,
    pub remote_url: String,
    pub is_downloaded: bool,
}

/// An attached video or animated GIF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: VideoId,
    pub tweet_id: TweetId,
    pub width: u32,
    pub height: u32,
    pub remote_url: String,
    pub thumbnail_remote_url: String,
    pub duration_ms: u64,
    pub view_count: u64,
    pub is_gif: bool,
    pub is_blocked_by_dmca: bool,
    pub is_downloaded: bool,
}

/// A link in the tweet, optionally with its preview card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Url {
    pub tweet_id: TweetId,
    /// The `t.co` short link as it appears in the text.
    pub short_url: String,
    pub expanded_url: String,
    pub domain: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail_remote_url: Option<String>,
    pub has_card: bool,
    pub is_content_downloaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollChoice {
    pub label: String,
    pub votes: u64,
}

/// A poll card attached to a tweet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub tweet_id: TweetId,
    pub choices: Vec<PollChoice>,
    pub voting_duration_secs: u64,
    pub voting_ends_at: Option<DateTime<Utc>>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl Poll {
    pub fn total_votes(&self) -> u64 {
        self.choices.iter().map(|c| c.votes).sum()
    }
}

/// A tweet, a tombstone, or a stub known only by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: TweetId,
    /// `None` until the author is resolved or backfilled with a placeholder.
    pub user_id: Option<UserId>,
    /// Author handle when known from context (stubs, tombstones).
    pub user_handle: Option<UserHandle>,
    pub text: String,
    /// Long-form text was truncated in the legacy body.
    pub is_expandable: bool,
    pub posted_at: Option<DateTime<Utc>>,

    pub num_likes: u64,
    pub num_retweets: u64,
    pub num_replies: u64,
    pub num_quote_tweets: u64,
    pub num_views: u64,

    pub in_reply_to_id: Option<TweetId>,
    pub quoted_tweet_id: Option<TweetId>,

    pub mentions: Vec<UserHandle>,
    pub reply_mentions: Vec<UserHandle>,
    pub hashtags: Vec<String>,

    pub images: Vec<Image>,
    pub videos: Vec<Video>,
    pub urls: Vec<Url>,
    pub polls: Vec<Poll>,
    pub space_id: Option<SpaceId>,

    /// Set when the upstream asserted the tweet is no longer viewable.
    pub tombstone: Option<TombstoneReason>,
    /// Only a reference is known, not the content.
    pub is_stub: bool,
    pub is_content_downloaded: bool,
    pub is_conversation_scraped: bool,
    pub last_scraped_at: Option<DateTime<Utc>>,
}

impl Tweet {
    /// A stub for a tweet referenced by another (reply target, quote) but not present.
    pub fn stub(id: TweetId, user_handle: Option<UserHandle>) -> Self {
        Self {
            id,
            user_handle,
            is_stub: true,
            ..Default::default()
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.tombstone.is_some()
    }

    /// How much reference information a stub carries; higher is more complete.
    pub fn reference_score(&self) -> u8 {
        [
            self.user_id.is_some_and(|id| !id.is_placeholder()),
            self.user_handle.is_some(),
            self.in_reply_to_id.is_some(),
            self.quoted_tweet_id.is_some(),
            self.tombstone.is_some(),
            self.posted_at.is_some(),
        ]
        .into_iter()
        .filter(|known| *known)
        .count() as u8
    }
}

/// A user profile, or a placeholder standing in for one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub handle: UserHandle,
    pub display_name: String,
    pub bio: String,
    pub location: String,
    pub website: String,
    pub join_date: Option<DateTime<Utc>>,
    pub following_count: u64,
    pub followers_count: u64,
    pub is_private: bool,
    pub is_verified: bool,
    pub is_banned: bool,
    pub is_deleted: bool,
    pub profile_image_url: String,
    pub banner_image_url: String,
    pub pinned_tweet_id: Option<TweetId>,
    /// The id was synthesized because the real one could not be determined.
    pub is_id_fake: bool,
    pub is_content_downloaded: bool,
}

/// Handle shown for users whose handle is not known.
pub const UNKNOWN_HANDLE: &str = "<UNKNOWN USER>";

impl User {
    /// Placeholder for a user known only by handle (or not at all).
    pub fn placeholder(handle: Option<&UserHandle>) -> Self {
        match handle {
            Some(handle) => Self {
                id: UserId::placeholder_for(handle),
                handle: handle.clone(),
                is_id_fake: true,
                ..Default::default()
            },
            None => Self {
                id: UserId::UNKNOWN,
                handle: UserHandle::from(UNKNOWN_HANDLE),
                is_id_fake: true,
                ..Default::default()
            },
        }
    }

    /// A user known only by its real id, profile not yet fetched.
    pub fn unresolved(id: UserId) -> Self {
        Self {
            id,
            handle: UserHandle::from(UNKNOWN_HANDLE),
            ..Default::default()
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.is_id_fake || self.handle.0 == UNKNOWN_HANDLE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retweet {
    pub retweet_id: RetweetId,
    pub tweet_id: TweetId,
    pub retweeted_by_id: UserId,
    pub retweeted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Like {
    pub sort_id: LikeSortId,
    pub user_id: UserId,
    pub tweet_id: TweetId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub sort_id: BookmarkSortId,
    pub user_id: UserId,
    pub tweet_id: TweetId,
}

/// An audio space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: SpaceId,
    pub created_by_id: Option<UserId>,
    pub short_url: String,
    pub state: String,
    pub title: String,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_available_for_replay: bool,
    pub replay_watch_count: u64,
    pub live_listeners_count: u64,
    pub participant_ids: Vec<UserId>,
    /// Set once the space's own detail endpoint has been fetched.
    pub is_details_fetched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Retweet,
    QuoteTweet,
    Reply,
    Follow,
    Mention,
    UserIsLive,
    PollEnded,
    Login,
    CommunityPinnedPost,
    RecommendedPost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: NotificationKind,
    pub sent_at: Option<DateTime<Utc>>,
    pub sort_index: i64,
    /// Account the notification was delivered to.
    pub user_id: UserId,
    pub action_user_id: Option<UserId>,
    pub action_tweet_id: Option<TweetId>,
    pub action_retweet_id: Option<RetweetId>,
    pub tweet_ids: Vec<TweetId>,
    pub user_ids: Vec<UserId>,
    pub retweet_ids: Vec<RetweetId>,
    pub last_scraped_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_ids_are_deterministic_and_negative() {
        let a = UserId::placeholder_for(&UserHandle::from("Somebody"));
        let b = UserId::placeholder_for(&UserHandle::from("somebody"));
        assert_eq!(a, b);
        assert!(a.is_placeholder());
        assert_ne!(a, UserId::UNKNOWN);
        assert_ne!(a, UserId::placeholder_for(&UserHandle::from("somebody_else")));
    }

    #[test]
    fn test_id_parse_failure_is_decode_error() {
        let err = "12a".parse::<TweetId>().unwrap_err();
        assert!(matches!(err, ScraperError::Decode(_)));
        assert_eq!("1234".parse::<TweetId>().unwrap(), TweetId(1234));
    }

    #[test]
    fn test_reference_score() {
        let bare = Tweet::stub(TweetId(1), None);
        let mut richer = Tweet::stub(TweetId(1), Some(UserHandle::from("a")));
        assert!(richer.reference_score() > bare.reference_score());
        richer.in_reply_to_id = Some(TweetId(0));
        assert_eq!(richer.reference_score(), 2);
    }

    #[test]
    fn test_unknown_placeholder_user() {
        let user = User::placeholder(None);
        assert_eq!(user.id, UserId::UNKNOWN);
        assert!(user.is_id_fake);
    }
}
