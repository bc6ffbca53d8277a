//! Nested-result (GraphQL) format.
//!
//! Every object is wrapped in a `result` tagged with `__typename`, and the
//! timeline lives at an endpoint-specific path under `data`.

use serde::Deserialize;

use super::ApiError;
use super::legacy::{ApiCard, ApiCardValue, ApiTweet, ApiUser};
use crate::Cursor;

#[derive(Debug, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: GraphqlData,
    #[serde(default)]
    pub errors: Vec<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GraphqlData {
    pub user: Option<UserResults>,
    pub threaded_conversation_with_injections_v2: Option<Timeline>,
    pub bookmark_timeline_v2: Option<TimelineContainer>,
    #[serde(rename = "audioSpace")]
    pub audio_space: Option<AudioSpace>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserResults {
    pub result: Option<UserResult>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
pub enum UserResult {
    User(Box<GraphqlUser>),
    UserUnavailable {
        #[serde(default)]
        reason: String,
        #[serde(default)]
        message: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct GraphqlUser {
    pub rest_id: String,
    #[serde(default)]
    pub is_blue_verified: bool,
    pub legacy: ApiUser,
    pub timeline_v2: Option<TimelineContainer>,
    pub timeline: Option<TimelineContainer>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineContainer {
    pub timeline: Timeline,
}

#[derive(Debug, Default, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Instruction {
    TimelineAddEntries {
        #[serde(default)]
        entries: Vec<Entry>,
    },
    TimelinePinEntry {
        entry: Entry,
    },
    TimelineReplaceEntry {
        entry: Entry,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(rename = "entryId")]
    pub entry_id: String,
    #[serde(rename = "sortIndex", default)]
    pub sort_index: String,
    pub content: EntryContent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "entryType")]
pub enum EntryContent {
    TimelineTimelineItem {
        #[serde(rename = "itemContent")]
        item_content: ItemContent,
    },
    TimelineTimelineModule {
        #[serde(default)]
        items: Vec<ModuleItem>,
    },
    TimelineTimelineCursor {
        value: String,
        #[serde(rename = "cursorType")]
        cursor_type: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct ModuleItem {
    #[serde(rename = "entryId")]
    pub entry_id: String,
    pub item: ModuleItemBody,
}

#[derive(Debug, Deserialize)]
pub struct ModuleItemBody {
    #[serde(rename = "itemContent")]
    pub item_content: ItemContent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "itemType")]
pub enum ItemContent {
    TimelineTweet {
        tweet_results: TweetResults,
    },
    TimelineUser {
        user_results: UserResults,
    },
    TimelineTimelineCursor {
        value: String,
        #[serde(rename = "cursorType")]
        cursor_type: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
pub struct TweetResults {
    pub result: Option<TweetResult>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
pub enum TweetResult {
    Tweet(Box<GraphqlTweet>),
    TweetWithVisibilityResults {
        tweet: Box<GraphqlTweet>,
    },
    TweetTombstone {
        tombstone: Option<TombstoneBody>,
    },
    TweetUnavailable {
        #[serde(default)]
        reason: String,
    },
}

impl TweetResult {
    /// True for results that stand in for a tweet that cannot be shown.
    pub fn is_tombstone(&self) -> bool {
        matches!(
            self,
            TweetResult::TweetTombstone { .. } | TweetResult::TweetUnavailable { .. }
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct TombstoneBody {
    pub text: TombstoneText,
}

#[derive(Debug, Deserialize)]
pub struct TombstoneText {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlTweet {
    pub rest_id: String,
    pub core: Option<TweetCore>,
    pub legacy: GraphqlTweetLegacy,
    pub note_tweet: Option<NoteTweet>,
    pub card: Option<GraphqlCard>,
    pub views: Option<Views>,
    pub quoted_status_result: Option<Box<TweetResults>>,
}

#[derive(Debug, Deserialize)]
pub struct TweetCore {
    #[serde(default)]
    pub user_results: UserResults,
}

/// The embedded legacy tweet plus the nested-only retweet reference.
#[derive(Debug, Deserialize)]
pub struct GraphqlTweetLegacy {
    #[serde(flatten)]
    pub tweet: ApiTweet,
    pub retweeted_status_result: Option<Box<TweetResults>>,
}

#[derive(Debug, Deserialize)]
pub struct NoteTweet {
    pub note_tweet_results: NoteTweetResults,
}

#[derive(Debug, Deserialize)]
pub struct NoteTweetResults {
    pub result: NoteTweetResult,
}

#[derive(Debug, Deserialize)]
pub struct NoteTweetResult {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct Views {
    pub count: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlCard {
    #[serde(default)]
    pub rest_id: String,
    pub legacy: GraphqlCardLegacy,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlCardLegacy {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub binding_values: Vec<BindingValue>,
}

#[derive(Debug, Deserialize)]
pub struct BindingValue {
    pub key: String,
    pub value: ApiCardValue,
}

impl GraphqlCard {
    /// Re-key the binding list into the flat-format card shape.
    pub fn to_api_card(&self) -> ApiCard {
        ApiCard {
            name: self.legacy.name.clone(),
            url: if self.legacy.url.is_empty() {
                self.rest_id.clone()
            } else {
                self.legacy.url.clone()
            },
            binding_values: self
                .legacy
                .binding_values
                .iter()
                .map(|b| (b.key.clone(), b.value.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AudioSpace {
    pub metadata: SpaceMetadata,
    #[serde(default)]
    pub participants: SpaceParticipants,
}

#[derive(Debug, Deserialize)]
pub struct SpaceMetadata {
    pub rest_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub title: String,
    pub created_at: Option<i64>,
    pub started_at: Option<i64>,
    pub updated_at: Option<i64>,
    /// Milliseconds since epoch, serialized as a string upstream.
    pub ended_at: Option<String>,
    #[serde(default)]
    pub is_space_available_for_replay: bool,
    #[serde(default)]
    pub total_replay_watched: u64,
    #[serde(default)]
    pub total_live_listeners: u64,
    pub creator_results: Option<UserResults>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpaceParticipants {
    #[serde(default)]
    pub admins: Vec<SpaceParticipant>,
    #[serde(default)]
    pub speakers: Vec<SpaceParticipant>,
    #[serde(default)]
    pub listeners: Vec<SpaceParticipant>,
}

#[derive(Debug, Deserialize)]
pub struct SpaceParticipant {
    #[serde(default)]
    pub twitter_screen_name: String,
    pub user_results: Option<ParticipantUserResults>,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantUserResults {
    #[serde(default)]
    pub rest_id: String,
    pub result: Option<UserResult>,
}

impl Timeline {
    /// Added and replaced entries in order. Pinned entries are excluded.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.instructions.iter().flat_map(|instruction| {
            let entries: &[Entry] = match instruction {
                Instruction::TimelineAddEntries { entries } => entries,
                Instruction::TimelineReplaceEntry { entry } => std::slice::from_ref(entry),
                _ => &[],
            };
            entries.iter()
        })
    }

    pub fn pinned_entry(&self) -> Option<&Entry> {
        self.instructions.iter().find_map(|instruction| match instruction {
            Instruction::TimelinePinEntry { entry } => Some(entry),
            _ => None,
        })
    }

    /// Ids of added entries that are not pagination markers.
    pub fn content_entry_ids(&self) -> Vec<String> {
        self.instructions
            .iter()
            .filter_map(|instruction| match instruction {
                Instruction::TimelineAddEntries { entries } => Some(entries),
                _ => None,
            })
            .flatten()
            .filter(|entry| !entry.is_cursor())
            .map(|entry| entry.entry_id.clone())
            .collect()
    }

    pub fn bottom_cursor(&self) -> Option<Cursor> {
        self.entries().find_map(|entry| match &entry.content {
            EntryContent::TimelineTimelineCursor { value, cursor_type }
            | EntryContent::TimelineTimelineItem {
                item_content: ItemContent::TimelineTimelineCursor { value, cursor_type },
            } if cursor_type == "Bottom" => Some(Cursor(value.clone())),
            _ => None,
        })
    }
}

impl Entry {
    pub fn is_cursor(&self) -> bool {
        matches!(
            self.content,
            EntryContent::TimelineTimelineCursor { .. }
                | EntryContent::TimelineTimelineItem {
                    item_content: ItemContent::TimelineTimelineCursor { .. },
                }
        )
    }
}

impl GraphqlResponse {
    /// The timeline wherever this endpoint puts it.
    pub fn timeline(&self) -> Option<&Timeline> {
        if let Some(timeline) = &self.data.threaded_conversation_with_injections_v2 {
            return Some(timeline);
        }
        if let Some(container) = &self.data.bookmark_timeline_v2 {
            return Some(&container.timeline);
        }
        match self.data.user.as_ref()?.result.as_ref()? {
            UserResult::User(user) => user
                .timeline_v2
                .as_ref()
                .or(user.timeline.as_ref())
                .map(|c| &c.timeline),
            UserResult::UserUnavailable { .. } => None,
        }
    }
}
