//! Flat legacy format.
//!
//! Tweets, users and notifications live in `globalObjects` maps keyed by id;
//! the timeline only references them by id. The tweet and user object shapes
//! defined here are also embedded (as `legacy`) in the nested GraphQL format.

use std::collections::HashMap;

use serde::Deserialize;

use crate::Cursor;

/// A tweet object as the upstream serializes it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiTweet {
    #[serde(default)]
    pub id_str: String,
    #[serde(default)]
    pub user_id_str: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub full_text: String,
    /// Code-point range of the displayed text; everything before the start
    /// is the reply-mention preamble.
    pub display_text_range: Option<(usize, usize)>,
    #[serde(default)]
    pub entities: ApiEntities,
    pub extended_entities: Option<ApiExtendedEntities>,
    pub in_reply_to_status_id_str: Option<String>,
    pub in_reply_to_screen_name: Option<String>,
    pub quoted_status_id_str: Option<String>,
    pub quoted_status_permalink: Option<ApiPermalink>,
    pub retweeted_status_id_str: Option<String>,
    #[serde(default)]
    pub favorite_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub quote_count: u64,
    #[serde(default)]
    pub conversation_id_str: String,
    pub card: Option<ApiCard>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiEntities {
    #[serde(default)]
    pub hashtags: Vec<ApiHashtag>,
    #[serde(default)]
    pub media: Vec<ApiMedia>,
    #[serde(default)]
    pub urls: Vec<ApiUrlEntity>,
    #[serde(default)]
    pub user_mentions: Vec<ApiMention>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiExtendedEntities {
    #[serde(default)]
    pub media: Vec<ApiMedia>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiHashtag {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMention {
    pub screen_name: String,
    #[serde(default)]
    pub id_str: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUrlEntity {
    /// The `t.co` link.
    pub url: String,
    #[serde(default)]
    pub expanded_url: String,
    #[serde(default)]
    pub display_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiPermalink {
    pub url: String,
    #[serde(default)]
    pub expanded: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMedia {
    pub id_str: String,
    #[serde(default)]
    pub media_url_https: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// The `t.co` link appended to the tweet text.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub original_info: ApiOriginalInfo,
    pub video_info: Option<ApiVideoInfo>,
    pub ext_media_availability: Option<ApiMediaAvailability>,
    #[serde(rename = "mediaStats")]
    pub media_stats: Option<ApiMediaStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiOriginalInfo {
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiVideoInfo {
    #[serde(default)]
    pub duration_millis: u64,
    #[serde(default)]
    pub variants: Vec<ApiVideoVariant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiVideoVariant {
    pub bitrate: Option<u64>,
    #[serde(default)]
    pub content_type: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMediaAvailability {
    pub status: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMediaStats {
    #[serde(rename = "viewCount", default)]
    pub view_count: u64,
}

/// Card with its binding values keyed by name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiCard {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub binding_values: HashMap<String, ApiCardValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiCardValue {
    pub string_value: Option<String>,
    pub image_value: Option<ApiCardImage>,
    pub boolean_value: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiCardImage {
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl ApiCard {
    pub fn string(&self, key: &str) -> Option<&str> {
        self.binding_values
            .get(key)
            .and_then(|v| v.string_value.as_deref())
    }

    pub fn image_url(&self, key: &str) -> Option<&str> {
        self.binding_values
            .get(key)
            .and_then(|v| v.image_value.as_ref())
            .map(|i| i.url.as_str())
    }
}

/// A user object as the upstream serializes it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiUser {
    #[serde(default)]
    pub id_str: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub screen_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    pub url: Option<String>,
    #[serde(default)]
    pub entities: ApiUserEntities,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub friends_count: u64,
    #[serde(default)]
    pub followers_count: u64,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub profile_image_url_https: String,
    pub profile_banner_url: Option<String>,
    #[serde(default)]
    pub pinned_tweet_ids_str: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiUserEntities {
    pub url: Option<ApiUserUrls>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiUserUrls {
    #[serde(default)]
    pub urls: Vec<ApiUrlEntity>,
}

/// Top-level flat response (`globalObjects` + `timeline`).
#[derive(Debug, Default, Deserialize)]
pub struct LegacyResponse {
    #[serde(rename = "globalObjects", default)]
    pub global_objects: GlobalObjects,
    #[serde(default)]
    pub timeline: LegacyTimeline,
}

#[derive(Debug, Default, Deserialize)]
pub struct GlobalObjects {
    #[serde(default)]
    pub tweets: HashMap<String, ApiTweet>,
    #[serde(default)]
    pub users: HashMap<String, ApiUser>,
    #[serde(default)]
    pub notifications: HashMap<String, ApiNotification>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LegacyTimeline {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub instructions: Vec<LegacyInstruction>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LegacyInstruction {
    #[serde(rename = "addEntries")]
    pub add_entries: Option<LegacyEntries>,
    #[serde(rename = "replaceEntry")]
    pub replace_entry: Option<LegacyReplaceEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LegacyEntries {
    #[serde(default)]
    pub entries: Vec<LegacyEntry>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyReplaceEntry {
    pub entry: LegacyEntry,
}

#[derive(Debug, Deserialize)]
pub struct LegacyEntry {
    #[serde(rename = "entryId")]
    pub entry_id: String,
    #[serde(rename = "sortIndex", default)]
    pub sort_index: String,
    pub content: LegacyEntryContent,
}

#[derive(Debug, Deserialize)]
pub struct LegacyEntryContent {
    pub item: Option<LegacyItem>,
    pub operation: Option<LegacyOperation>,
    #[serde(rename = "timelineModule")]
    pub timeline_module: Option<LegacyModule>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyOperation {
    pub cursor: LegacyCursor,
}

#[derive(Debug, Deserialize)]
pub struct LegacyCursor {
    pub value: String,
    #[serde(rename = "cursorType")]
    pub cursor_type: String,
}

#[derive(Debug, Deserialize)]
pub struct LegacyModule {
    #[serde(default)]
    pub items: Vec<LegacyModuleItem>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyModuleItem {
    #[serde(rename = "entryId")]
    pub entry_id: String,
    pub item: LegacyItem,
}

#[derive(Debug, Deserialize)]
pub struct LegacyItem {
    pub content: LegacyItemContent,
}

#[derive(Debug, Deserialize)]
pub struct LegacyItemContent {
    pub tweet: Option<LegacyRef>,
    pub notification: Option<LegacyRef>,
    pub tombstone: Option<LegacyTombstone>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct LegacyTombstone {
    #[serde(rename = "tombstoneInfo")]
    pub info: Option<LegacyTombstoneInfo>,
    pub tweet: Option<LegacyRef>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyTombstoneInfo {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "richText")]
    pub rich_text: Option<LegacyRichText>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyRichText {
    pub text: String,
}

impl LegacyTombstone {
    /// The sentence shown in place of the tweet.
    pub fn text(&self) -> Option<&str> {
        let info = self.info.as_ref()?;
        match &info.rich_text {
            Some(rich) => Some(rich.text.as_str()),
            None if !info.text.is_empty() => Some(info.text.as_str()),
            None => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiNotification {
    pub id: String,
    #[serde(rename = "timestampMs", default)]
    pub timestamp_ms: String,
    pub icon: ApiNotificationIcon,
    pub template: Option<ApiNotificationTemplate>,
}

#[derive(Debug, Deserialize)]
pub struct ApiNotificationIcon {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiNotificationTemplate {
    #[serde(rename = "aggregateUserActionsV1")]
    pub aggregate: Option<ApiAggregateActions>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAggregateActions {
    #[serde(rename = "targetObjects", default)]
    pub target_objects: Vec<ApiTargetObject>,
    #[serde(rename = "fromUsers", default)]
    pub from_users: Vec<ApiFromUser>,
}

#[derive(Debug, Deserialize)]
pub struct ApiTargetObject {
    pub tweet: Option<LegacyRef>,
}

#[derive(Debug, Deserialize)]
pub struct ApiFromUser {
    pub user: LegacyRef,
}

impl LegacyResponse {
    /// Entries in timeline order, including replaced entries.
    pub fn entries(&self) -> impl Iterator<Item = &LegacyEntry> {
        self.timeline.instructions.iter().flat_map(|instruction| {
            instruction
                .add_entries
                .iter()
                .flat_map(|add| add.entries.iter())
                .chain(instruction.replace_entry.iter().map(|r| &r.entry))
        })
    }

    /// Ids of added entries that are not pagination markers.
    pub fn content_entry_ids(&self) -> Vec<String> {
        self.timeline
            .instructions
            .iter()
            .filter_map(|i| i.add_entries.as_ref())
            .flat_map(|add| add.entries.iter())
            .filter(|e| e.content.operation.is_none())
            .map(|e| e.entry_id.clone())
            .collect()
    }

    pub fn bottom_cursor(&self) -> Option<Cursor> {
        self.entries()
            .filter_map(|e| e.content.operation.as_ref())
            .find(|op| op.cursor.cursor_type == "Bottom")
            .map(|op| Cursor(op.cursor.value.clone()))
    }
}
