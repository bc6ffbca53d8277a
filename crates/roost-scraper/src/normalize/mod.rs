//! Entity normalizer.
//!
//! Turns decoded wire fragments into canonical entities and assembles them
//! into a [`Trove`]. Every tweet fragment is classified exactly once by
//! [`classify`]; a fragment whose markers contradict each other aborts with
//! an invariant violation instead of being coerced into one shape.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::wire::graphql::{
    EntryContent, GraphqlCard, GraphqlResponse, GraphqlTweet, GraphqlUser, ItemContent,
    TweetResult, TweetResults, UserResult,
};
use crate::wire::legacy::{ApiCard, ApiMedia, ApiTweet, ApiUser, LegacyItemContent, LegacyResponse};
use crate::wire::{TimelineResponse, UserResponse};
use crate::{
    Bookmark, BookmarkSortId, Like, LikeSortId, Permalink, Retweet, RetweetId, ScraperError, Space,
    TombstoneReason, Trove, Tweet, TweetId, Url, User, UserHandle, UserId,
};

mod attachments;
mod notifications;
mod space;

use attachments::{
    CardKind, apply_link_card, card_kind, image_from, parse_poll, space_from_card, video_from,
};
use notifications::add_legacy_notifications;
pub use space::space_to_trove;

static REPLY_MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@(\w+)").unwrap());

const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// The single shape a tweet fragment normalizes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Ordinary,
    Retweet,
    Tombstone,
    /// An ordinary tweet whose quoted tweet is a tombstone.
    QuoteOfTombstone,
}

/// What a fragment carries, independent of which API generation produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentMarkers {
    pub has_content: bool,
    pub retweets: bool,
    pub tombstoned: bool,
    pub quotes_tombstone: bool,
}

/// Classify a fragment. Any combination outside the four shapes is an error.
pub fn classify(markers: FragmentMarkers) -> Result<FragmentKind, ScraperError> {
    let FragmentMarkers {
        has_content,
        retweets,
        tombstoned,
        quotes_tombstone,
    } = markers;
    match (has_content, retweets, tombstoned, quotes_tombstone) {
        (true, false, false, false) => Ok(FragmentKind::Ordinary),
        (true, true, false, false) => Ok(FragmentKind::Retweet),
        (false, false, true, false) => Ok(FragmentKind::Tombstone),
        (true, false, false, true) => Ok(FragmentKind::QuoteOfTombstone),
        _ => Err(ScraperError::InvariantViolation(format!(
            "tweet fragment matches no single classification: {markers:?}"
        ))),
    }
}

/// Which timeline a page belongs to. Controls entry-level side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineKind {
    Feed,
    Likes { owner: UserId },
    Bookmarks { owner: UserId },
    Thread {
        focal: TweetId,
        /// Author handle from the permalink, used if the focal tweet is a tombstone.
        focal_handle: Option<UserHandle>,
    },
    Notifications { owner: UserId },
}

impl TimelineKind {
    fn focal(&self) -> Option<TweetId> {
        match self {
            TimelineKind::Thread { focal, .. } => Some(*focal),
            _ => None,
        }
    }
}

/// A normalized tweet plus the space stub its card referenced, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTweet {
    pub tweet: Tweet,
    pub space: Option<Space>,
}

fn decode_err(what: impl std::fmt::Display) -> ScraperError {
    ScraperError::Decode(what.to_string())
}

fn parse_created_at(raw: &str) -> Result<Option<DateTime<Utc>>, ScraperError> {
    if raw.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| decode_err(format!("invalid timestamp {raw:?}: {e}")))
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, ScraperError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| decode_err(format!("invalid timestamp {raw:?}: {e}")))
}

fn parse_millis(ms: i64) -> Result<DateTime<Utc>, ScraperError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| decode_err(format!("timestamp out of range: {ms}")))
}

fn parse_opt_id<T>(raw: Option<&str>) -> Result<Option<T>, ScraperError>
where
    T: FromStr<Err = ScraperError>,
{
    match raw {
        Some(s) if !s.is_empty() => s.parse().map(Some),
        _ => Ok(None),
    }
}

fn parse_sort_index(raw: &str) -> Result<i64, ScraperError> {
    raw.parse()
        .map_err(|e| decode_err(format!("invalid sort index {raw:?}: {e}")))
}

/// Trailing numeric component of an entry id (`tweet-123`, `conversationthread-1-tweet-2`).
fn id_from_entry(entry_id: &str) -> Option<TweetId> {
    entry_id
        .rsplit('-')
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .map(TweetId)
}

fn unescape(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Split `text` at the start of the display range, counted in characters.
fn split_preamble(text: &str, range: Option<(usize, usize)>) -> (&str, &str) {
    let Some((start, _)) = range else {
        return ("", text);
    };
    match text.char_indices().nth(start) {
        Some((byte, _)) => text.split_at(byte),
        None => (text, ""),
    }
}

/// Repeatedly remove any of `links` from the end of `text`.
fn strip_trailing_links(text: &str, links: &[&str]) -> String {
    let mut out = text.trim_end();
    loop {
        let before = out.len();
        for link in links.iter().filter(|l| !l.is_empty()) {
            if let Some(rest) = out.strip_suffix(link) {
                out = rest.trim_end();
            }
        }
        if out.len() == before {
            return out.to_string();
        }
    }
}

fn build_tweet(
    id: TweetId,
    api: &ApiTweet,
    card: Option<&ApiCard>,
) -> Result<NormalizedTweet, ScraperError> {
    let (preamble, body) = split_preamble(&api.full_text, api.display_text_range);
    let reply_mentions = REPLY_MENTION_RE
        .captures_iter(preamble)
        .map(|c| UserHandle::from(&c[1]))
        .collect();

    let media: &[ApiMedia] = match &api.extended_entities {
        Some(extended) if !extended.media.is_empty() => &extended.media,
        _ => &api.entities.media,
    };

    let mut trailing: Vec<&str> = media.iter().map(|m| m.url.as_str()).collect();
    if let Some(permalink) = &api.quoted_status_permalink {
        trailing.push(permalink.url.as_str());
    }
    if let Some(card) = card {
        trailing.push(card.url.as_str());
    }
    let text = strip_trailing_links(&unescape(body), &trailing);

    let mut images = Vec::new();
    let mut videos = Vec::new();
    for m in media {
        match m.kind.as_str() {
            "photo" => images.push(image_from(m, id)?),
            "video" | "animated_gif" => videos.push(video_from(m, id)?),
            other => return Err(decode_err(format!("unknown media type {other:?} on tweet {id}"))),
        }
    }

    let mut polls = Vec::new();
    let mut space = None;
    let mut link_card = None;
    if let Some(card) = card {
        match card_kind(card) {
            CardKind::Poll => polls.push(parse_poll(card, id)?),
            CardKind::Space => space = Some(space_from_card(card)?),
            CardKind::Link => link_card = Some(card),
        }
    }

    let quote = api.quoted_status_permalink.as_ref();
    let mut urls = Vec::new();
    for entity in &api.entities.urls {
        if quote.is_some_and(|p| p.url == entity.url || p.expanded == entity.expanded_url) {
            continue;
        }
        let mut url = Url {
            tweet_id: id,
            short_url: entity.url.clone(),
            expanded_url: entity.expanded_url.clone(),
            domain: None,
            title: None,
            description: None,
            thumbnail_remote_url: None,
            has_card: false,
            is_content_downloaded: false,
        };
        if let Some(card) = link_card.filter(|c| c.url == entity.url) {
            apply_link_card(&mut url, card);
        }
        urls.push(url);
    }

    let tweet = Tweet {
        id,
        user_id: parse_opt_id(Some(api.user_id_str.as_str()))?,
        user_handle: None,
        text,
        is_expandable: false,
        posted_at: parse_created_at(&api.created_at)?,
        num_likes: api.favorite_count,
        num_retweets: api.retweet_count,
        num_replies: api.reply_count,
        num_quote_tweets: api.quote_count,
        num_views: 0,
        in_reply_to_id: parse_opt_id(api.in_reply_to_status_id_str.as_deref())?,
        quoted_tweet_id: parse_opt_id(api.quoted_status_id_str.as_deref())?,
        mentions: api
            .entities
            .user_mentions
            .iter()
            .map(|m| UserHandle::from(m.screen_name.as_str()))
            .collect(),
        reply_mentions,
        hashtags: api.entities.hashtags.iter().map(|h| h.text.clone()).collect(),
        images,
        videos,
        urls,
        polls,
        space_id: space.as_ref().map(|s| s.id.clone()),
        tombstone: None,
        is_stub: false,
        is_content_downloaded: false,
        is_conversation_scraped: false,
        last_scraped_at: None,
    };
    Ok(NormalizedTweet { tweet, space })
}

/// Normalize one tweet object (either generation's `legacy` body).
pub fn normalize_api_tweet(
    api: &ApiTweet,
    card: Option<&ApiCard>,
) -> Result<NormalizedTweet, ScraperError> {
    build_tweet(api.id_str.parse()?, api, card)
}

fn build_user(id: UserId, api: &ApiUser) -> Result<User, ScraperError> {
    if api.screen_name.is_empty() {
        return Err(decode_err(format!("user {id} has no handle")));
    }
    let website = api
        .entities
        .url
        .as_ref()
        .and_then(|u| u.urls.first())
        .map(|u| u.expanded_url.clone())
        .filter(|u| !u.is_empty())
        .or_else(|| api.url.clone())
        .unwrap_or_default();

    Ok(User {
        id,
        handle: UserHandle::from(api.screen_name.as_str()),
        display_name: api.name.clone(),
        bio: unescape(&api.description),
        location: api.location.clone(),
        website,
        join_date: parse_created_at(&api.created_at)?,
        following_count: api.friends_count,
        followers_count: api.followers_count,
        is_private: api.protected,
        is_verified: api.verified,
        is_banned: false,
        is_deleted: false,
        profile_image_url: api.profile_image_url_https.replace("_normal.", "."),
        banner_image_url: api.profile_banner_url.clone().unwrap_or_default(),
        pinned_tweet_id: parse_opt_id(api.pinned_tweet_ids_str.first().map(String::as_str))?,
        is_id_fake: false,
        is_content_downloaded: false,
    })
}

pub fn normalize_api_user(api: &ApiUser) -> Result<User, ScraperError> {
    build_user(api.id_str.parse()?, api)
}

pub fn normalize_graphql_user(user: &GraphqlUser) -> Result<User, ScraperError> {
    let mut normalized = build_user(user.rest_id.parse()?, &user.legacy)?;
    normalized.is_verified |= user.is_blue_verified;
    Ok(normalized)
}

/// The profile carried by a user lookup response.
pub fn user_from_response(response: &UserResponse) -> Result<User, ScraperError> {
    match response {
        UserResponse::Legacy(api) => normalize_api_user(api),
        UserResponse::Graphql(user) => normalize_graphql_user(user),
    }
}

/// Stubs for the reply target and quoted tweet, with the author handle the
/// referencing tweet reveals.
fn add_reference_stubs(trove: &mut Trove, tweet: &Tweet, api: &ApiTweet) {
    if let Some(parent) = tweet.in_reply_to_id {
        let handle = api
            .in_reply_to_screen_name
            .as_deref()
            .map(UserHandle::from);
        trove.insert_tweet(Tweet::stub(parent, handle));
    }
    if let Some(quoted) = tweet.quoted_tweet_id {
        let handle = api
            .quoted_status_permalink
            .as_ref()
            .and_then(|p| Permalink::parse(&p.expanded).ok())
            .map(|p| p.handle);
        trove.insert_tweet(Tweet::stub(quoted, handle));
    }
}

fn add_tombstone(
    trove: &mut Trove,
    id: Option<TweetId>,
    reason: TombstoneReason,
) -> Result<Option<TweetId>, ScraperError> {
    let id = id.ok_or_else(|| decode_err(format!("{reason} tombstone without a tweet id")))?;
    let mut stub = Tweet::stub(id, None);
    stub.tombstone = Some(reason);
    trove.insert_tweet(stub);
    Ok(Some(id))
}

/// Likes and bookmarks take their sort id from the entry.
fn record_entry(
    trove: &mut Trove,
    kind: &TimelineKind,
    sort_index: &str,
    tweet_id: TweetId,
) -> Result<(), ScraperError> {
    match kind {
        TimelineKind::Likes { owner } => {
            let sort_id = LikeSortId(parse_sort_index(sort_index)?);
            trove.likes.insert(
                sort_id,
                Like {
                    sort_id,
                    user_id: *owner,
                    tweet_id,
                },
            );
        }
        TimelineKind::Bookmarks { owner } => {
            let sort_id = BookmarkSortId(parse_sort_index(sort_index)?);
            trove.bookmarks.insert(
                sort_id,
                Bookmark {
                    sort_id,
                    user_id: *owner,
                    tweet_id,
                },
            );
        }
        _ => {}
    }
    Ok(())
}

fn finish_thread(trove: &mut Trove, kind: &TimelineKind, chains: &[Vec<TweetId>]) {
    let TimelineKind::Thread {
        focal,
        focal_handle,
    } = kind
    else {
        return;
    };
    trove.infer_tombstone_parents(chains);
    if let (Some(handle), Some(tweet)) = (focal_handle, trove.tweets.get_mut(focal)) {
        if tweet.user_id.is_none() && tweet.user_handle.is_none() {
            tweet.user_handle = Some(handle.clone());
        }
    }
}

/// Normalize one timeline page into a trove.
pub fn timeline_to_trove(
    response: &TimelineResponse,
    kind: &TimelineKind,
) -> Result<Trove, ScraperError> {
    match response {
        TimelineResponse::Legacy(r) => legacy_to_trove(r, kind),
        TimelineResponse::Graphql(r) => graphql_to_trove(r, kind),
    }
}

// Flat legacy format.

/// The tweet an entry item points at. Tombstones are collected on the way.
fn legacy_item_tweet(
    content: &LegacyItemContent,
    tombstones: &mut HashMap<TweetId, TombstoneReason>,
) -> Result<Option<TweetId>, ScraperError> {
    if let Some(tweet) = &content.tweet {
        return Ok(Some(tweet.id.parse()?));
    }
    let Some(tombstone) = &content.tombstone else {
        return Ok(None);
    };
    let text = tombstone
        .text()
        .ok_or_else(|| decode_err("tombstone entry without text"))?;
    let reason = TombstoneReason::from_upstream_text(text)?;
    let id: TweetId = tombstone
        .tweet
        .as_ref()
        .ok_or_else(|| decode_err(format!("{reason} tombstone without a tweet id")))?
        .id
        .parse()?;
    tombstones.insert(id, reason);
    Ok(Some(id))
}

fn add_legacy_retweet(trove: &mut Trove, api: &ApiTweet) -> Result<(), ScraperError> {
    let retweet_id: RetweetId = api.id_str.parse()?;
    let tweet_id: TweetId = parse_opt_id(api.retweeted_status_id_str.as_deref())?
        .ok_or_else(|| decode_err(format!("retweet {retweet_id} has no original")))?;
    let retweeted_by_id: UserId = api.user_id_str.parse()?;
    trove.retweets.insert(
        retweet_id,
        Retweet {
            retweet_id,
            tweet_id,
            retweeted_by_id,
            retweeted_at: parse_created_at(&api.created_at)?,
        },
    );
    Ok(())
}

fn add_legacy_tweet(trove: &mut Trove, api: &ApiTweet) -> Result<(), ScraperError> {
    let NormalizedTweet { tweet, space } = normalize_api_tweet(api, api.card.as_ref())?;
    add_reference_stubs(trove, &tweet, api);
    if let Some(space) = space {
        trove.insert_space(space);
    }
    trove.insert_tweet(tweet);
    Ok(())
}

fn legacy_to_trove(response: &LegacyResponse, kind: &TimelineKind) -> Result<Trove, ScraperError> {
    let mut trove = Trove::new();
    for api in response.global_objects.users.values() {
        trove.insert_user(normalize_api_user(api)?);
    }

    let focal = kind.focal();
    let mut tombstones = HashMap::new();
    let mut chains: Vec<Vec<TweetId>> = vec![Vec::new()];
    let mut entry_tweets: Vec<(&str, TweetId)> = Vec::new();
    for entry in response.entries() {
        if let Some(item) = &entry.content.item {
            if let Some(id) = legacy_item_tweet(&item.content, &mut tombstones)? {
                chains[0].push(id);
                entry_tweets.push((entry.sort_index.as_str(), id));
            }
        }
        if let Some(module) = &entry.content.timeline_module {
            let mut chain: Vec<TweetId> = focal.into_iter().collect();
            for module_item in &module.items {
                chain.extend(legacy_item_tweet(&module_item.item.content, &mut tombstones)?);
            }
            chains.push(chain);
        }
    }

    for (&id, &reason) in &tombstones {
        let markers = FragmentMarkers {
            has_content: response.global_objects.tweets.contains_key(&id.to_string()),
            retweets: false,
            tombstoned: true,
            quotes_tombstone: false,
        };
        classify(markers)?;
        add_tombstone(&mut trove, Some(id), reason)?;
    }

    for api in response.global_objects.tweets.values() {
        let retweets = api.retweeted_status_id_str.is_some();
        let quoted: Option<TweetId> = parse_opt_id(api.quoted_status_id_str.as_deref())?;
        let markers = FragmentMarkers {
            has_content: true,
            retweets,
            tombstoned: false,
            // A retweet wrapper repeats the original's quote reference.
            quotes_tombstone: !retweets && quoted.is_some_and(|q| tombstones.contains_key(&q)),
        };
        match classify(markers)? {
            FragmentKind::Ordinary | FragmentKind::QuoteOfTombstone => {
                add_legacy_tweet(&mut trove, api)?
            }
            FragmentKind::Retweet => add_legacy_retweet(&mut trove, api)?,
            FragmentKind::Tombstone => {
                return Err(ScraperError::InvariantViolation(format!(
                    "tweet object {} classified as a tombstone",
                    api.id_str
                )));
            }
        }
    }

    for (sort_index, id) in entry_tweets {
        record_entry(&mut trove, kind, sort_index, id)?;
    }
    finish_thread(&mut trove, kind, &chains);
    if let TimelineKind::Notifications { owner } = kind {
        add_legacy_notifications(&mut trove, response, *owner)?;
    }
    Ok(trove)
}

// Nested-result format.

fn tweet_markers(tweet: &GraphqlTweet) -> FragmentMarkers {
    FragmentMarkers {
        has_content: true,
        retweets: tweet.legacy.retweeted_status_result.is_some(),
        tombstoned: false,
        quotes_tombstone: tweet
            .quoted_status_result
            .as_ref()
            .and_then(|q| q.result.as_ref())
            .is_some_and(TweetResult::is_tombstone),
    }
}

/// Add one tweet result and everything nested in it.
///
/// Returns the id the enclosing entry stands for: the tweet itself, or the
/// original for a retweet. `id_hint` supplies the id of tombstones, which
/// carry none of their own.
fn add_tweet_result(
    trove: &mut Trove,
    results: &TweetResults,
    id_hint: Option<TweetId>,
) -> Result<Option<TweetId>, ScraperError> {
    let Some(result) = &results.result else {
        return Ok(None);
    };
    let markers = match result {
        TweetResult::Tweet(tweet) | TweetResult::TweetWithVisibilityResults { tweet } => {
            tweet_markers(tweet)
        }
        TweetResult::TweetTombstone { .. } | TweetResult::TweetUnavailable { .. } => {
            FragmentMarkers {
                has_content: false,
                retweets: false,
                tombstoned: true,
                quotes_tombstone: false,
            }
        }
    };

    match (classify(markers)?, result) {
        (
            FragmentKind::Ordinary | FragmentKind::QuoteOfTombstone,
            TweetResult::Tweet(tweet) | TweetResult::TweetWithVisibilityResults { tweet },
        ) => add_graphql_tweet(trove, tweet).map(Some),
        (
            FragmentKind::Retweet,
            TweetResult::Tweet(tweet) | TweetResult::TweetWithVisibilityResults { tweet },
        ) => add_graphql_retweet(trove, tweet).map(Some),
        (FragmentKind::Tombstone, TweetResult::TweetTombstone { tombstone }) => {
            let text = tombstone
                .as_ref()
                .map(|t| t.text.text.as_str())
                .ok_or_else(|| decode_err("tombstone result without text"))?;
            add_tombstone(trove, id_hint, TombstoneReason::from_upstream_text(text)?)
        }
        (FragmentKind::Tombstone, TweetResult::TweetUnavailable { reason }) => add_tombstone(
            trove,
            id_hint,
            TombstoneReason::from_unavailable_reason(reason)?,
        ),
        (kind, _) => Err(ScraperError::InvariantViolation(format!(
            "{kind:?} classification does not fit the result variant"
        ))),
    }
}

/// The author from `core`, inserted into the trove.
fn add_core_user(trove: &mut Trove, tweet: &GraphqlTweet) -> Result<Option<User>, ScraperError> {
    let Some(UserResult::User(user)) = tweet
        .core
        .as_ref()
        .and_then(|c| c.user_results.result.as_ref())
    else {
        return Ok(None);
    };
    let user = normalize_graphql_user(user)?;
    trove.insert_user(user.clone());
    Ok(Some(user))
}

fn add_graphql_tweet(trove: &mut Trove, gt: &GraphqlTweet) -> Result<TweetId, ScraperError> {
    let id: TweetId = gt.rest_id.parse()?;
    let card = gt.card.as_ref().map(GraphqlCard::to_api_card);
    let card = card.as_ref().or(gt.legacy.tweet.card.as_ref());
    let NormalizedTweet { mut tweet, space } = build_tweet(id, &gt.legacy.tweet, card)?;

    if let Some(author) = add_core_user(trove, gt)? {
        tweet.user_id = tweet.user_id.or(Some(author.id));
        tweet.user_handle = Some(author.handle);
    }
    if let Some(note) = &gt.note_tweet {
        tweet.text = unescape(&note.note_tweet_results.result.text);
        tweet.is_expandable = true;
    }
    if let Some(count) = gt.views.as_ref().and_then(|v| v.count.as_deref()) {
        tweet.num_views = count
            .parse()
            .map_err(|e| decode_err(format!("tweet {id} view count {count:?}: {e}")))?;
    }
    if let Some(quoted) = &gt.quoted_status_result {
        let quoted_id = add_tweet_result(trove, quoted, tweet.quoted_tweet_id)?;
        tweet.quoted_tweet_id = tweet.quoted_tweet_id.or(quoted_id);
    }

    add_reference_stubs(trove, &tweet, &gt.legacy.tweet);
    if let Some(space) = space {
        trove.insert_space(space);
    }
    trove.insert_tweet(tweet);
    Ok(id)
}

fn add_graphql_retweet(trove: &mut Trove, gt: &GraphqlTweet) -> Result<TweetId, ScraperError> {
    let retweet_id: RetweetId = gt.rest_id.parse()?;
    let hint: Option<TweetId> = parse_opt_id(gt.legacy.tweet.retweeted_status_id_str.as_deref())?;
    let nested = match gt.legacy.retweeted_status_result.as_deref() {
        Some(original) => add_tweet_result(trove, original, hint)?,
        None => None,
    };
    let tweet_id = nested
        .or(hint)
        .ok_or_else(|| decode_err(format!("retweet {retweet_id} has no original")))?;

    let retweeted_by_id = match add_core_user(trove, gt)? {
        Some(user) => user.id,
        None => gt
            .legacy
            .tweet
            .user_id_str
            .parse()
            .map_err(|_| decode_err(format!("retweet {retweet_id} has no retweeter")))?,
    };

    trove.retweets.insert(
        retweet_id,
        Retweet {
            retweet_id,
            tweet_id,
            retweeted_by_id,
            retweeted_at: parse_created_at(&gt.legacy.tweet.created_at)?,
        },
    );
    Ok(tweet_id)
}

fn add_item(
    trove: &mut Trove,
    item: &ItemContent,
    entry_id: &str,
) -> Result<Option<TweetId>, ScraperError> {
    match item {
        ItemContent::TimelineTweet { tweet_results } => {
            add_tweet_result(trove, tweet_results, id_from_entry(entry_id))
        }
        ItemContent::TimelineUser { user_results } => {
            if let Some(UserResult::User(user)) = &user_results.result {
                trove.insert_user(normalize_graphql_user(user)?);
            }
            Ok(None)
        }
        ItemContent::TimelineTimelineCursor { .. } | ItemContent::Other => Ok(None),
    }
}

fn graphql_to_trove(response: &GraphqlResponse, kind: &TimelineKind) -> Result<Trove, ScraperError> {
    let timeline = response
        .timeline()
        .ok_or_else(|| decode_err("response carries no timeline"))?;

    let mut trove = Trove::new();
    let focal = kind.focal();
    let mut chains: Vec<Vec<TweetId>> = vec![Vec::new()];

    for entry in timeline.pinned_entry().into_iter().chain(timeline.entries()) {
        match &entry.content {
            EntryContent::TimelineTimelineItem { item_content } => {
                if let Some(id) = add_item(&mut trove, item_content, &entry.entry_id)? {
                    chains[0].push(id);
                    record_entry(&mut trove, kind, &entry.sort_index, id)?;
                }
            }
            EntryContent::TimelineTimelineModule { items } => {
                let mut chain: Vec<TweetId> = focal.into_iter().collect();
                for module_item in items {
                    let id = add_item(&mut trove, &module_item.item.item_content, &module_item.entry_id)?;
                    chain.extend(id);
                }
                debug!(entry = %entry.entry_id, len = chain.len(), "module chain");
                chains.push(chain);
            }
            EntryContent::TimelineTimelineCursor { .. } => {}
        }
    }

    finish_thread(&mut trove, kind, &chains);
    Ok(trove)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageId;
    use crate::wire::decode_timeline;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn api_tweet(value: serde_json::Value) -> ApiTweet {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_classification_is_exhaustive_and_exclusive() {
        let mut valid = 0;
        for bits in 0..16u8 {
            let markers = FragmentMarkers {
                has_content: bits & 1 != 0,
                retweets: bits & 2 != 0,
                tombstoned: bits & 4 != 0,
                quotes_tombstone: bits & 8 != 0,
            };
            match classify(markers) {
                Ok(_) => valid += 1,
                Err(e) => assert!(matches!(e, ScraperError::InvariantViolation(_))),
            }
        }
        assert_eq!(valid, 4);
    }

    #[test]
    fn test_retweet_and_tombstone_markers_conflict() {
        let markers = FragmentMarkers {
            has_content: false,
            retweets: true,
            tombstoned: true,
            quotes_tombstone: false,
        };
        assert!(matches!(
            classify(markers),
            Err(ScraperError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_reply_preamble_split_by_display_range() {
        let api = api_tweet(json!({
            "id_str": "10",
            "user_id_str": "1",
            "full_text": "@alice @bob_2 thanks &amp; welcome",
            "display_text_range": [14, 34],
            "in_reply_to_status_id_str": "9",
            "in_reply_to_screen_name": "alice"
        }));
        let tweet = normalize_api_tweet(&api, None).unwrap().tweet;
        assert_eq!(tweet.text, "thanks & welcome");
        assert_eq!(
            tweet.reply_mentions,
            vec![UserHandle::from("alice"), UserHandle::from("bob_2")]
        );
        assert_eq!(tweet.in_reply_to_id, Some(TweetId(9)));
    }

    #[test]
    fn test_trailing_media_and_quote_links_are_stripped() {
        let api = api_tweet(json!({
            "id_str": "10",
            "full_text": "look at this https://t.co/media https://t.co/quote",
            "quoted_status_id_str": "5",
            "quoted_status_permalink": {"url": "https://t.co/quote", "expanded": "https://twitter.com/carol/status/5"},
            "entities": {"urls": [{"url": "https://t.co/quote", "expanded_url": "https://twitter.com/carol/status/5"}]},
            "extended_entities": {"media": [{
                "id_str": "77", "type": "photo", "url": "https://t.co/media",
                "media_url_https": "https://pbs.twimg.com/media/x.jpg",
                "original_info": {"width": 10, "height": 20}
            }]}
        }));
        let tweet = normalize_api_tweet(&api, None).unwrap().tweet;
        assert_eq!(tweet.text, "look at this");
        assert_eq!(tweet.images.len(), 1);
        assert_eq!(tweet.images[0].id, ImageId(77));
        // The quote permalink is not a standalone url.
        assert!(tweet.urls.is_empty());
    }

    #[test]
    fn test_unknown_media_type_is_decode_error() {
        let api = api_tweet(json!({
            "id_str": "10",
            "entities": {"media": [{"id_str": "1", "type": "hologram"}]}
        }));
        assert!(matches!(
            normalize_api_tweet(&api, None),
            Err(ScraperError::Decode(_))
        ));
    }

    #[test]
    fn test_invalid_created_at_is_decode_error() {
        let api = api_tweet(json!({"id_str": "10", "created_at": "yesterday"}));
        assert!(matches!(
            normalize_api_tweet(&api, None),
            Err(ScraperError::Decode(_))
        ));
        let api = api_tweet(json!({"id_str": "10", "created_at": "Wed Oct 10 20:19:24 +0000 2018"}));
        assert!(normalize_api_tweet(&api, None).unwrap().tweet.posted_at.is_some());
    }

    #[test]
    fn test_profile_image_drops_normal_suffix() {
        let api: ApiUser = serde_json::from_value(json!({
            "id_str": "1",
            "screen_name": "someone",
            "description": "a &lt;bio&gt;",
            "profile_image_url_https": "https://pbs.twimg.com/profile_images/1/abc_normal.jpg",
            "entities": {"url": {"urls": [{"url": "https://t.co/x", "expanded_url": "https://example.com"}]}}
        }))
        .unwrap();
        let user = normalize_api_user(&api).unwrap();
        assert_eq!(user.profile_image_url, "https://pbs.twimg.com/profile_images/1/abc.jpg");
        assert_eq!(user.bio, "a <bio>");
        assert_eq!(user.website, "https://example.com");
    }

    #[test]
    fn test_legacy_retweet_keeps_its_own_id() {
        let body = json!({
            "globalObjects": {
                "tweets": {
                    "100": {"id_str": "100", "user_id_str": "1", "full_text": "original"},
                    "200": {"id_str": "200", "user_id_str": "2", "full_text": "RT @a: original", "retweeted_status_id_str": "100"}
                },
                "users": {
                    "1": {"id_str": "1", "screen_name": "a"},
                    "2": {"id_str": "2", "screen_name": "b"}
                }
            },
            "timeline": {"instructions": []}
        });
        let response = decode_timeline(body.to_string().as_bytes(), "feed").unwrap();
        let trove = timeline_to_trove(&response, &TimelineKind::Feed).unwrap();

        assert_eq!(trove.tweets.len(), 1);
        let retweet = &trove.retweets[&RetweetId(200)];
        assert_eq!(retweet.tweet_id, TweetId(100));
        assert_eq!(retweet.retweeted_by_id, UserId(2));
    }

    #[test]
    fn test_legacy_thread_tombstone_gets_handle_from_reply() {
        let body = json!({
            "globalObjects": {
                "tweets": {
                    "1": {"id_str": "1", "user_id_str": "10", "full_text": "root"},
                    "3": {"id_str": "3", "user_id_str": "10", "full_text": "@ghost hm",
                          "in_reply_to_status_id_str": "2", "in_reply_to_screen_name": "ghost"}
                },
                "users": {"10": {"id_str": "10", "screen_name": "owner"}}
            },
            "timeline": {"instructions": [{"addEntries": {"entries": [
                {"entryId": "tweet-1", "sortIndex": "3", "content": {"item": {"content": {"tweet": {"id": "1"}}}}},
                {"entryId": "tombstone-2", "sortIndex": "2", "content": {"item": {"content": {"tombstone": {
                    "tombstoneInfo": {"text": "This Tweet was deleted by the Tweet author. Learn more"},
                    "tweet": {"id": "2"}
                }}}}},
                {"entryId": "tweet-3", "sortIndex": "1", "content": {"item": {"content": {"tweet": {"id": "3"}}}}}
            ]}}]}
        });
        let response = decode_timeline(body.to_string().as_bytes(), "1").unwrap();
        let kind = TimelineKind::Thread {
            focal: TweetId(1),
            focal_handle: None,
        };
        let trove = timeline_to_trove(&response, &kind).unwrap();

        let tombstone = &trove.tweets[&TweetId(2)];
        assert_eq!(tombstone.tombstone, Some(TombstoneReason::Deleted));
        assert_eq!(tombstone.user_handle, Some(UserHandle::from("ghost")));
        assert_eq!(tombstone.in_reply_to_id, Some(TweetId(1)));
    }

    #[test]
    fn test_nested_unknown_tombstone_text_is_invariant_violation() {
        let body = json!({"data": {"threaded_conversation_with_injections_v2": {"instructions": [
            {"type": "TimelineAddEntries", "entries": [
                {"entryId": "tweet-5", "sortIndex": "1", "content": {
                    "entryType": "TimelineTimelineItem",
                    "itemContent": {"itemType": "TimelineTweet", "tweet_results": {"result": {
                        "__typename": "TweetTombstone",
                        "tombstone": {"text": {"text": "This Tweet has ascended."}}
                    }}}
                }}
            ]}
        ]}}});
        let response = decode_timeline(body.to_string().as_bytes(), "5").unwrap();
        let kind = TimelineKind::Thread {
            focal: TweetId(5),
            focal_handle: None,
        };
        assert!(matches!(
            timeline_to_trove(&response, &kind),
            Err(ScraperError::InvariantViolation(_))
        ));
    }
}
