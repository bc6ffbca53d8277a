//! Persistence contract.
//!
//! A finished trove is written with [`MonotonicMerge`]: nothing already
//! stored is lost or downgraded by a later, less complete capture.
//! [`ArchiveStore`] applies the rules in memory; [`SessionStore`] keeps
//! session blobs between runs.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::session::SessionSnapshot;
use crate::{
    Bookmark, BookmarkSortId, Like, LikeSortId, Notification, NotificationId, Retweet, RetweetId,
    ScraperError, Space, SpaceId, Trove, Tweet, TweetId, UNKNOWN_HANDLE, User, UserHandle, UserId,
};

/// Upsert rule applied when an entity is already stored.
pub trait MonotonicMerge {
    /// Fold `incoming` into `self`, the stored value.
    fn merge_stored(&mut self, incoming: Self);
}

fn fill_text(stored: &mut String, incoming: String) {
    if stored.trim().is_empty() && !incoming.trim().is_empty() {
        *stored = incoming;
    }
}

fn fill<T>(stored: &mut Option<T>, incoming: Option<T>) {
    if stored.is_none() {
        *stored = incoming;
    }
}

fn union<T: PartialEq>(stored: &mut Vec<T>, incoming: Vec<T>) {
    for item in incoming {
        if !stored.contains(&item) {
            stored.push(item);
        }
    }
}

/// Merge keyed lists: matching items merge with `merge`, new items are appended.
fn union_by<T, K: PartialEq>(
    stored: &mut Vec<T>,
    incoming: Vec<T>,
    key: impl Fn(&T) -> K,
    merge: impl Fn(&mut T, T),
) {
    for item in incoming {
        match stored.iter_mut().find(|s| key(s) == key(&item)) {
            Some(existing) => merge(existing, item),
            None => stored.push(item),
        }
    }
}

impl MonotonicMerge for Tweet {
    fn merge_stored(&mut self, incoming: Self) {
        self.num_likes = self.num_likes.max(incoming.num_likes);
        self.num_retweets = self.num_retweets.max(incoming.num_retweets);
        self.num_replies = self.num_replies.max(incoming.num_replies);
        self.num_quote_tweets = self.num_quote_tweets.max(incoming.num_quote_tweets);
        self.num_views = self.num_views.max(incoming.num_views);

        self.is_expandable |= incoming.is_expandable;
        self.is_content_downloaded |= incoming.is_content_downloaded;
        self.is_conversation_scraped |= incoming.is_conversation_scraped;
        self.is_stub &= incoming.is_stub;

        fill_text(&mut self.text, incoming.text);
        fill(&mut self.posted_at, incoming.posted_at);
        fill(&mut self.user_handle, incoming.user_handle);
        if self.user_id.is_none_or(|id| id.is_placeholder()) {
            if let Some(id) = incoming.user_id {
                if !id.is_placeholder() || self.user_id.is_none() {
                    self.user_id = Some(id);
                }
            }
        }
        fill(&mut self.in_reply_to_id, incoming.in_reply_to_id);
        fill(&mut self.quoted_tweet_id, incoming.quoted_tweet_id);
        fill(&mut self.space_id, incoming.space_id);
        if incoming.tombstone.is_some() {
            self.tombstone = incoming.tombstone;
        }

        union(&mut self.mentions, incoming.mentions);
        union(&mut self.reply_mentions, incoming.reply_mentions);
        union(&mut self.hashtags, incoming.hashtags);
        union_by(&mut self.images, incoming.images, |i| i.id, |s, i| {
            s.is_downloaded |= i.is_downloaded;
        });
        union_by(&mut self.videos, incoming.videos, |v| v.id, |s, v| {
            s.view_count = s.view_count.max(v.view_count);
            s.is_downloaded |= v.is_downloaded;
            s.is_blocked_by_dmca |= v.is_blocked_by_dmca;
        });
        union_by(&mut self.urls, incoming.urls, |u| u.short_url.clone(), |s, u| {
            fill(&mut s.title, u.title);
            fill(&mut s.description, u.description);
            fill(&mut s.domain, u.domain);
            fill(&mut s.thumbnail_remote_url, u.thumbnail_remote_url);
            s.has_card |= u.has_card;
            s.is_content_downloaded |= u.is_content_downloaded;
        });
        union_by(&mut self.polls, incoming.polls, |p| p.id, |s, p| {
            // Vote counts only grow while a poll is open.
            if p.total_votes() >= s.total_votes() {
                s.choices = p.choices;
            }
            fill(&mut s.voting_ends_at, p.voting_ends_at);
            s.last_updated_at = s.last_updated_at.max(p.last_updated_at);
        });

        self.last_scraped_at = self.last_scraped_at.max(incoming.last_scraped_at);
    }
}

impl MonotonicMerge for User {
    fn merge_stored(&mut self, incoming: Self) {
        self.following_count = self.following_count.max(incoming.following_count);
        self.followers_count = self.followers_count.max(incoming.followers_count);

        self.is_content_downloaded |= incoming.is_content_downloaded;
        self.is_verified |= incoming.is_verified;
        self.is_banned |= incoming.is_banned;
        self.is_deleted |= incoming.is_deleted;
        self.is_id_fake &= incoming.is_id_fake;
        if !incoming.is_placeholder() {
            self.is_private = incoming.is_private;
        }

        if self.handle.0.is_empty() || self.handle.0 == UNKNOWN_HANDLE {
            self.handle = incoming.handle;
        }
        fill_text(&mut self.display_name, incoming.display_name);
        fill_text(&mut self.bio, incoming.bio);
        fill_text(&mut self.location, incoming.location);
        fill_text(&mut self.website, incoming.website);
        fill_text(&mut self.profile_image_url, incoming.profile_image_url);
        fill_text(&mut self.banner_image_url, incoming.banner_image_url);
        fill(&mut self.join_date, incoming.join_date);
        fill(&mut self.pinned_tweet_id, incoming.pinned_tweet_id);
    }
}

impl MonotonicMerge for Space {
    fn merge_stored(&mut self, incoming: Self) {
        self.replay_watch_count = self.replay_watch_count.max(incoming.replay_watch_count);
        self.live_listeners_count = self.live_listeners_count.max(incoming.live_listeners_count);
        self.is_available_for_replay |= incoming.is_available_for_replay;

        // State moves on (running, ended) and only detail fetches report it.
        if incoming.is_details_fetched && !incoming.state.is_empty() {
            self.state = incoming.state;
        } else {
            fill_text(&mut self.state, incoming.state);
        }
        self.is_details_fetched |= incoming.is_details_fetched;

        fill_text(&mut self.title, incoming.title);
        fill_text(&mut self.short_url, incoming.short_url);
        fill(&mut self.created_by_id, incoming.created_by_id);
        fill(&mut self.created_at, incoming.created_at);
        fill(&mut self.started_at, incoming.started_at);
        fill(&mut self.ended_at, incoming.ended_at);
        self.updated_at = self.updated_at.max(incoming.updated_at);
        union(&mut self.participant_ids, incoming.participant_ids);
    }
}

impl MonotonicMerge for Notification {
    fn merge_stored(&mut self, incoming: Self) {
        self.sort_index = self.sort_index.max(incoming.sort_index);
        fill(&mut self.sent_at, incoming.sent_at);
        fill(&mut self.action_user_id, incoming.action_user_id);
        fill(&mut self.action_tweet_id, incoming.action_tweet_id);
        fill(&mut self.action_retweet_id, incoming.action_retweet_id);
        union(&mut self.tweet_ids, incoming.tweet_ids);
        union(&mut self.user_ids, incoming.user_ids);
        union(&mut self.retweet_ids, incoming.retweet_ids);
        self.last_scraped_at = self.last_scraped_at.max(incoming.last_scraped_at);
    }
}

/// Write-once records: the first capture stands.
macro_rules! insert_only {
    ($($ty:ty),*) => {
        $(impl MonotonicMerge for $ty {
            fn merge_stored(&mut self, _incoming: Self) {}
        })*
    };
}

insert_only!(Retweet, Like, Bookmark);

/// Counts from one [`ArchiveStore::save_trove`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// In-memory archive applying the monotonic upsert rules.
///
/// Entries are locked per id while merging, so concurrent saves of the same
/// entity serialize.
#[derive(Debug, Default)]
pub struct ArchiveStore {
    tweets: DashMap<TweetId, Tweet>,
    users: DashMap<UserId, User>,
    retweets: DashMap<RetweetId, Retweet>,
    likes: DashMap<LikeSortId, Like>,
    bookmarks: DashMap<BookmarkSortId, Bookmark>,
    spaces: DashMap<SpaceId, Space>,
    notifications: DashMap<NotificationId, Notification>,
}

fn upsert<K, V>(map: &DashMap<K, V>, key: K, value: V, summary: &mut SaveSummary)
where
    K: Eq + std::hash::Hash,
    V: MonotonicMerge,
{
    match map.entry(key) {
        Entry::Occupied(mut entry) => {
            entry.get_mut().merge_stored(value);
            summary.updated += 1;
        }
        Entry::Vacant(entry) => {
            entry.insert(value);
            summary.inserted += 1;
        }
    }
}

impl ArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a finished trove.
    pub fn save_trove(&self, trove: Trove) -> SaveSummary {
        let mut summary = SaveSummary::default();
        for (id, user) in trove.users {
            upsert(&self.users, id, user, &mut summary);
        }
        for (id, tweet) in trove.tweets {
            upsert(&self.tweets, id, tweet, &mut summary);
        }
        for (id, retweet) in trove.retweets {
            upsert(&self.retweets, id, retweet, &mut summary);
        }
        for (id, like) in trove.likes {
            upsert(&self.likes, id, like, &mut summary);
        }
        for (id, bookmark) in trove.bookmarks {
            upsert(&self.bookmarks, id, bookmark, &mut summary);
        }
        for (id, space) in trove.spaces {
            upsert(&self.spaces, id, space, &mut summary);
        }
        for (id, notification) in trove.notifications {
            upsert(&self.notifications, id, notification, &mut summary);
        }
        debug!(inserted = summary.inserted, updated = summary.updated, "saved trove");
        summary
    }

    pub fn tweet(&self, id: TweetId) -> Option<Tweet> {
        self.tweets.get(&id).map(|t| t.clone())
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|u| u.clone())
    }

    pub fn space(&self, id: &SpaceId) -> Option<Space> {
        self.spaces.get(id).map(|s| s.clone())
    }

    pub fn notification(&self, id: &NotificationId) -> Option<Notification> {
        self.notifications.get(id).map(|n| n.clone())
    }

    /// Everything stored, as one trove.
    pub fn export(&self) -> Trove {
        fn collect<K: Clone + Eq + std::hash::Hash, V: Clone>(
            map: &DashMap<K, V>,
        ) -> std::collections::HashMap<K, V> {
            map.iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect()
        }

        Trove {
            tweets: collect(&self.tweets),
            users: collect(&self.users),
            retweets: collect(&self.retweets),
            likes: collect(&self.likes),
            bookmarks: collect(&self.bookmarks),
            spaces: collect(&self.spaces),
            notifications: collect(&self.notifications),
            users_to_resolve: Vec::new(),
        }
    }
}

/// Storage for session blobs, keyed by account handle.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), ScraperError>;

    async fn load(&self, handle: &UserHandle) -> Result<Option<SessionSnapshot>, ScraperError>;
}

/// One `<handle>.session` file per account in a directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, handle: &UserHandle) -> Result<PathBuf, ScraperError> {
        let name = &handle.0;
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ScraperError::Decode(format!(
                "handle {name:?} cannot name a session file"
            )));
        }
        Ok(self
            .dir
            .join(format!("{}.session", name.to_ascii_lowercase())))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), ScraperError> {
        let path = self.path(snapshot.handle())?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, snapshot.to_blob()?).await?;
        debug!(path = %path.display(), "saved session");
        Ok(())
    }

    async fn load(&self, handle: &UserHandle) -> Result<Option<SessionSnapshot>, ScraperError> {
        let path = self.path(handle)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(blob) => Ok(Some(SessionSnapshot::from_blob(&blob)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
