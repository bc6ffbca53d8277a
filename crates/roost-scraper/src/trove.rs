//! The trove: every entity decoded from one logical fetch.
//!
//! A trove is built page by page and fragment by fragment. Inserting a tweet
//! never replaces a full tweet with a stub, and two stubs for the same id are
//! unioned so reference information only accumulates. Finalization backfills
//! placeholder authors and queues their handles for resolution.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    Bookmark, BookmarkSortId, Like, LikeSortId, Notification, NotificationId, Retweet, RetweetId,
    ScraperError, Space, SpaceId, Tweet, TweetId, User, UserHandle, UserId,
};

/// Entities keyed by id, plus handles that still need a profile lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trove {
    pub tweets: HashMap<TweetId, Tweet>,
    pub users: HashMap<UserId, User>,
    pub retweets: HashMap<RetweetId, Retweet>,
    pub likes: HashMap<LikeSortId, Like>,
    pub bookmarks: HashMap<BookmarkSortId, Bookmark>,
    pub spaces: HashMap<SpaceId, Space>,
    pub notifications: HashMap<NotificationId, Notification>,
    /// Handles of placeholder users, in the order they were discovered.
    pub users_to_resolve: Vec<UserHandle>,
}

/// Union of two stubs for the same id. Incoming values win where present,
/// except that a placeholder author never displaces a real one.
fn union_stubs(existing: Tweet, incoming: Tweet) -> Tweet {
    let user_id = match (existing.user_id, incoming.user_id) {
        (Some(known), Some(new)) if new.is_placeholder() && !known.is_placeholder() => Some(known),
        (known, new) => new.or(known),
    };
    Tweet {
        user_id,
        user_handle: incoming.user_handle.or(existing.user_handle),
        posted_at: incoming.posted_at.or(existing.posted_at),
        in_reply_to_id: incoming.in_reply_to_id.or(existing.in_reply_to_id),
        quoted_tweet_id: incoming.quoted_tweet_id.or(existing.quoted_tweet_id),
        tombstone: incoming.tombstone.or(existing.tombstone),
        is_conversation_scraped: incoming.is_conversation_scraped
            || existing.is_conversation_scraped,
        last_scraped_at: incoming.last_scraped_at.max(existing.last_scraped_at),
        ..incoming
    }
}

impl Trove {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tweets.is_empty()
            && self.users.is_empty()
            && self.retweets.is_empty()
            && self.likes.is_empty()
            && self.bookmarks.is_empty()
            && self.spaces.is_empty()
            && self.notifications.is_empty()
    }

    /// Insert a tweet, respecting stub-vs-full precedence.
    pub fn insert_tweet(&mut self, incoming: Tweet) {
        let Some(existing) = self.tweets.remove(&incoming.id) else {
            self.tweets.insert(incoming.id, incoming);
            return;
        };

        let merged = match (existing.is_stub, incoming.is_stub) {
            (false, true) => existing,
            (true, true) => {
                trace!(
                    id = %incoming.id,
                    existing = existing.reference_score(),
                    incoming = incoming.reference_score(),
                    "unioning stubs"
                );
                union_stubs(existing, incoming)
            }
            (_, false) => incoming,
        };
        self.tweets.insert(merged.id, merged);
    }

    pub fn insert_user(&mut self, user: User) {
        self.users.insert(user.id, user);
    }

    /// A space with fetched details is never replaced by a card-derived stub.
    pub fn insert_space(&mut self, mut incoming: Space) {
        if let Some(existing) = self.spaces.get(&incoming.id) {
            if existing.is_details_fetched && !incoming.is_details_fetched {
                return;
            }
            // The detail endpoint does not return the card's short link.
            if incoming.short_url.is_empty() {
                incoming.short_url = existing.short_url.clone();
            }
        }
        self.spaces.insert(incoming.id.clone(), incoming);
    }

    /// Queue a handle for resolution, ignoring case-insensitive duplicates.
    pub fn queue_handle(&mut self, handle: UserHandle) {
        if !self.users_to_resolve.iter().any(|h| h.eq_ignore_case(&handle)) {
            self.users_to_resolve.push(handle);
        }
    }

    /// Merge `other` into `self`. Idempotent and associative.
    pub fn merge(&mut self, other: Trove) {
        for tweet in other.tweets.into_values() {
            self.insert_tweet(tweet);
        }
        for space in other.spaces.into_values() {
            self.insert_space(space);
        }
        self.users.extend(other.users);
        self.retweets.extend(other.retweets);
        self.likes.extend(other.likes);
        self.bookmarks.extend(other.bookmarks);
        self.notifications.extend(other.notifications);
        for handle in other.users_to_resolve {
            self.queue_handle(handle);
        }
    }

    /// Fill reply targets of tombstones from their position in a thread.
    ///
    /// Each chain is one ordered run of entries where every tweet replies to
    /// the one before it. A tombstone whose own fragment did not carry a reply
    /// target is assumed to reply to its predecessor.
    pub fn infer_tombstone_parents(&mut self, chains: &[Vec<TweetId>]) {
        for chain in chains {
            for pair in chain.windows(2) {
                let (parent, child) = (pair[0], pair[1]);
                if parent == child {
                    continue;
                }
                let Some(tweet) = self.tweets.get_mut(&child) else {
                    continue;
                };
                if tweet.is_tombstone() && tweet.in_reply_to_id.is_none() {
                    debug!(tombstone = %child, parent = %parent, "inferred tombstone reply target");
                    tweet.in_reply_to_id = Some(parent);
                }
            }
        }
    }

    /// Insert stubs for every referenced tweet that is not present.
    pub fn ensure_references(&mut self) {
        let mut referenced: Vec<TweetId> = Vec::new();
        for tweet in self.tweets.values() {
            referenced.extend(tweet.in_reply_to_id);
            referenced.extend(tweet.quoted_tweet_id);
        }
        referenced.extend(self.retweets.values().map(|r| r.tweet_id));
        referenced.extend(self.likes.values().map(|l| l.tweet_id));
        referenced.extend(self.bookmarks.values().map(|b| b.tweet_id));

        for id in referenced {
            if !self.tweets.contains_key(&id) {
                self.tweets.insert(id, Tweet::stub(id, None));
            }
        }
    }

    /// Handles of tombstone authors whose id is still unknown.
    pub fn tombstone_handles(&self) -> Vec<UserHandle> {
        let mut handles: Vec<UserHandle> = Vec::new();
        let waiting = self
            .tweets
            .values()
            .filter(|t| t.is_tombstone() && t.user_id.is_none())
            .filter_map(|t| t.user_handle.as_ref());
        for handle in waiting {
            if !handles.iter().any(|h| h.eq_ignore_case(handle)) {
                handles.push(handle.clone());
            }
        }
        handles.sort();
        handles
    }

    /// Attach a freshly fetched profile to every tweet waiting on its handle.
    pub fn apply_resolved_user(&mut self, user: User) {
        let placeholder = UserId::placeholder_for(&user.handle);
        for tweet in self.tweets.values_mut() {
            let waiting = match tweet.user_id {
                None => tweet
                    .user_handle
                    .as_ref()
                    .is_some_and(|h| h.eq_ignore_case(&user.handle)),
                Some(id) => id == placeholder,
            };
            if waiting {
                tweet.user_id = Some(user.id);
            }
        }
        self.users.remove(&placeholder);
        self.users_to_resolve
            .retain(|h| !h.eq_ignore_case(&user.handle));
        self.insert_user(user);
    }

    /// Record that a queued handle belongs to a suspended or deleted account.
    ///
    /// The placeholder keeps its synthesized id and the handle leaves the queue,
    /// since no lookup will ever resolve it.
    pub fn mark_unavailable(&mut self, handle: &UserHandle, banned: bool) {
        if let Some(user) = self.users.get_mut(&UserId::placeholder_for(handle)) {
            if banned {
                user.is_banned = true;
            } else {
                user.is_deleted = true;
            }
        }
        self.users_to_resolve.retain(|h| !h.eq_ignore_case(handle));
    }

    /// Give every tweet author and retweeter a user, real or placeholder.
    ///
    /// Placeholder handles are queued for resolution.
    pub fn fill_missing_users(&mut self) {
        let mut placeholders: Vec<User> = Vec::new();
        let mut unresolved: HashSet<UserId> = HashSet::new();

        for tweet in self.tweets.values_mut() {
            match tweet.user_id {
                Some(id) => {
                    if !self.users.contains_key(&id) {
                        unresolved.insert(id);
                    }
                }
                None => {
                    let known = tweet.user_handle.as_ref().and_then(|handle| {
                        self.users
                            .values()
                            .find(|u| !u.is_id_fake && u.handle.eq_ignore_case(handle))
                    });
                    let user = match known {
                        Some(user) => user.clone(),
                        None => User::placeholder(tweet.user_handle.as_ref()),
                    };
                    tweet.user_id = Some(user.id);
                    if user.is_id_fake {
                        placeholders.push(user);
                    }
                }
            }
        }
        for retweet in self.retweets.values() {
            if !self.users.contains_key(&retweet.retweeted_by_id) {
                unresolved.insert(retweet.retweeted_by_id);
            }
        }

        for user in placeholders {
            if user.id != UserId::UNKNOWN {
                self.queue_handle(user.handle.clone());
            }
            self.users.entry(user.id).or_insert(user);
        }
        for id in unresolved {
            debug!(user_id = %id, "author id without a profile");
            self.users.entry(id).or_insert_with(|| User::unresolved(id));
        }
    }

    /// Spaces referenced by cards whose details were never fetched.
    pub fn unfetched_spaces(&self) -> Vec<SpaceId> {
        let mut ids: Vec<SpaceId> = self
            .spaces
            .values()
            .filter(|s| !s.is_details_fetched)
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Record when full tweets and notifications in this trove were scraped.
    pub fn stamp_scraped(&mut self, now: DateTime<Utc>) {
        for tweet in self.tweets.values_mut().filter(|t| !t.is_stub) {
            tweet.last_scraped_at = Some(now);
        }
        for notification in self.notifications.values_mut() {
            notification.last_scraped_at = Some(now);
        }
    }

    /// Finalization that needs no network: reference stubs and placeholders.
    pub fn finalize_offline(&mut self) {
        self.ensure_references();
        self.fill_missing_users();
    }

    /// The tweet this trove was built around.
    ///
    /// A bare reference stub does not count: the response only mentioned the
    /// tweet. A tombstone does, since it is what upstream served in its place.
    pub fn require_tweet(&self, id: TweetId) -> Result<&Tweet, ScraperError> {
        match self.tweets.get(&id) {
            Some(tweet) if !tweet.is_stub || tweet.is_tombstone() => Ok(tweet),
            _ => Err(ScraperError::InvariantViolation(format!(
                "trove is missing its own tweet {id}"
            ))),
        }
    }
}
