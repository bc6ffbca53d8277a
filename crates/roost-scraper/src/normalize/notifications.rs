//! Notifications from the legacy notifications timeline.

use super::{decode_err, parse_millis, parse_sort_index};
use crate::wire::legacy::{ApiNotification, LegacyResponse};
use crate::{
    Notification, NotificationId, NotificationKind, RetweetId, ScraperError, Trove, TweetId,
    UserId,
};

fn notification_kind(icon: &str) -> Result<NotificationKind, ScraperError> {
    Ok(match icon {
        "heart_icon" => NotificationKind::Like,
        "retweet_icon" => NotificationKind::Retweet,
        "person_icon" => NotificationKind::Follow,
        "recommendation_icon" | "topic_icon" => NotificationKind::RecommendedPost,
        "bird_icon" | "security_alert_icon" => NotificationKind::Login,
        "live_icon" | "spaces_icon" => NotificationKind::UserIsLive,
        "poll_icon" | "bar_chart_icon" => NotificationKind::PollEnded,
        "community_icon" => NotificationKind::CommunityPinnedPost,
        "quote_icon" => NotificationKind::QuoteTweet,
        other => return Err(decode_err(format!("unknown notification icon {other:?}"))),
    })
}

fn notification_from(
    api: &ApiNotification,
    owner: UserId,
    sort_index: i64,
    trove: &Trove,
) -> Result<Notification, ScraperError> {
    let kind = notification_kind(&api.icon.id)?;
    let sent_at = if api.timestamp_ms.is_empty() {
        None
    } else {
        let ms = api
            .timestamp_ms
            .parse::<i64>()
            .map_err(|e| decode_err(format!("notification {} timestamp: {e}", api.id)))?;
        Some(parse_millis(ms)?)
    };

    let aggregate = api.template.as_ref().and_then(|t| t.aggregate.as_ref());
    let tweet_ids = aggregate
        .into_iter()
        .flat_map(|a| &a.target_objects)
        .filter_map(|t| t.tweet.as_ref())
        .map(|r| r.id.parse::<TweetId>())
        .collect::<Result<Vec<_>, _>>()?;
    let user_ids = aggregate
        .into_iter()
        .flat_map(|a| &a.from_users)
        .map(|u| u.user.id.parse::<UserId>())
        .collect::<Result<Vec<_>, _>>()?;

    let mut retweet_ids: Vec<RetweetId> = Vec::new();
    if kind == NotificationKind::Retweet {
        retweet_ids = trove
            .retweets
            .values()
            .filter(|r| tweet_ids.contains(&r.tweet_id) && user_ids.contains(&r.retweeted_by_id))
            .map(|r| r.retweet_id)
            .collect();
        retweet_ids.sort();
    }

    Ok(Notification {
        id: NotificationId::from(api.id.as_str()),
        kind,
        sent_at,
        sort_index,
        user_id: owner,
        action_user_id: user_ids.first().copied(),
        action_tweet_id: tweet_ids.first().copied(),
        action_retweet_id: retweet_ids.first().copied(),
        tweet_ids,
        user_ids,
        retweet_ids,
        last_scraped_at: None,
    })
}

pub(super) fn add_legacy_notifications(
    trove: &mut Trove,
    response: &LegacyResponse,
    owner: UserId,
) -> Result<(), ScraperError> {
    for entry in response.entries() {
        let Some(item) = &entry.content.item else {
            continue;
        };
        let sort_index = parse_sort_index(&entry.sort_index)?;

        let notification = if let Some(reference) = &item.content.notification {
            let api = response
                .global_objects
                .notifications
                .get(&reference.id)
                .ok_or_else(|| {
                    decode_err(format!("notification {} missing from globalObjects", reference.id))
                })?;
            notification_from(api, owner, sort_index, trove)?
        } else if let Some(reference) = &item.content.tweet {
            // Replies and mentions arrive as plain tweet entries.
            let tweet_id: TweetId = reference.id.parse()?;
            let tweet = trove.tweets.get(&tweet_id);
            let kind = match tweet.and_then(|t| t.in_reply_to_id) {
                Some(_) => NotificationKind::Reply,
                None => NotificationKind::Mention,
            };
            let author = tweet.and_then(|t| t.user_id);
            Notification {
                id: NotificationId::from(entry.entry_id.as_str()),
                kind,
                sent_at: tweet.and_then(|t| t.posted_at),
                sort_index,
                user_id: owner,
                action_user_id: author,
                action_tweet_id: Some(tweet_id),
                action_retweet_id: None,
                tweet_ids: vec![tweet_id],
                user_ids: author.into_iter().collect(),
                retweet_ids: Vec::new(),
                last_scraped_at: None,
            }
        } else {
            continue;
        };
        trove
            .notifications
            .insert(notification.id.clone(), notification);
    }
    Ok(())
}
