//! JSON fixtures shaped like upstream responses.

#![allow(dead_code)]

use serde_json::{Value, json};

pub fn user_result(id: u64, handle: &str) -> Value {
    json!({
        "__typename": "User",
        "rest_id": id.to_string(),
        "legacy": {"id_str": id.to_string(), "screen_name": handle, "name": handle},
    })
}

pub fn tweet_result(id: u64, author: u64, handle: &str, reply_to: Option<u64>) -> Value {
    let mut legacy = json!({
        "id_str": id.to_string(),
        "user_id_str": author.to_string(),
        "full_text": format!("tweet number {id}"),
        "created_at": "Wed Oct 10 20:19:24 +0000 2018",
    });
    if let Some(parent) = reply_to {
        legacy["in_reply_to_status_id_str"] = json!(parent.to_string());
    }
    json!({
        "__typename": "Tweet",
        "rest_id": id.to_string(),
        "core": {"user_results": {"result": user_result(author, handle)}},
        "legacy": legacy,
    })
}

fn item_entry(entry_id: String, sort_index: String, result: Value) -> Value {
    json!({
        "entryId": entry_id,
        "sortIndex": sort_index,
        "content": {
            "entryType": "TimelineTimelineItem",
            "itemContent": {"itemType": "TimelineTweet", "tweet_results": {"result": result}},
        },
    })
}

pub fn tweet_entry(id: u64, author: u64, handle: &str, reply_to: Option<u64>) -> Value {
    item_entry(
        format!("tweet-{id}"),
        id.to_string(),
        tweet_result(id, author, handle, reply_to),
    )
}

pub fn tombstone_entry(id: u64, text: &str) -> Value {
    item_entry(
        format!("tweet-{id}"),
        id.to_string(),
        json!({
            "__typename": "TweetTombstone",
            "tombstone": {"__typename": "TextTombstone", "text": {"text": text}},
        }),
    )
}

pub fn cursor_entry(value: &str) -> Value {
    json!({
        "entryId": format!("cursor-bottom-{value}"),
        "sortIndex": "0",
        "content": {"entryType": "TimelineTimelineCursor", "value": value, "cursorType": "Bottom"},
    })
}

fn add_entries(entries: Vec<Value>) -> Value {
    json!({"instructions": [{"type": "TimelineAddEntries", "entries": entries}]})
}

/// A `TweetDetail` response.
pub fn thread_page(entries: Vec<Value>) -> Value {
    json!({"data": {"threaded_conversation_with_injections_v2": add_entries(entries)}})
}

/// A user timeline response (`UserTweets`, `Likes`).
pub fn user_timeline_page(owner: u64, entries: Vec<Value>) -> Value {
    let mut user = user_result(owner, "owner");
    user["timeline_v2"] = json!({"timeline": add_entries(entries)});
    json!({"data": {"user": {"result": user}}})
}

/// A `UserByScreenName` response.
pub fn user_lookup(id: u64, handle: &str) -> Value {
    json!({"data": {"user": {"result": user_result(id, handle)}}})
}
