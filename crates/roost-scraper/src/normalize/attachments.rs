//! Media and card attachments.
//!
//! Cards come in three flavors, told apart by name: polls, audio spaces and
//! plain link previews.

use super::{decode_err, parse_rfc3339};
use crate::wire::legacy::{ApiCard, ApiMedia};
use crate::{
    Image, ImageId, Poll, PollChoice, PollId, ScraperError, Space, SpaceId, TweetId, Url, Video,
    VideoId,
};

/// Card binding keys that may carry a link preview image, best first.
const CARD_THUMBNAIL_KEYS: &[&str] = &[
    "thumbnail_image_large",
    "summary_photo_image_large",
    "player_image_large",
];

pub(super) enum CardKind {
    Poll,
    Space,
    Link,
}

pub(super) fn card_kind(card: &ApiCard) -> CardKind {
    if card.name.starts_with("poll") {
        CardKind::Poll
    } else if card.name.ends_with("audiospace") {
        CardKind::Space
    } else {
        CardKind::Link
    }
}

pub(super) fn parse_poll(card: &ApiCard, tweet_id: TweetId) -> Result<Poll, ScraperError> {
    let id: PollId = card
        .url
        .strip_prefix("card://")
        .ok_or_else(|| decode_err(format!("poll card without card:// id: {:?}", card.url)))?
        .parse()?;

    let mut choices = Vec::new();
    for n in 1..=4 {
        let Some(label) = card.string(&format!("choice{n}_label")) else {
            continue;
        };
        let votes = match card.string(&format!("choice{n}_count")) {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| decode_err(format!("poll {id} choice {n} count {raw:?}: {e}")))?,
            None => 0,
        };
        choices.push(PollChoice {
            label: label.to_string(),
            votes,
        });
    }

    let voting_duration_secs = match card.string("duration_minutes") {
        Some(raw) => {
            raw.parse::<u64>()
                .map_err(|e| decode_err(format!("poll {id} duration {raw:?}: {e}")))?
                * 60
        }
        None => 0,
    };

    Ok(Poll {
        id,
        tweet_id,
        choices,
        voting_duration_secs,
        voting_ends_at: card.string("end_datetime_utc").map(parse_rfc3339).transpose()?,
        last_updated_at: card
            .string("last_updated_datetime_utc")
            .map(parse_rfc3339)
            .transpose()?,
    })
}

pub(super) fn space_from_card(card: &ApiCard) -> Result<Space, ScraperError> {
    let id = card
        .string("id")
        .ok_or_else(|| decode_err("audiospace card without a space id"))?;
    Ok(Space {
        id: SpaceId::from(id),
        short_url: card.string("card_url").unwrap_or(card.url.as_str()).to_string(),
        is_details_fetched: false,
        ..Default::default()
    })
}

pub(super) fn apply_link_card(url: &mut Url, card: &ApiCard) {
    url.has_card = true;
    url.title = card.string("title").map(str::to_string);
    url.description = card.string("description").map(str::to_string);
    url.domain = card
        .string("vanity_url")
        .or_else(|| card.string("domain"))
        .map(str::to_string);
    url.thumbnail_remote_url = CARD_THUMBNAIL_KEYS
        .iter()
        .find_map(|key| card.image_url(key))
        .map(str::to_string);
}

pub(super) fn image_from(media: &ApiMedia, tweet_id: TweetId) -> Result<Image, ScraperError> {
    Ok(Image {
        id: media.id_str.parse::<ImageId>()?,
        tweet_id,
        width: media.original_info.width,
        height: media.original_info.height,
        remote_url: media.media_url_https.clone(),
        is_downloaded: false,
    })
}

pub(super) fn video_from(media: &ApiMedia, tweet_id: TweetId) -> Result<Video, ScraperError> {
    let info = media.video_info.as_ref();
    // DMCA'd videos come without variants.
    let best = info
        .into_iter()
        .flat_map(|i| i.variants.iter())
        .filter(|v| v.content_type == "video/mp4")
        .max_by_key(|v| v.bitrate.unwrap_or(0));

    Ok(Video {
        id: media.id_str.parse::<VideoId>()?,
        tweet_id,
        width: media.original_info.width,
        height: media.original_info.height,
        remote_url: best.map(|v| v.url.clone()).unwrap_or_default(),
        thumbnail_remote_url: media.media_url_https.clone(),
        duration_ms: info.map(|i| i.duration_millis).unwrap_or(0),
        view_count: media.media_stats.as_ref().map(|s| s.view_count).unwrap_or(0),
        is_gif: media.kind == "animated_gif",
        is_blocked_by_dmca: media
            .ext_media_availability
            .as_ref()
            .and_then(|a| a.reason.as_deref())
            == Some("Dmcaed"),
        is_downloaded: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_api_tweet;
    use crate::wire::legacy::ApiTweet;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn api_tweet(value: serde_json::Value) -> ApiTweet {
        serde_json::from_value(value).unwrap()
    }

    fn card(value: serde_json::Value) -> ApiCard {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_card_kind_by_name() {
        let kind = |name: &str| card_kind(&card(json!({"name": name, "url": "x"})));
        assert!(matches!(kind("poll2choice_text_only"), CardKind::Poll));
        assert!(matches!(kind("3691233323:audiospace"), CardKind::Space));
        assert!(matches!(kind("summary_large_image"), CardKind::Link));
    }

    #[test]
    fn test_video_takes_highest_bitrate_mp4() {
        let api = api_tweet(json!({
            "id_str": "10",
            "extended_entities": {"media": [{
                "id_str": "3", "type": "video", "media_url_https": "thumb.jpg",
                "video_info": {"duration_millis": 1500, "variants": [
                    {"content_type": "application/x-mpegURL", "url": "playlist.m3u8"},
                    {"bitrate": 256000, "content_type": "video/mp4", "url": "low.mp4"},
                    {"bitrate": 2176000, "content_type": "video/mp4", "url": "high.mp4"}
                ]},
                "ext_media_availability": {"status": "Available"}
            }]}
        }));
        let video = &normalize_api_tweet(&api, None).unwrap().tweet.videos[0];
        assert_eq!(video.remote_url, "high.mp4");
        assert_eq!(video.duration_ms, 1500);
        assert!(!video.is_gif);
        assert!(!video.is_blocked_by_dmca);
    }

    #[test]
    fn test_poll_card() {
        let card: ApiCard = serde_json::from_value(json!({
            "name": "poll3choice_text_only",
            "url": "card://1234",
            "binding_values": {
                "choice1_label": {"string_value": "yes"},
                "choice1_count": {"string_value": "10"},
                "choice2_label": {"string_value": "no"},
                "choice2_count": {"string_value": "5"},
                "choice3_label": {"string_value": "maybe"},
                "choice3_count": {"string_value": "0"},
                "duration_minutes": {"string_value": "1440"},
                "end_datetime_utc": {"string_value": "2023-06-05T20:10:57Z"}
            }
        }))
        .unwrap();
        let api = api_tweet(json!({"id_str": "10"}));
        let tweet = normalize_api_tweet(&api, Some(&card)).unwrap().tweet;
        let poll = &tweet.polls[0];
        assert_eq!(poll.id, PollId(1234));
        assert_eq!(poll.choices.len(), 3);
        assert_eq!(poll.total_votes(), 15);
        assert_eq!(poll.voting_duration_secs, 86_400);
        assert!(poll.voting_ends_at.is_some());
    }

    #[test]
    fn test_poll_card_with_bad_count_is_decode_error() {
        let card: ApiCard = serde_json::from_value(json!({
            "name": "poll2choice_text_only",
            "url": "card://1",
            "binding_values": {
                "choice1_label": {"string_value": "yes"},
                "choice1_count": {"string_value": "ten"}
            }
        }))
        .unwrap();
        let api = api_tweet(json!({"id_str": "10"}));
        assert!(matches!(
            normalize_api_tweet(&api, Some(&card)),
            Err(ScraperError::Decode(_))
        ));
    }

    #[test]
    fn test_space_card_yields_unfetched_space() {
        let card: ApiCard = serde_json::from_value(json!({
            "name": "3691233323:audiospace",
            "url": "https://t.co/space",
            "binding_values": {"id": {"string_value": "1OdKrBnaEPXKX"}}
        }))
        .unwrap();
        let api = api_tweet(json!({"id_str": "10", "full_text": "join https://t.co/space"}));
        let normalized = normalize_api_tweet(&api, Some(&card)).unwrap();
        assert_eq!(normalized.tweet.text, "join");
        assert_eq!(normalized.tweet.space_id, Some(SpaceId::from("1OdKrBnaEPXKX")));
        assert!(!normalized.space.unwrap().is_details_fetched);
    }
}
