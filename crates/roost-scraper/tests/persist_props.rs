//! Property tests for the never-regress persistence rules.

use proptest::prelude::*;
use roost_scraper::{ArchiveStore, MonotonicMerge, Trove, Tweet, TweetId, User, UserHandle, UserId};

prop_compose! {
    fn capture()(
        likes in 0u64..10_000,
        retweets in 0u64..10_000,
        views in 0u64..1_000_000,
        downloaded in proptest::bool::ANY,
        conversation in proptest::bool::ANY,
        is_stub in proptest::bool::ANY,
        text in proptest::option::of("[a-z]{1,10}"),
    ) -> Tweet {
        Tweet {
            id: TweetId(1),
            num_likes: likes,
            num_retweets: retweets,
            num_views: views,
            is_content_downloaded: downloaded,
            is_conversation_scraped: conversation,
            is_stub,
            text: text.unwrap_or_default(),
            ..Default::default()
        }
    }
}

proptest! {
    #[test]
    fn counters_are_pairwise_max(stored in capture(), incoming in capture()) {
        let mut merged = stored.clone();
        merged.merge_stored(incoming.clone());
        prop_assert_eq!(merged.num_likes, stored.num_likes.max(incoming.num_likes));
        prop_assert_eq!(merged.num_retweets, stored.num_retweets.max(incoming.num_retweets));
        prop_assert_eq!(merged.num_views, stored.num_views.max(incoming.num_views));
    }

    #[test]
    fn captured_flags_never_regress(stored in capture(), incoming in capture()) {
        let mut merged = stored.clone();
        merged.merge_stored(incoming.clone());
        prop_assert!(merged.is_content_downloaded >= stored.is_content_downloaded);
        prop_assert!(merged.is_conversation_scraped >= stored.is_conversation_scraped);
        prop_assert_eq!(merged.is_stub, stored.is_stub && incoming.is_stub);
    }

    #[test]
    fn stored_text_is_kept_unless_blank(stored in capture(), incoming in capture()) {
        let mut merged = stored.clone();
        merged.merge_stored(incoming.clone());
        if stored.text.is_empty() {
            prop_assert_eq!(merged.text, incoming.text);
        } else {
            prop_assert_eq!(merged.text, stored.text);
        }
    }

    #[test]
    fn saving_in_any_order_converges(captures in prop::collection::vec(capture(), 1..6)) {
        let forward = ArchiveStore::new();
        let backward = ArchiveStore::new();
        for tweet in &captures {
            let mut trove = Trove::new();
            trove.insert_tweet(tweet.clone());
            forward.save_trove(trove);
        }
        for tweet in captures.iter().rev() {
            let mut trove = Trove::new();
            trove.insert_tweet(tweet.clone());
            backward.save_trove(trove);
        }

        let a = forward.tweet(TweetId(1)).unwrap_or_default();
        let b = backward.tweet(TweetId(1)).unwrap_or_default();
        prop_assert_eq!(a.num_likes, b.num_likes);
        prop_assert_eq!(a.is_content_downloaded, b.is_content_downloaded);
        prop_assert_eq!(a.is_stub, b.is_stub);
    }
}

#[test]
fn counter_example_from_contract() {
    let store = ArchiveStore::new();
    let save = |likes: u64| {
        let mut trove = Trove::new();
        trove.insert_tweet(Tweet {
            id: TweetId(1),
            num_likes: likes,
            ..Default::default()
        });
        store.save_trove(trove);
        store.tweet(TweetId(1)).map(|t| t.num_likes)
    };
    assert_eq!(save(100), Some(100));
    assert_eq!(save(80), Some(100));
    assert_eq!(save(150), Some(150));
}

#[test]
fn placeholder_user_never_blanks_profile() {
    let mut stored = User {
        id: UserId(4),
        handle: UserHandle::from("someone"),
        display_name: "Someone".into(),
        ..Default::default()
    };
    stored.merge_stored(User::unresolved(UserId(4)));
    assert_eq!(stored.handle.0, "someone");
    assert_eq!(stored.display_name, "Someone");
}
