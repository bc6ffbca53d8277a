//! Property tests for pagination termination.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use proptest::prelude::*;
use roost_scraper::{
    Cursor, PaginatedQuery, ScraperError, StopReason, Trove, Tweet, TweetId, UserId, collect,
};

#[derive(Debug, Clone, Copy)]
enum Ending {
    NoCursor,
    Stall,
    ContentFree,
}

#[derive(Debug, Clone)]
struct Page {
    ids: Vec<i64>,
    cursor: Option<String>,
}

/// A feed where the cursor `c{i}` leads to page `i + 1`.
struct Feed {
    pages: Vec<Page>,
    calls: AtomicUsize,
}

impl Feed {
    fn new(sizes: &[usize], ending: Ending) -> Self {
        let mut pages = Vec::new();
        let mut next_id = 0i64;
        for (i, size) in sizes.iter().enumerate() {
            let ids = (next_id..next_id + *size as i64).collect();
            next_id += *size as i64;
            pages.push(Page {
                ids,
                cursor: Some(format!("c{i}")),
            });
        }
        let last = sizes.len() - 1;
        match ending {
            Ending::NoCursor => pages[last].cursor = None,
            Ending::Stall => pages.push(Page {
                ids: Vec::new(),
                cursor: Some(format!("c{last}")),
            }),
            Ending::ContentFree => pages.push(Page {
                ids: Vec::new(),
                cursor: Some("elsewhere".to_string()),
            }),
        }
        Self {
            pages,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaginatedQuery for Feed {
    type Page = Page;

    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page, ScraperError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = match cursor {
            None => 0,
            Some(c) => {
                let n: usize = c.0.trim_start_matches('c').parse().map_err(|_| {
                    ScraperError::Decode(format!("unknown cursor {c}"))
                })?;
                (n + 1).min(self.pages.len() - 1)
            }
        };
        Ok(self.pages[index].clone())
    }

    fn content_entry_ids(&self, page: &Page) -> Vec<String> {
        page.ids.iter().map(|id| format!("tweet-{id}")).collect()
    }

    fn bottom_cursor(&self, page: &Page) -> Option<Cursor> {
        page.cursor.as_deref().map(Cursor::from)
    }

    fn to_trove(&self, page: &Page) -> Result<Trove, ScraperError> {
        let mut trove = Trove::new();
        for id in &page.ids {
            trove.insert_tweet(Tweet {
                id: TweetId(*id),
                user_id: Some(UserId(1)),
                ..Default::default()
            });
        }
        Ok(trove)
    }

    fn describe(&self) -> String {
        format!("{} pages", self.pages.len())
    }
}

fn ending() -> impl Strategy<Value = Ending> {
    prop_oneof![
        Just(Ending::NoCursor),
        Just(Ending::Stall),
        Just(Ending::ContentFree),
    ]
}

fn run(feed: &Feed, min_entries: usize, max_pages: usize) -> roost_scraper::Harvest {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime
        .block_on(collect(feed, min_entries, max_pages, None))
        .unwrap()
}

proptest! {
    #[test]
    fn short_feeds_end_cleanly(sizes in prop::collection::vec(1usize..15, 1..8), ending in ending()) {
        let total: usize = sizes.iter().sum();
        let feed = Feed::new(&sizes, ending);
        let harvest = run(&feed, total + 1, 1_000);

        prop_assert!(harvest.is_end_of_feed());
        prop_assert_eq!(harvest.entries, total);
        prop_assert_eq!(harvest.trove.tweets.len(), total);
        prop_assert!(feed.calls.load(Ordering::SeqCst) <= sizes.len() + 1);
        match ending {
            Ending::NoCursor => prop_assert!(matches!(harvest.stop, StopReason::NoCursor)),
            Ending::Stall => prop_assert!(matches!(harvest.stop, StopReason::CursorStalled)),
            Ending::ContentFree => prop_assert!(matches!(harvest.stop, StopReason::ContentFree)),
        }
    }

    #[test]
    fn target_stops_early(sizes in prop::collection::vec(1usize..15, 1..8), target in 1usize..40) {
        let total: usize = sizes.iter().sum();
        prop_assume!(target <= total);
        let feed = Feed::new(&sizes, Ending::NoCursor);
        let harvest = run(&feed, target, 1_000);

        prop_assert!(matches!(harvest.stop, StopReason::TargetReached));
        prop_assert!(harvest.entries >= target);
        // The page that crossed the target is the last one fetched.
        prop_assert!(harvest.entries - sizes[harvest.pages - 1] < target);
    }

    #[test]
    fn page_limit_bounds_any_feed(sizes in prop::collection::vec(1usize..5, 3..10), limit in 1usize..3) {
        let feed = Feed::new(&sizes, Ending::Stall);
        let harvest = run(&feed, usize::MAX, limit);
        prop_assert!(harvest.pages <= limit);
        prop_assert!(feed.calls.load(Ordering::SeqCst) <= limit);
    }
}

#[test]
fn twenty_likes_then_repeated_cursor() {
    let feed = Feed::new(&[20], Ending::Stall);
    let harvest = run(&feed, 100, 1_000);
    assert!(matches!(harvest.stop, StopReason::CursorStalled));
    assert_eq!(harvest.trove.tweets.len(), 20);
    assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
}
