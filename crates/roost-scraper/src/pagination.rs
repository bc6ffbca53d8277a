//! Cursor pagination engine.
//!
//! A [`PaginatedQuery`] knows how to fetch one page and turn it into a trove.
//! [`collect`] drives it until enough entries have been seen or the feed ends,
//! merging each page as it arrives, then finalizes the result.
//!
//! The feed is considered ended when any of these hold:
//! - the page has no bottom cursor
//! - the page repeats the previous cursor and adds no new entries
//! - the page carries only pagination markers (a lone pinned tweet does this)

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::{Cursor, ScraperError, SpaceId, Trove, User, UserHandle};

/// One paginated upstream query.
#[async_trait]
pub trait PaginatedQuery: Send + Sync {
    type Page: Send;

    /// Fetch the page after `cursor`, or the first page when `None`.
    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Self::Page, ScraperError>;

    /// Ids of the entries on this page that are not pagination markers.
    fn content_entry_ids(&self, page: &Self::Page) -> Vec<String>;

    fn bottom_cursor(&self, page: &Self::Page) -> Option<Cursor>;

    fn to_trove(&self, page: &Self::Page) -> Result<Trove, ScraperError>;

    /// Short description for logs and error context.
    fn describe(&self) -> String;
}

/// Follow-up lookups used to finalize a trove.
#[async_trait]
pub trait Hydrator: Send + Sync {
    async fn resolve_user(&self, handle: &UserHandle) -> Result<User, ScraperError>;

    /// Fetch a space's details as a trove with the space marked as fetched.
    async fn fetch_space(&self, id: &SpaceId) -> Result<Trove, ScraperError>;
}

/// Why the pagination loop stopped.
#[derive(Debug)]
pub enum StopReason {
    TargetReached,
    NoCursor,
    CursorStalled,
    ContentFree,
    PageLimit,
    /// A later page failed; earlier pages are kept.
    Interrupted(ScraperError),
}

/// The result of a pagination run.
#[derive(Debug)]
pub struct Harvest {
    pub trove: Trove,
    pub pages: usize,
    /// Unique content entries seen across all kept pages.
    pub entries: usize,
    pub stop: StopReason,
}

impl Harvest {
    pub fn is_end_of_feed(&self) -> bool {
        matches!(
            self.stop,
            StopReason::NoCursor | StopReason::CursorStalled | StopReason::ContentFree
        )
    }

    /// The error that cut the run short, if any.
    pub fn interruption(&self) -> Option<&ScraperError> {
        match &self.stop {
            StopReason::Interrupted(err) => Some(err),
            _ => None,
        }
    }
}

/// Fetch pages until `min_entries` content entries are seen or the feed ends.
///
/// A failure on the first page is returned. A later page that fails to fetch
/// or to normalize stops the loop and keeps the pages already merged;
/// invariant violations are always returned.
#[tracing::instrument(skip(query, hydrator), fields(query = %query.describe()))]
pub async fn collect<Q: PaginatedQuery>(
    query: &Q,
    min_entries: usize,
    max_pages: usize,
    hydrator: Option<&dyn Hydrator>,
) -> Result<Harvest, ScraperError> {
    let first = query.fetch_page(None).await?;
    let mut trove = query.to_trove(&first)?;
    let mut seen: HashSet<String> = query.content_entry_ids(&first).into_iter().collect();
    let mut cursor = query.bottom_cursor(&first);
    let mut pages = 1;

    let stop = loop {
        if seen.len() >= min_entries {
            break StopReason::TargetReached;
        }
        let Some(current) = cursor.take() else {
            break StopReason::NoCursor;
        };
        if pages >= max_pages {
            warn!(max_pages, "page limit reached before end of feed");
            break StopReason::PageLimit;
        }

        let page = match query.fetch_page(Some(&current)).await {
            Ok(page) => page,
            Err(e) if e.kind() == ErrorKind::Invariant => return Err(e),
            Err(e) => {
                warn!(error = %e, pages, "pagination interrupted, keeping earlier pages");
                break StopReason::Interrupted(e);
            }
        };

        let ids = query.content_entry_ids(&page);
        let next = query.bottom_cursor(&page);
        let new_entries = ids.iter().filter(|id| !seen.contains(*id)).count();

        if next.as_ref() == Some(&current) && new_entries == 0 {
            debug!(cursor = %current, "cursor repeated with no new entries");
            break StopReason::CursorStalled;
        }
        if ids.is_empty() {
            debug!(cursor = %current, "page without content entries");
            break StopReason::ContentFree;
        }

        match query.to_trove(&page) {
            Ok(page_trove) => trove.merge(page_trove),
            Err(e) if e.kind() == ErrorKind::Invariant => return Err(e),
            Err(e) => {
                warn!(error = %e, pages, "page failed to normalize, keeping earlier pages");
                break StopReason::Interrupted(e);
            }
        }

        debug!(new_entries, total = seen.len() + new_entries, "fetched page");
        seen.extend(ids);
        pages += 1;
        cursor = next;
    };

    match (&stop, hydrator) {
        (StopReason::Interrupted(_), _) | (_, None) => trove.finalize_offline(),
        (_, Some(hydrator)) => finalize(&mut trove, hydrator).await?,
    }

    info!(pages, entries = seen.len(), stop = ?stop, "pagination finished");
    Ok(Harvest {
        trove,
        pages,
        entries: seen.len(),
        stop,
    })
}

/// Resolve tombstone authors, backfill placeholder users and fetch space details.
///
/// Individual lookups that fail leave their target unresolved; only invariant
/// violations abort. A rate limit stops further user lookups.
pub async fn finalize(trove: &mut Trove, hydrator: &dyn Hydrator) -> Result<(), ScraperError> {
    trove.ensure_references();

    let mut unavailable: Vec<(UserHandle, bool)> = Vec::new();
    for handle in trove.tombstone_handles() {
        match hydrator.resolve_user(&handle).await {
            Ok(user) => trove.apply_resolved_user(user),
            Err(e) if e.kind() == ErrorKind::Invariant => return Err(e),
            Err(e) if e.kind() == ErrorKind::RateLimit => {
                warn!(handle = %handle, error = %e, "rate limited, leaving remaining handles queued");
                break;
            }
            Err(e) => match e.root() {
                ScraperError::UserBanned(_) => unavailable.push((handle, true)),
                ScraperError::UserDeleted(_) | ScraperError::NotFound(_) => {
                    unavailable.push((handle, false))
                }
                _ => warn!(handle = %handle, error = %e, "could not resolve tombstone author"),
            },
        }
    }

    trove.fill_missing_users();
    for (handle, banned) in unavailable {
        trove.mark_unavailable(&handle, banned);
    }

    for space_id in trove.unfetched_spaces() {
        match hydrator.fetch_space(&space_id).await {
            Ok(details) => trove.merge(details),
            Err(e) if e.kind() == ErrorKind::Invariant => return Err(e),
            Err(e) => warn!(space = %space_id, error = %e, "leaving space details unfetched"),
        }
    }
    Ok(())
}
