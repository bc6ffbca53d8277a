//! Archiving client for an undocumented social-media API.
//!
//! This crate turns inconsistent, partial API responses into one consistent
//! entity graph per fetch, a [`Trove`], ready to be persisted without ever
//! downgrading what was captured before.
//!
//! ## Features
//!
//! - **Decoding**: both API generations (flat legacy and nested GraphQL) behind one entry point per resource
//! - **Normalization**: tweet classification, tombstone reconstruction, text cleanup, media and cards
//! - **Troves**: stub-aware merging, positional tombstone inference, placeholder users
//! - **Pagination**: cursor loop with target and end-of-feed detection, then hydration
//! - **Sessions**: guest tokens, login flow, CSRF rotation, HTTP failure classification
//! - **Persistence**: monotonic upsert rules and session blob storage

pub mod api;
mod config;
pub mod error;
pub mod normalize;
pub mod pagination;
mod permalink;
pub mod persist;
pub mod session;
mod tombstone;
pub mod trove;
mod types;
pub mod wire;

pub use api::Scraper;
pub use config::{DEFAULT_API_BASE, DEFAULT_BEARER_TOKEN, DEFAULT_GRAPHQL_BASE, ScraperConfig};
pub use error::{ErrorKind, ScraperError};
pub use normalize::{FragmentKind, FragmentMarkers, TimelineKind, classify};
pub use pagination::{Harvest, Hydrator, PaginatedQuery, StopReason, collect, finalize};
pub use permalink::{Permalink, PermalinkError};
pub use persist::{ArchiveStore, FileSessionStore, MonotonicMerge, SaveSummary, SessionStore};
pub use session::{
    Credentials, Identity, LoginOutcome, PendingLogin, Session, SessionSnapshot, classify_failure,
};
pub use tombstone::TombstoneReason;
pub use trove::Trove;
pub use types::*;
