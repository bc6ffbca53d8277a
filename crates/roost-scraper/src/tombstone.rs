//! Tombstone reason codes.
//!
//! The upstream describes a removed tweet with a human-readable sentence.
//! Each known sentence maps to exactly one short code; a sentence that is not
//! in the table is rejected rather than guessed at.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ScraperError;

/// Why a tweet is no longer viewable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TombstoneReason {
    Deleted,
    Suspended,
    Hidden,
    Unavailable,
    Violated,
    AgeRestricted,
    NoLongerExists,
    NewerVersionAvailable,
}

/// Exact upstream tombstone sentences, both the "Tweet" and "Post" wordings.
const TOMBSTONE_TEXTS: &[(&str, TombstoneReason)] = &[
    ("This Tweet was deleted by the Tweet author. Learn more", TombstoneReason::Deleted),
    ("This Post was deleted by the Post author. Learn more", TombstoneReason::Deleted),
    ("This Tweet is from a suspended account. Learn more", TombstoneReason::Suspended),
    ("This Post is from a suspended account. Learn more", TombstoneReason::Suspended),
    (
        "You\u{2019}re unable to view this Tweet because this account owner limits who can view their Tweets. Learn more",
        TombstoneReason::Hidden,
    ),
    (
        "You\u{2019}re unable to view this Post because this account owner limits who can view their Posts. Learn more",
        TombstoneReason::Hidden,
    ),
    ("This Tweet is unavailable. Learn more", TombstoneReason::Unavailable),
    ("This Post is unavailable. Learn more", TombstoneReason::Unavailable),
    ("This Tweet violated the Twitter Rules. Learn more", TombstoneReason::Violated),
    ("This Post violated the X Rules. Learn more", TombstoneReason::Violated),
    (
        "Age-restricted adult content. This content might not be appropriate for people under 18 years old. To view this media, you\u{2019}ll need to log in to Twitter. Learn more",
        TombstoneReason::AgeRestricted,
    ),
    (
        "Age-restricted adult content. This content might not be appropriate for people under 18 years old. To view this media, you\u{2019}ll need to log in to X. Learn more",
        TombstoneReason::AgeRestricted,
    ),
    (
        "This Tweet is from an account that no longer exists. Learn more",
        TombstoneReason::NoLongerExists,
    ),
    (
        "This Post is from an account that no longer exists. Learn more",
        TombstoneReason::NoLongerExists,
    ),
    (
        "There\u{2019}s a new version of this Tweet. Learn more",
        TombstoneReason::NewerVersionAvailable,
    ),
    (
        "There\u{2019}s a new version of this post. Learn more",
        TombstoneReason::NewerVersionAvailable,
    ),
];

/// `reason` tokens carried by nested-format `TweetUnavailable` results.
const UNAVAILABLE_REASONS: &[(&str, TombstoneReason)] = &[
    ("Suspended", TombstoneReason::Suspended),
    ("Protected", TombstoneReason::Hidden),
    ("Unavailable", TombstoneReason::Unavailable),
    ("NsfwLoggedOut", TombstoneReason::AgeRestricted),
];

impl TombstoneReason {
    pub const ALL: [TombstoneReason; 8] = [
        TombstoneReason::Deleted,
        TombstoneReason::Suspended,
        TombstoneReason::Hidden,
        TombstoneReason::Unavailable,
        TombstoneReason::Violated,
        TombstoneReason::AgeRestricted,
        TombstoneReason::NoLongerExists,
        TombstoneReason::NewerVersionAvailable,
    ];

    /// Short code stored in the archive.
    pub fn code(&self) -> &'static str {
        match self {
            TombstoneReason::Deleted => "deleted",
            TombstoneReason::Suspended => "suspended",
            TombstoneReason::Hidden => "hidden",
            TombstoneReason::Unavailable => "unavailable",
            TombstoneReason::Violated => "violated",
            TombstoneReason::AgeRestricted => "age-restricted",
            TombstoneReason::NoLongerExists => "no-longer-exists",
            TombstoneReason::NewerVersionAvailable => "newer-version-available",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    /// Map an upstream tombstone sentence to its reason.
    ///
    /// Unknown text is an invariant violation: the table must be extended,
    /// never bypassed.
    pub fn from_upstream_text(text: &str) -> Result<Self, ScraperError> {
        TOMBSTONE_TEXTS
            .iter()
            .find(|(known, _)| *known == text)
            .map(|(_, reason)| *reason)
            .ok_or_else(|| {
                ScraperError::InvariantViolation(format!("unrecognized tombstone text: {:?}", text))
            })
    }

    /// Map a nested-format `TweetUnavailable.reason` token.
    pub fn from_unavailable_reason(reason: &str) -> Result<Self, ScraperError> {
        UNAVAILABLE_REASONS
            .iter()
            .find(|(known, _)| *known == reason)
            .map(|(_, reason)| *reason)
            .ok_or_else(|| {
                ScraperError::InvariantViolation(format!(
                    "unrecognized tweet-unavailable reason: {:?}",
                    reason
                ))
            })
    }
}

impl fmt::Display for TombstoneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
