use chrono::{DateTime, Utc};
use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(
    Clone,
    Copy,
    Deserialize,
    Serialize,
    Debug,
    Display,
    From,
    FromStr,
    Into,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct PlayerId(i64);

#[derive(
    Clone,
    Copy,
    Deserialize,
    Serialize,
    Debug,
    Display,
    From,
    FromStr,
    Into,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct MatchId(i64);

#[derive(
    Clone, Copy, Deserialize, Serialize, Debug, Display, From, FromStr, Into, PartialEq, Eq, Hash,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct ChannelId(i64);

#[derive(
    Clone, Copy, Deserialize, Serialize, Debug, Display, From, FromStr, Into, PartialEq, Eq, Hash,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct TeamId(i64);

/// A single reported result: `winner` beat `loser` in `channel` at `timestamp`.
///
/// Records are immutable once stored. The log of a channel is only ever appended to or truncated
/// from the end (revert), and every leaderboard is recomputed from it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct MatchRecord {
    pub id: MatchId,
    pub channel: ChannelId,
    pub winner: PlayerId,
    pub loser: PlayerId,
    pub timestamp: DateTime<Utc>,
}

impl MatchRecord {
    /// The key by which a channel's history is folded.
    ///
    /// Matches reported within the same second share a timestamp, so ties are broken by insertion
    /// order (`id`).
    pub fn order_key(&self) -> (DateTime<Utc>, MatchId) {
        (self.timestamp, self.id)
    }

    pub fn chronological(a: &Self, b: &Self) -> Ordering {
        a.order_key().cmp(&b.order_key())
    }
}

/// The part of a channel the rating engine cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelContext {
    pub id: ChannelId,
    /// Matches strictly before this instant are ignored by every computation.
    pub rankings_reset_at: DateTime<Utc>,
}
