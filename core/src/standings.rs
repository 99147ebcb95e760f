use crate::{
    player::{MatchRecord, PlayerId},
    rating::{self, PlayerRatingState, Ratings},
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Ratings at one point in a channel's history, in leaderboard order.
///
/// Players are ordered by descending rating. Equal ratings are ordered by ascending player ID, so
/// that the same history always produces the same table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    players: Vec<(PlayerId, PlayerRatingState)>,
    ranks: HashMap<PlayerId, usize>,
}

impl Snapshot {
    pub fn new(ratings: Ratings) -> Self {
        let mut players: Vec<_> = ratings.into_iter().collect();
        players.sort_by(|(a_id, a), (b_id, b)| b.elo.total_cmp(&a.elo).then(a_id.cmp(b_id)));
        let ranks = players
            .iter()
            .enumerate()
            .map(|(i, (player, _))| (*player, i + 1))
            .collect();
        Self { players, ranks }
    }

    /// The 1-based rank of `player`, if they have played at all.
    pub fn rank(&self, player: PlayerId) -> Option<usize> {
        self.ranks.get(&player).copied()
    }

    pub fn get(&self, player: PlayerId) -> Option<&PlayerRatingState> {
        let rank = self.rank(player)?;
        Some(&self.players[rank - 1].1)
    }

    /// Players with their 1-based rank, best first.
    pub fn iter(&self) -> impl Iterator<Item = (usize, PlayerId, &PlayerRatingState)> {
        self.players
            .iter()
            .enumerate()
            .map(|(i, (player, state))| (i + 1, *player, state))
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// A channel's table just before and just after its most recent match.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Standings {
    before: Snapshot,
    after: Snapshot,
}

impl Standings {
    /// The table as it was before the most recent match.
    pub fn before(&self) -> &Snapshot {
        &self.before
    }

    /// The current table.
    pub fn after(&self) -> &Snapshot {
        &self.after
    }

    /// How many places `player` climbed (positive) or dropped (negative) due to the most recent
    /// match.
    ///
    /// A player who was not ranked before that match has not moved.
    pub fn movement(&self, player: PlayerId) -> i32 {
        match (self.before.rank(player), self.after.rank(player)) {
            (Some(before), Some(after)) => before as i32 - after as i32,
            _ => 0,
        }
    }

    /// The signed length of `player`'s current run of wins or losses.
    pub fn streak(&self, player: PlayerId) -> i32 {
        self.after.get(player).map(|state| state.streak).unwrap_or(0)
    }
}

/// Compute the standings of a channel from its match log.
///
/// Matches before `reset_at` are ignored. The remaining matches are folded in `(timestamp, id)`
/// order regardless of the order they are given in.
pub fn compute(matches: &[MatchRecord], reset_at: DateTime<Utc>) -> Standings {
    let mut history: Vec<&MatchRecord> = matches
        .iter()
        .filter(|m| m.timestamp >= reset_at)
        .collect();
    history.sort_by(|a, b| MatchRecord::chronological(a, b));

    let Some((last, earlier)) = history.split_last() else {
        return Standings::default();
    };
    let before = rating::fold(earlier.iter().copied());
    let after = rating::apply_match(before.clone(), last);

    Standings {
        before: Snapshot::new(before),
        after: Snapshot::new(after),
    }
}
