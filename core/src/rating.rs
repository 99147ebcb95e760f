use crate::player::{MatchRecord, PlayerId};
use std::collections::BTreeMap;

/// The Elo K-factor: the largest rating change a single result can cause, before the
/// participation bonus.
pub const K_FACTOR: f64 = 32.0;

/// Rating of a player who has not played in the channel yet.
pub const INITIAL_ELO: f64 = 1500.0;

/// Flat bonus granted to both participants of every match, regardless of the outcome.
pub const PARTICIPATION_BONUS: f64 = 1.0;

/// Rating and record of one player, as accumulated by folding a match history.
///
/// This is never stored. It is rebuilt from the match log every time a leaderboard is requested.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerRatingState {
    /// Accumulated rating, in rating points.
    pub elo: f64,
    pub played: u32,
    pub won: u32,
    pub lost: u32,
    /// Signed length of the current run: positive for consecutive wins, negative for losses.
    pub streak: i32,
}

impl Default for PlayerRatingState {
    fn default() -> Self {
        unrated()
    }
}

impl PlayerRatingState {
    /// The rating as shown to players: the accumulated value truncated toward zero.
    pub fn display_elo(&self) -> i32 {
        self.elo as i32
    }

    fn record_win(&mut self, elo: f64) {
        self.elo = elo;
        self.played += 1;
        self.won += 1;
        self.streak = if self.streak >= 0 { self.streak + 1 } else { 1 };
    }

    fn record_loss(&mut self, elo: f64) {
        self.elo = elo;
        self.played += 1;
        self.lost += 1;
        self.streak = if self.streak <= 0 { self.streak - 1 } else { -1 };
    }
}

/// Per-player state keyed by player, ordered by ID so that iteration is reproducible.
pub type Ratings = BTreeMap<PlayerId, PlayerRatingState>;

pub fn unrated() -> PlayerRatingState {
    PlayerRatingState {
        elo: INITIAL_ELO,
        played: 0,
        won: 0,
        lost: 0,
        streak: 0,
    }
}

/// Expected score of a player rated `elo` against an opponent rated `opponent`.
pub fn expected_score(elo: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - elo) / 400.0))
}

fn updated_elo(old: f64, expected: f64, score: f64) -> f64 {
    old + K_FACTOR * (score - expected) + PARTICIPATION_BONUS
}

/// Apply a single result to `ratings`.
///
/// The winner is updated first, and the loser's expected score is taken against the winner's new
/// rating. Leaderboards reported so far were computed this way, so it must not change.
pub fn apply_match(mut ratings: Ratings, m: &MatchRecord) -> Ratings {
    let winner = ratings.get(&m.winner).copied().unwrap_or_default();
    let loser = ratings.get(&m.loser).copied().unwrap_or_default();

    let winner_elo = updated_elo(winner.elo, expected_score(winner.elo, loser.elo), 1.0);
    let loser_elo = updated_elo(loser.elo, expected_score(loser.elo, winner_elo), 0.0);

    ratings.entry(m.winner).or_default().record_win(winner_elo);
    ratings.entry(m.loser).or_default().record_loss(loser_elo);
    ratings
}

/// Fold `matches`, in the order given, starting from an empty channel.
pub fn fold<'a>(matches: impl IntoIterator<Item = &'a MatchRecord>) -> Ratings {
    matches.into_iter().fold(Ratings::new(), apply_match)
}
