use crate::{
    player::{MatchRecord, PlayerId},
    standings::{self, Standings},
};
use ansi_term::Colour;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Serialize, Serializer};
use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
};

/// Looks up the name a player should be shown under.
pub trait NameResolver {
    fn display_name(&self, player: PlayerId) -> String;
}

impl NameResolver for HashMap<PlayerId, String> {
    fn display_name(&self, player: PlayerId) -> String {
        self.get(&player)
            .cloned()
            .unwrap_or_else(|| player.to_string())
    }
}

/// Change in rank caused by the most recent match, e.g. `2↑` or `1↓`.
///
/// Renders as nothing when the player did not move.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RankMove(pub i32);

impl Display for RankMove {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self.0 {
            0 => String::new(),
            n if n > 0 => format!("{n}↑"),
            n => format!("{}↓", n.unsigned_abs()),
        };
        f.pad(&s)
    }
}

/// A run of two or more consecutive results, e.g. `3 Won` or `2 Lost`.
///
/// A single win or loss is not a streak and renders as nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Streak(pub i32);

impl Display for Streak {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self.0 {
            n if n >= 2 => format!("{n} Won"),
            n if n <= -2 => format!("{} Lost", n.unsigned_abs()),
            _ => String::new(),
        };
        f.pad(&s)
    }
}

macro_rules! serialize_display {
    ($($t:ty),*) => {
        $(
            impl Serialize for $t {
                fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.collect_str(self)
                }
            }
        )*
    };
}

serialize_display!(RankMove, Streak);

/// One row of a leaderboard.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlayerStats {
    pub rank: usize,
    pub player: PlayerId,
    pub name: String,
    pub elo: i32,
    pub played: u32,
    pub won: u32,
    pub lost: u32,
    pub win_percentage: String,
    #[serde(rename = "move")]
    pub movement: RankMove,
    pub streak: Streak,
}

fn win_percentage(won: u32, played: u32) -> String {
    format!("{:.1}%", f64::from(won) / f64::from(played) * 100.0)
}

/// Turn the current table of `standings` into leaderboard rows, best first.
pub fn assemble(standings: &Standings, names: &impl NameResolver) -> Vec<PlayerStats> {
    standings
        .after()
        .iter()
        .map(|(rank, player, state)| PlayerStats {
            rank,
            player,
            name: names.display_name(player),
            elo: state.display_elo(),
            played: state.played,
            won: state.won,
            lost: state.lost,
            win_percentage: win_percentage(state.won, state.played),
            movement: RankMove(standings.movement(player)),
            streak: Streak(standings.streak(player)),
        })
        .collect()
}

/// Compute the leaderboard of a channel from its match log.
pub fn leaderboard(
    matches: &[MatchRecord],
    reset_at: DateTime<Utc>,
    names: &impl NameResolver,
) -> Vec<PlayerStats> {
    assemble(&standings::compute(matches, reset_at), names)
}

struct Layout {
    rank_width: usize,
    name_width: usize,
}

impl Layout {
    fn new(stats: &[PlayerStats]) -> Self {
        Self {
            rank_width: stats.len().max(1).to_string().len(),
            name_width: stats
                .iter()
                .map(|p| p.name.chars().count())
                .chain([4])
                .max()
                .unwrap_or(4),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn line(
        &self,
        elo: impl Display,
        rank: impl Display,
        name: impl Display,
        won: impl Display,
        lost: impl Display,
        percentage: impl Display,
        movement: impl Display,
        streak: impl Display,
    ) -> String {
        let line = format!(
            "[ {elo:>4} ] {rank:>rw$}. {name:<nw$} {won:>3} {lost:>4} {percentage:>6} {movement} {streak}",
            rw = self.rank_width,
            nw = self.name_width,
        );
        line.trim_end().to_string()
    }

    fn header(&self) -> String {
        self.line("ELO", "#", "Name", "Won", "Lost", "Win%", " Move", "Streak")
    }
}

/// A fixed-width text table of the leaderboard.
pub fn render(stats: &[PlayerStats]) -> String {
    let layout = Layout::new(stats);
    let rows = stats.iter().map(|p| {
        layout.line(
            p.elo,
            p.rank,
            &p.name,
            p.won,
            p.lost,
            &p.win_percentage,
            format!("{:>5}", p.movement),
            p.streak,
        )
    });
    [layout.header()].into_iter().chain(rows).join("\n")
}

/// Like [`render`], with movement and streaks highlighted for a terminal.
pub fn ansi_render(stats: &[PlayerStats]) -> String {
    let layout = Layout::new(stats);
    let rows = stats.iter().map(|p| {
        let movement = format!("{:>5}", p.movement);
        let movement = match p.movement.0 {
            n if n > 0 => Colour::Green.paint(movement).to_string(),
            n if n < 0 => Colour::Red.paint(movement).to_string(),
            _ => movement,
        };
        let streak = match p.streak.0 {
            n if n >= 2 => Colour::Green.bold().paint(p.streak.to_string()).to_string(),
            n if n <= -2 => Colour::Red.bold().paint(p.streak.to_string()).to_string(),
            _ => String::new(),
        };
        layout.line(
            p.elo,
            p.rank,
            &p.name,
            p.won,
            p.lost,
            &p.win_percentage,
            movement,
            streak,
        )
    });
    [layout.header()].into_iter().chain(rows).join("\n")
}
