use crate::{
    leaderboard::{self, NameResolver, PlayerStats},
    message::{Scope, SlackUser},
    player::{ChannelContext, ChannelId, MatchId, MatchRecord, PlayerId, TeamId},
};
use anyhow::{ensure, Context};
use chrono::{DateTime, Utc};
use futures::stream::{StreamExt, TryStreamExt};
use sqlx::{
    migrate, query, query_as,
    sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection},
    ConnectOptions, Connection, Transaction,
};
use std::{collections::HashMap, path::Path};
use tracing::instrument;

/// A match removed by [`Db::revert_last`], with the names its players were shown under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevertedMatch {
    pub record: MatchRecord,
    pub winner: String,
    pub loser: String,
}

#[derive(Debug)]
pub struct Db {
    conn: SqliteConnection,
}

impl Db {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        Self::new(
            SqliteConnectOptions::default()
                .filename(path)
                .create_if_missing(true)
                .foreign_keys(true),
        )
        .await
    }

    pub async fn memory() -> anyhow::Result<Self> {
        Self::new(Default::default()).await
    }

    async fn new(opt: SqliteConnectOptions) -> anyhow::Result<Self> {
        let mut conn = opt.connect().await?;
        migrate!("db/migrations").run(&mut conn).await?;
        Ok(Self { conn })
    }

    /// Record that `winner` beat `loser` at time `at`, and return the updated leaderboard.
    ///
    /// The match is appended and the leaderboard recomputed in a single transaction, so the
    /// returned leaderboard includes exactly the matches reported up to and including this one.
    #[instrument(skip_all, fields(channel = %scope.channel_id))]
    pub async fn report_win(
        &mut self,
        scope: &Scope,
        winner: &SlackUser,
        loser: &SlackUser,
        at: DateTime<Utc>,
    ) -> anyhow::Result<(MatchRecord, Vec<PlayerStats>)> {
        ensure!(winner.id != loser.id, "a player cannot beat themselves");

        let mut tx = self.conn.begin().await?;
        let team = upsert_team(&mut tx, scope).await?;
        let channel = upsert_channel(&mut tx, team, scope, at).await?;
        let winner = upsert_user(&mut tx, team, winner).await?;
        let loser = upsert_user(&mut tx, team, loser).await?;

        let (id,): (i64,) = query_as(
            "INSERT INTO matches (channel_id, winner_id, loser_id, timestamp) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(i64::from(channel.id))
        .bind(i64::from(winner))
        .bind(i64::from(loser))
        .bind(at)
        .fetch_one(tx.as_mut())
        .await
        .context("saving match")?;
        let m = MatchRecord {
            id: id.into(),
            channel: channel.id,
            winner,
            loser,
            timestamp: at,
        };

        let stats = channel_leaderboard(&mut tx, channel).await?;
        tx.commit().await?;

        tracing::info!(id, channel = %channel.id, %winner, %loser, "recorded match");
        Ok((m, stats))
    }

    /// The current leaderboard of a channel.
    #[instrument(skip_all, fields(channel = %scope.channel_id))]
    pub async fn leaderboard(
        &mut self,
        scope: &Scope,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PlayerStats>> {
        let mut tx = self.conn.begin().await?;
        let team = upsert_team(&mut tx, scope).await?;
        let channel = upsert_channel(&mut tx, team, scope, at).await?;
        let stats = channel_leaderboard(&mut tx, channel).await?;
        tx.commit().await?;
        Ok(stats)
    }

    /// The matches that count toward a channel's current rankings, oldest first, along with the
    /// names of everyone who played in them.
    #[instrument(skip_all, fields(channel = %scope.channel_id))]
    pub async fn history(
        &mut self,
        scope: &Scope,
        at: DateTime<Utc>,
    ) -> anyhow::Result<(Vec<MatchRecord>, HashMap<PlayerId, String>)> {
        let mut tx = self.conn.begin().await?;
        let team = upsert_team(&mut tx, scope).await?;
        let channel = upsert_channel(&mut tx, team, scope, at).await?;
        let matches = get_matches(&mut tx, channel.id)
            .await?
            .into_iter()
            .filter(|m| m.timestamp >= channel.rankings_reset_at)
            .collect();
        let names = display_names(&mut tx, channel.id).await?;
        tx.commit().await?;
        Ok((matches, names))
    }

    /// Delete the most recent match counting toward a channel's rankings.
    ///
    /// Returns the deleted match, if there was one, and the leaderboard without it. Names are
    /// resolved before deleting, while the match still links its players to the channel.
    #[instrument(skip_all, fields(channel = %scope.channel_id))]
    pub async fn revert_last(
        &mut self,
        scope: &Scope,
        at: DateTime<Utc>,
    ) -> anyhow::Result<(Option<RevertedMatch>, Vec<PlayerStats>)> {
        let mut tx = self.conn.begin().await?;
        let team = upsert_team(&mut tx, scope).await?;
        let channel = upsert_channel(&mut tx, team, scope, at).await?;

        let last = get_matches(&mut tx, channel.id)
            .await?
            .into_iter()
            .filter(|m| m.timestamp >= channel.rankings_reset_at)
            .max_by_key(MatchRecord::order_key);
        let reverted = match last {
            Some(record) => {
                let names = display_names(&mut tx, channel.id).await?;
                query("DELETE FROM matches WHERE id = $1")
                    .bind(i64::from(record.id))
                    .execute(tx.as_mut())
                    .await
                    .context(format!("deleting match {}", record.id))?;
                tracing::info!(id = %record.id, channel = %channel.id, "reverted match");
                Some(RevertedMatch {
                    winner: names.display_name(record.winner),
                    loser: names.display_name(record.loser),
                    record,
                })
            }
            None => None,
        };

        let stats = channel_leaderboard(&mut tx, channel).await?;
        tx.commit().await?;
        Ok((reverted, stats))
    }

    /// Start a channel's rankings over from `at`.
    ///
    /// No matches are deleted; earlier matches are simply ignored from now on.
    #[instrument(skip_all, fields(channel = %scope.channel_id))]
    pub async fn reset_rankings(
        &mut self,
        scope: &Scope,
        at: DateTime<Utc>,
    ) -> anyhow::Result<ChannelContext> {
        let mut tx = self.conn.begin().await?;
        let team = upsert_team(&mut tx, scope).await?;
        let channel = upsert_channel(&mut tx, team, scope, at).await?;

        query("UPDATE channel SET rankings_reset_at = $1 WHERE id = $2")
            .bind(at)
            .bind(i64::from(channel.id))
            .execute(tx.as_mut())
            .await
            .context("moving reset cutoff")?;
        tx.commit().await?;

        tracing::info!(channel = %channel.id, rankings_reset_at = %at, "reset rankings");
        Ok(ChannelContext {
            id: channel.id,
            rankings_reset_at: at,
        })
    }

    /// Set or clear the name `user` is shown under in every channel of their team.
    #[instrument(skip_all, fields(channel = %scope.channel_id))]
    pub async fn set_nickname(
        &mut self,
        scope: &Scope,
        user: &SlackUser,
        nickname: Option<&str>,
    ) -> anyhow::Result<PlayerId> {
        let mut tx = self.conn.begin().await?;
        let team = upsert_team(&mut tx, scope).await?;
        let player = upsert_user(&mut tx, team, user).await?;
        query("UPDATE app_user SET nickname = $1 WHERE id = $2")
            .bind(nickname)
            .bind(i64::from(player))
            .execute(tx.as_mut())
            .await
            .context(format!("setting nickname of {}", user.id))?;
        tx.commit().await?;

        tracing::debug!(%player, ?nickname, "set nickname");
        Ok(player)
    }
}

async fn upsert_team<'c>(tx: &mut Transaction<'c, Sqlite>, scope: &Scope) -> anyhow::Result<TeamId> {
    let (id,): (i64,) = query_as(
        "INSERT INTO team (slack_team_id, slack_team_domain) VALUES ($1, $2)
            ON CONFLICT (slack_team_id) DO UPDATE SET slack_team_domain = excluded.slack_team_domain
            RETURNING id",
    )
    .bind(&scope.team_id)
    .bind(&scope.team_domain)
    .fetch_one(tx.as_mut())
    .await
    .context(format!("saving team {}", scope.team_id))?;
    Ok(id.into())
}

/// Look up a channel, creating it if necessary.
///
/// A new channel's rankings start at `now`.
async fn upsert_channel<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    team: TeamId,
    scope: &Scope,
    now: DateTime<Utc>,
) -> anyhow::Result<ChannelContext> {
    let (id, rankings_reset_at): (i64, DateTime<Utc>) = query_as(
        "INSERT INTO channel (team_id, slack_channel_id, slack_channel_name, rankings_reset_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (team_id, slack_channel_id) DO UPDATE SET slack_channel_name = excluded.slack_channel_name
            RETURNING id, rankings_reset_at",
    )
    .bind(i64::from(team))
    .bind(&scope.channel_id)
    .bind(&scope.channel_name)
    .bind(now)
    .fetch_one(tx.as_mut())
    .await
    .context(format!("saving channel {}", scope.channel_id))?;
    Ok(ChannelContext {
        id: id.into(),
        rankings_reset_at,
    })
}

async fn upsert_user<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    team: TeamId,
    user: &SlackUser,
) -> anyhow::Result<PlayerId> {
    let (id,): (i64,) = query_as(
        "INSERT INTO app_user (team_id, slack_user_id, slack_user_name) VALUES ($1, $2, $3)
            ON CONFLICT (team_id, slack_user_id) DO UPDATE SET slack_user_name = excluded.slack_user_name
            RETURNING id",
    )
    .bind(i64::from(team))
    .bind(&user.id)
    .bind(&user.name)
    .fetch_one(tx.as_mut())
    .await
    .context(format!("saving user {}", user.id))?;
    Ok(id.into())
}

/// The full match log of a channel, including matches before its reset cutoff.
async fn get_matches<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    channel: ChannelId,
) -> anyhow::Result<Vec<MatchRecord>> {
    query_as(
        "SELECT id, winner_id, loser_id, timestamp FROM matches WHERE channel_id = $1 ORDER BY timestamp, id",
    )
    .bind(i64::from(channel))
    .fetch(tx.as_mut())
    .map(|res| {
        let (id, winner, loser, timestamp): (i64, i64, i64, DateTime<Utc>) = res?;
        Ok::<MatchRecord, anyhow::Error>(MatchRecord {
            id: MatchId::from(id),
            channel,
            winner: winner.into(),
            loser: loser.into(),
            timestamp,
        })
    })
    .try_collect()
    .await
}

/// Names of everyone who has played in a channel: their nickname if set, otherwise their Slack
/// handle.
async fn display_names<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    channel: ChannelId,
) -> anyhow::Result<HashMap<PlayerId, String>> {
    query_as(
        "SELECT id, COALESCE(nickname, slack_user_name) FROM app_user WHERE id IN (
            SELECT winner_id FROM matches WHERE channel_id = $1
            UNION
            SELECT loser_id FROM matches WHERE channel_id = $2
        )",
    )
    .bind(i64::from(channel))
    .bind(i64::from(channel))
    .fetch(tx.as_mut())
    .map(|res| {
        let (id, name): (i64, String) = res?;
        Ok::<_, anyhow::Error>((PlayerId::from(id), name))
    })
    .try_collect()
    .await
}

async fn channel_leaderboard<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    channel: ChannelContext,
) -> anyhow::Result<Vec<PlayerStats>> {
    let matches = get_matches(tx, channel.id)
        .await
        .context(format!("loading matches of channel {}", channel.id))?;
    let names = display_names(tx, channel.id)
        .await
        .context(format!("loading names for channel {}", channel.id))?;
    Ok(leaderboard::leaderboard(
        &matches,
        channel.rankings_reset_at,
        &names,
    ))
}
