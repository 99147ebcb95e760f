use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use pong_core::{
    db::Db,
    leaderboard::{self, NameResolver, PlayerStats},
    message::{Scope, SlackUser},
};
use std::{
    env, fs,
    io::{stdout, IsTerminal},
    path::{Path, PathBuf},
    process::exit,
};
use tracing_subscriber::EnvFilter;

/// Pong -- keep score of ping pong matches from the command line.
///
/// Works directly on the same database as the Slack bot, so results reported here show up in the
/// channel and vice versa.
#[derive(Parser)]
struct Options {
    #[clap(short, long, env = "PONG_DB")]
    db: Option<PathBuf>,

    /// Slack team ID the channel belongs to.
    #[clap(short, long, env = "PONG_TEAM", default_value = "local")]
    team: String,

    /// Slack channel ID whose leaderboard to use.
    #[clap(short, long, env = "PONG_CHANNEL", default_value = "general")]
    channel: String,

    /// Print results as JSON.
    #[clap(long)]
    json: bool,

    #[clap(subcommand)]
    command: Command,
}

impl Options {
    async fn db(&self) -> anyhow::Result<Db> {
        let db_path = match &self.db {
            Some(path) => path.clone(),
            None => Path::new(&env::var("HOME")?).join(".pong/pong.sqlite"),
        };
        if let Some(dir) = db_path.parent() {
            fs::create_dir_all(dir).context(format!("creating {}", dir.display()))?;
        }
        Db::open(&db_path).await
    }

    fn scope(&self) -> Scope {
        Scope {
            team_id: self.team.clone(),
            team_domain: self.team.clone(),
            channel_id: self.channel.clone(),
            channel_name: self.channel.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Report that `winner` beat `loser`.
    Won { winner: String, loser: String },

    /// Show the leaderboard.
    Leaderboard,

    /// List the matches counting toward the current rankings.
    Matches,

    /// Delete the most recently reported match.
    Revert,

    /// Start the rankings over. Past matches are kept but no longer count.
    Reset {
        /// When the new rankings start (RFC 3339). Defaults to now.
        #[clap(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Set the name a player is shown under, or clear it.
    Nickname { user: String, nickname: Option<String> },
}

impl Command {
    async fn run(&self, opt: &Options, db: &mut Db) -> anyhow::Result<()> {
        let scope = opt.scope();
        let now = Utc::now();
        match self {
            Self::Won { winner, loser } => {
                let (m, stats) = db
                    .report_win(&scope, &handle(winner), &handle(loser), now)
                    .await?;
                tracing::debug!(id = %m.id, "reported");
                print_leaderboard(opt, &stats)?;
            }
            Self::Leaderboard => {
                let stats = db.leaderboard(&scope, now).await?;
                print_leaderboard(opt, &stats)?;
            }
            Self::Matches => {
                let (matches, names) = db.history(&scope, now).await?;
                if opt.json {
                    println!("{}", serde_json::to_string_pretty(&matches)?);
                    return Ok(());
                }
                for m in matches {
                    println!(
                        "{}. {} {} beat {}",
                        m.id,
                        m.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        names.display_name(m.winner),
                        names.display_name(m.loser),
                    );
                }
            }
            Self::Revert => {
                let (reverted, stats) = db.revert_last(&scope, now).await?;
                match reverted {
                    Some(m) => println!(
                        "reverted match {}: {} beat {} at {}",
                        m.record.id, m.winner, m.loser, m.record.timestamp
                    ),
                    None => println!("no match to revert"),
                }
                print_leaderboard(opt, &stats)?;
            }
            Self::Reset { at } => {
                let channel = db.reset_rankings(&scope, at.unwrap_or(now)).await?;
                println!("rankings start over from {}", channel.rankings_reset_at);
            }
            Self::Nickname { user, nickname } => {
                db.set_nickname(&scope, &handle(user), nickname.as_deref())
                    .await?;
            }
        }

        Ok(())
    }
}

/// Players entered on the command line are identified by their handle.
fn handle(name: &str) -> SlackUser {
    SlackUser {
        id: name.into(),
        name: name.into(),
    }
}

fn print_leaderboard(opt: &Options, stats: &[PlayerStats]) -> anyhow::Result<()> {
    if opt.json {
        println!("{}", serde_json::to_string_pretty(stats)?);
    } else if stats.is_empty() {
        println!("no matches yet");
    } else if stdout().is_terminal() {
        println!("{}", leaderboard::ansi_render(stats));
    } else {
        println!("{}", leaderboard::render(stats));
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let opt = Options::parse();

    let mut db = match opt.db().await {
        Ok(db) => db,
        Err(err) => {
            eprintln!("failed to open database: {err:#}");
            exit(1);
        }
    };

    if let Err(err) = opt.command.run(&opt, &mut db).await {
        eprintln!("{err:#}");
        exit(1);
    }
}
