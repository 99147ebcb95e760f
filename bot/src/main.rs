use anyhow::bail;
use clap::Parser;
use hyper::{
    service::{make_service_fn, service_fn},
    Server,
};
use pong_core::db::Db;
use std::{convert::Infallible, net::SocketAddr, path::PathBuf};
use tokio::{spawn, sync::mpsc};
use tracing_subscriber::filter::EnvFilter;

mod app;
mod notifier;
mod signature;

use app::App;
use signature::Verifier;

/// Notices waiting for delivery beyond this are dropped.
const NOTICE_QUEUE_DEPTH: usize = 256;

/// Slack slash command service keeping a ping pong leaderboard for each channel.
#[derive(Parser)]
struct Options {
    /// SQLite database holding the match log. An in-memory database is used if not given.
    #[clap(short, long, env = "PONG_DB")]
    db: Option<PathBuf>,

    /// Address to listen on for slash commands.
    #[clap(short, long, env = "PONG_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Signing secret of the Slack app, used to verify that requests come from Slack.
    #[clap(long, env = "PONG_SIGNING_SECRET", hide_env_values = true)]
    signing_secret: Option<String>,

    /// Accept unsigned requests. Only for local testing.
    #[clap(long, env = "PONG_SKIP_VERIFICATION")]
    skip_verification: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .init();
    let opt = Options::parse();

    let verifier = match (&opt.signing_secret, opt.skip_verification) {
        (_, true) => {
            tracing::warn!("request signature verification is disabled");
            None
        }
        (Some(secret), false) => Some(Verifier::new(secret)?),
        (None, false) => bail!("a signing secret is required unless verification is skipped"),
    };

    let db = match &opt.db {
        Some(path) => Db::open(path).await?,
        None => {
            tracing::warn!("no database given, match history will be lost on exit");
            Db::memory().await?
        }
    };

    let (notices, queue) = mpsc::channel(NOTICE_QUEUE_DEPTH);
    spawn(notifier::deliver(notifier::client()?, queue));

    let app = App::new(db, notices, verifier);
    let make_service = make_service_fn(move |_| {
        let app = app.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let app = app.clone();
                async move { Ok::<_, Infallible>(app.handle(req).await) }
            }))
        }
    });

    tracing::info!(addr = %opt.listen, "listening for slash commands");
    Server::bind(&opt.listen).serve(make_service).await?;
    Ok(())
}
