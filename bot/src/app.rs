use crate::signature::Verifier;
use anyhow::Context;
use chrono::Utc;
use hyper::{body::HttpBody, header, Body, Method, Request, Response, StatusCode};
use pong_core::{
    db::Db,
    message::{parse_mention, Rejection, Reply, SlashCommand},
    notice::Notice,
};
use std::sync::Arc;
use tokio::sync::{mpsc::Sender, Mutex};

/// Longest nickname a player may choose.
pub const MAX_NICKNAME_LEN: usize = 32;

/// Largest request body accepted. Slash command forms are well under a kilobyte.
pub const MAX_BODY_LEN: usize = 16 * 1024;

#[derive(Clone)]
pub struct App {
    // All commands go through this one connection, which serializes each channel's
    // append-and-recompute against every other command.
    db: Arc<Mutex<Db>>,
    notices: Sender<Notice>,
    verifier: Option<Arc<Verifier>>,
}

impl App {
    pub fn new(db: Db, notices: Sender<Notice>, verifier: Option<Verifier>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            notices,
            verifier: verifier.map(Arc::new),
        }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        match self.route(req).await {
            Ok(response) => response,
            Err(err) => match err.downcast_ref::<Rejection>() {
                Some(Rejection::BadRequest { .. }) => {
                    tracing::info!(%method, %path, "{err:#}");
                    status(StatusCode::BAD_REQUEST, "Bad Request")
                }
                Some(Rejection::Unauthorized { .. }) => {
                    tracing::warn!(%method, %path, "{err:#}");
                    status(StatusCode::UNAUTHORIZED, "Unauthorized")
                }
                None => {
                    tracing::error!(%method, %path, "{err:#}");
                    status(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                }
            },
        }
    }

    async fn route(&self, req: Request<Body>) -> anyhow::Result<Response<Body>> {
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/health") => return Ok(status(StatusCode::OK, "OK")),
            (&Method::POST, "/won" | "/leaderboard" | "/revert" | "/reset" | "/nickname") => {}
            _ => return Ok(status(StatusCode::NOT_FOUND, "Not Found")),
        }

        let (parts, body) = req.into_parts();
        let body = read_body(body).await?;
        if let Some(verifier) = &self.verifier {
            verifier.verify(&parts.headers, &body)?;
        }
        let command = SlashCommand::from_form(&body)?;
        tracing::debug!(path = parts.uri.path(), ?command, "command");

        let reply = match parts.uri.path() {
            "/won" => self.won(command).await?,
            "/leaderboard" => self.leaderboard(command).await?,
            "/revert" => self.revert(command).await?,
            "/reset" => self.reset(command).await?,
            "/nickname" => self.nickname(command).await?,
            _ => return Ok(status(StatusCode::NOT_FOUND, "Not Found")),
        };
        json(&reply)
    }

    async fn won(&self, command: SlashCommand) -> anyhow::Result<Reply> {
        let winner = command.author();
        let Some(loser) = parse_mention(&command.text) else {
            return Ok(
                Reply::ephemeral(":x: You should mention someone when reporting a win, like this:")
                    .with_attachment(format!(
                        "`/won <@{}>` _(but don't mention yourself, this is just an example)_",
                        winner.id
                    )),
            );
        };
        if loser.id == winner.id {
            return Ok(Reply::ephemeral(
                ":x: You cannot mention yourself. Mention the player you have won.",
            ));
        }

        let (_, stats) = self
            .db
            .lock()
            .await
            .report_win(&command.scope(), &winner, &loser, Utc::now())
            .await
            .context("reporting win")?;
        Ok(Reply::leaderboard(&stats))
    }

    async fn leaderboard(&self, command: SlashCommand) -> anyhow::Result<Reply> {
        let stats = self
            .db
            .lock()
            .await
            .leaderboard(&command.scope(), Utc::now())
            .await
            .context("loading leaderboard")?;
        Ok(Reply::leaderboard(&stats))
    }

    async fn revert(&self, command: SlashCommand) -> anyhow::Result<Reply> {
        let (reverted, stats) = self
            .db
            .lock()
            .await
            .revert_last(&command.scope(), Utc::now())
            .await
            .context("reverting match")?;
        let Some(reverted) = reverted else {
            return Ok(Reply::ephemeral(":x: There is no match to revert."));
        };

        let Reply { text, .. } = Reply::leaderboard(&stats);
        Ok(Reply::in_channel(format!(
            "<@{}> reverted {}'s win over {}.\n{text}",
            command.user_id, reverted.winner, reverted.loser
        )))
    }

    async fn reset(&self, command: SlashCommand) -> anyhow::Result<Reply> {
        self.db
            .lock()
            .await
            .reset_rankings(&command.scope(), Utc::now())
            .await
            .context("resetting rankings")?;
        self.announce(
            &command,
            |response_url| Notice::RankingsReset {
                response_url,
                slack_user_id: command.user_id.clone(),
            },
        );
        Ok(Reply::ephemeral(
            ":heavy_check_mark: Rankings of this channel have been reset",
        ))
    }

    async fn nickname(&self, command: SlashCommand) -> anyhow::Result<Reply> {
        let nickname = command.text.trim();
        if nickname.chars().count() > MAX_NICKNAME_LEN {
            return Ok(Reply::ephemeral(format!(
                ":x: Nicknames can be at most {MAX_NICKNAME_LEN} characters long"
            )));
        }
        let nickname = Some(nickname).filter(|nickname| !nickname.is_empty());

        self.db
            .lock()
            .await
            .set_nickname(&command.scope(), &command.author(), nickname)
            .await
            .context("setting nickname")?;
        self.announce(&command, |response_url| Notice::NicknameChanged {
            response_url,
            slack_user_id: command.user_id.clone(),
            nickname: nickname.map(String::from),
        });

        Ok(Reply::ephemeral(match nickname {
            Some(nickname) => format!(":heavy_check_mark: Your nickname will be changed to _{nickname}_"),
            None => ":heavy_check_mark: Your nickname will be removed".into(),
        }))
    }

    /// Queue a notice for the channel `command` came from.
    ///
    /// The command has already taken effect, so failing to queue the notice is not an error.
    fn announce(&self, command: &SlashCommand, notice: impl FnOnce(url::Url) -> Notice) {
        let Some(response_url) = &command.response_url else {
            tracing::debug!("no response URL, not announcing");
            return;
        };
        let response_url = match response_url.parse() {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(%response_url, "invalid response URL: {err:#}");
                return;
            }
        };
        if let Err(err) = self.notices.try_send(notice(response_url)) {
            tracing::warn!("dropping notice: {err:#}");
        }
    }
}

/// Buffer a request body, refusing it once it grows past [`MAX_BODY_LEN`].
async fn read_body(mut body: Body) -> anyhow::Result<Vec<u8>> {
    if body
        .size_hint()
        .upper()
        .is_some_and(|len| len > MAX_BODY_LEN as u64)
    {
        return Err(Rejection::bad_request("request body too large").into());
    }

    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.context("reading request body")?;
        if buf.len() + chunk.len() > MAX_BODY_LEN {
            return Err(Rejection::bad_request("request body too large").into());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

fn status(code: StatusCode, text: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(text));
    *response.status_mut() = code;
    response
}

fn json(reply: &Reply) -> anyhow::Result<Response<Body>> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(reply)?))?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
    use pong_core::message::ResponseType;
    use tokio::sync::mpsc::{self, Receiver};

    const SECRET: &str = "000000000000000000000000000000000000000000000000000000000000000000";

    async fn app(verifier: Option<Verifier>) -> (App, Receiver<Notice>) {
        let (sender, receiver) = mpsc::channel(8);
        let db = Db::memory().await.unwrap();
        (App::new(db, sender, verifier), receiver)
    }

    fn form(fields: &[(&str, &str)]) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish()
    }

    fn command(user: &str, text: &str) -> String {
        let user_id = format!("{user}_id");
        form(&[
            ("user_id", user_id.as_str()),
            ("user_name", user),
            ("text", text),
            ("team_id", "team_1"),
            ("team_domain", "some-team"),
            ("channel_id", "channel_1"),
            ("channel_name", "some-channel"),
            ("response_url", "https://hooks.slack.com/commands/T1/1/abc"),
        ])
    }

    fn post(path: &str, body: String) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Body::from(body))
            .unwrap()
    }

    async fn decode(response: Response<Body>) -> Reply {
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn table(reply: &Reply) -> Vec<&str> {
        reply.text.trim_matches('`').lines().collect()
    }

    #[tokio::test]
    async fn test_authorization() {
        let (app, _) = app(Some(Verifier::new(SECRET).unwrap())).await;
        let body = "token=123&team_id=456&team_domain=abc&channel_id=789&channel_name=ch_name&user_id=ABC";
        let signed = |timestamp: &str| {
            Request::builder()
                .method(Method::POST)
                .uri("/won")
                .header(
                    SIGNATURE_HEADER,
                    "v0=1a2eeb0ac2a8a562cc98047a50bef95639047e7d2aeb54cb5a88a40617dedb57",
                )
                .header(TIMESTAMP_HEADER, timestamp)
                .body(Body::from(body))
                .unwrap()
        };

        // Correctly signed, but missing most fields.
        let response = app.handle(signed("1571051763")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.handle(signed("1571051764")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.handle(post("/won", body.into())).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_routes() {
        let (app, _) = app(None).await;

        let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(app.handle(health).await.status(), StatusCode::OK);

        let response = app.handle(post("/lost", command("gregor", ""))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.handle(post("/nickname", String::new())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let (app, _) = app(None).await;

        let padding = "x".repeat(MAX_BODY_LEN);
        let response = app
            .handle(post("/won", command("gregor", &padding)))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Without a length known up front, the body is cut off while reading.
        let (mut sender, body) = Body::channel();
        tokio::spawn(async move {
            for _ in 0..=MAX_BODY_LEN / 1024 {
                if sender.send_data(vec![b'x'; 1024].into()).await.is_err() {
                    break;
                }
            }
        });
        let request = Request::builder()
            .method(Method::POST)
            .uri("/won")
            .body(body)
            .unwrap();
        assert_eq!(app.handle(request).await.status(), StatusCode::BAD_REQUEST);

        let response = app
            .handle(post("/won", command("gregor", "<@yuri_id|yuri>")))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_won() {
        let (app, _) = app(None).await;

        let response = app
            .handle(post(
                "/won",
                command("gregor", "<@some_player_with_long_name_id|some_player_with_long_name>"),
            ))
            .await;
        let reply = decode(response).await;
        assert_eq!(reply.response_type, ResponseType::InChannel);
        assert_eq!(
            table(&reply),
            [
                "[  ELO ] #. Name                       Won Lost   Win%  Move Streak",
                "[ 1517 ] 1. gregor                       1    0 100.0%",
                "[ 1485 ] 2. some_player_with_long_name   0    1   0.0%",
            ]
        );

        let response = app
            .handle(post(
                "/won",
                command("some_player_with_long_name", "<@yuri_id|yuri>"),
            ))
            .await;
        assert_eq!(
            table(&decode(response).await),
            [
                "[  ELO ] #. Name                       Won Lost   Win%  Move Streak",
                "[ 1517 ] 1. gregor                       1    0 100.0%",
                "[ 1503 ] 2. some_player_with_long_name   1    1  50.0%",
                "[ 1485 ] 3. yuri                         0    1   0.0%",
            ]
        );

        let response = app
            .handle(post("/leaderboard", command("yuri", "")))
            .await;
        assert_eq!(table(&decode(response).await).len(), 4);
    }

    #[tokio::test]
    async fn test_won_without_mention() {
        let (app, _) = app(None).await;

        let reply = decode(app.handle(post("/won", command("gregor", "yuri"))).await).await;
        assert_eq!(reply.response_type, ResponseType::Ephemeral);
        assert!(reply.text.contains("You should mention someone"));
        assert_eq!(reply.attachments.len(), 1);

        let reply = decode(
            app.handle(post("/won", command("gregor", "<@gregor_id|gregor>")))
                .await,
        )
        .await;
        assert!(reply.text.contains("You cannot mention yourself"));

        let reply = decode(app.handle(post("/leaderboard", command("gregor", ""))).await).await;
        assert!(reply.text.starts_with("No matches"));
    }

    #[tokio::test]
    async fn test_revert() {
        let (app, _) = app(None).await;

        let reply = decode(app.handle(post("/revert", command("gregor", ""))).await).await;
        assert_eq!(reply.response_type, ResponseType::Ephemeral);

        app.handle(post("/won", command("gregor", "<@yuri_id|yuri>")))
            .await;
        app.handle(post("/won", command("yuri", "<@long_id|long>")))
            .await;
        let reply = decode(app.handle(post("/revert", command("admin", ""))).await).await;
        assert_eq!(reply.response_type, ResponseType::InChannel);
        let (summary, board) = reply.text.split_once('\n').unwrap();
        assert_eq!(summary, "<@admin_id> reverted yuri's win over long.");
        assert_eq!(
            board.trim_matches('`').lines().collect::<Vec<_>>(),
            [
                "[  ELO ] #. Name                       Won Lost   Win%  Move Streak",
                "[ 1517 ] 1. gregor                       1    0 100.0%",
                "[ 1485 ] 2. yuri                         0    1   0.0%",
            ]
        );

        let reply = decode(app.handle(post("/revert", command("admin", ""))).await).await;
        assert!(reply
            .text
            .starts_with("<@admin_id> reverted gregor's win over yuri."));

        let reply = decode(app.handle(post("/leaderboard", command("gregor", ""))).await).await;
        assert!(reply.text.starts_with("No matches"));
    }

    #[tokio::test]
    async fn test_reset() {
        let (app, mut notices) = app(None).await;

        app.handle(post("/won", command("gregor", "<@yuri_id|yuri>")))
            .await;
        let reply = decode(app.handle(post("/reset", command("gregor", ""))).await).await;
        assert_eq!(reply.response_type, ResponseType::Ephemeral);

        let notice = notices.recv().await.unwrap();
        assert_eq!(
            notice,
            Notice::RankingsReset {
                response_url: "https://hooks.slack.com/commands/T1/1/abc".parse().unwrap(),
                slack_user_id: "gregor_id".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_nickname() {
        let (app, mut notices) = app(None).await;

        let reply = decode(app.handle(post("/nickname", command("gregor", " The Wall "))).await).await;
        assert_eq!(reply.response_type, ResponseType::Ephemeral);
        assert!(reply.text.contains("_The Wall_"));

        let notice = notices.recv().await.unwrap();
        assert_eq!(
            notice.reply().text,
            "<@gregor_id> changed their nickname to _The Wall_"
        );

        let response = app
            .handle(post("/won", command("gregor", "<@yuri_id|yuri>")))
            .await;
        assert!(decode(response).await.text.contains("The Wall"));

        let long = "x".repeat(MAX_NICKNAME_LEN + 1);
        let reply = decode(app.handle(post("/nickname", command("gregor", &long))).await).await;
        assert!(reply.text.starts_with(":x:"));
        assert!(notices.try_recv().is_err());
    }
}
