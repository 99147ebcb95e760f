use crate::leaderboard::{self, PlayerStats};
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::HashMap};

/// A request that was refused before reaching the store.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum Rejection {
    #[display("bad request: {reason}")]
    BadRequest { reason: String },
    #[display("unauthorized: {reason}")]
    Unauthorized { reason: String },
}

impl Rejection {
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest {
            reason: reason.into(),
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }
}

/// A Slack user, identified by their workspace-scoped ID.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SlackUser {
    pub id: String,
    pub name: String,
}

/// The workspace and channel a command was issued in.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Scope {
    pub team_id: String,
    pub team_domain: String,
    pub channel_id: String,
    pub channel_name: String,
}

/// The form fields Slack posts for a slash command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashCommand {
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub team_id: String,
    pub team_domain: String,
    pub channel_id: String,
    pub channel_name: String,
    /// Where delayed replies may be posted, if Slack provided it.
    pub response_url: Option<String>,
}

impl SlashCommand {
    /// Decode an `application/x-www-form-urlencoded` slash command body.
    pub fn from_form(body: &[u8]) -> Result<Self, Rejection> {
        let mut fields: HashMap<Cow<str>, Cow<str>> = url::form_urlencoded::parse(body).collect();
        let mut take = |name: &str| {
            fields
                .remove(name)
                .map(Cow::into_owned)
                .ok_or_else(|| Rejection::bad_request(format!("missing field {name}")))
        };
        Ok(Self {
            user_id: take("user_id")?,
            user_name: take("user_name")?,
            text: take("text")?,
            team_id: take("team_id")?,
            team_domain: take("team_domain")?,
            channel_id: take("channel_id")?,
            channel_name: take("channel_name")?,
            response_url: take("response_url").ok(),
        })
    }

    pub fn author(&self) -> SlackUser {
        SlackUser {
            id: self.user_id.clone(),
            name: self.user_name.clone(),
        }
    }

    pub fn scope(&self) -> Scope {
        Scope {
            team_id: self.team_id.clone(),
            team_domain: self.team_domain.clone(),
            channel_id: self.channel_id.clone(),
            channel_name: self.channel_name.clone(),
        }
    }
}

/// Find the first escaped user mention (`<@U123|name>`) in command text.
pub fn parse_mention(text: &str) -> Option<SlackUser> {
    let (_, rest) = text.split_once("<@")?;
    let (mention, _) = rest.split_once('>')?;
    let (id, name) = mention.split_once('|')?;
    if id.is_empty() || name.is_empty() {
        return None;
    }
    Some(SlackUser {
        id: id.into(),
        name: name.into(),
    })
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Visible to everyone in the channel.
    InChannel,
    /// Visible only to the user who issued the command.
    Ephemeral,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Attachment {
    pub text: String,
}

/// A reply to a slash command, either returned directly or posted to its response URL.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Reply {
    pub response_type: ResponseType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Reply {
    pub fn in_channel(text: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::InChannel,
            text: text.into(),
            attachments: vec![],
        }
    }

    pub fn ephemeral(text: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::Ephemeral,
            text: text.into(),
            attachments: vec![],
        }
    }

    pub fn with_attachment(mut self, text: impl Into<String>) -> Self {
        self.attachments.push(Attachment { text: text.into() });
        self
    }

    /// The leaderboard as a code block, so that it keeps its fixed-width layout.
    pub fn leaderboard(stats: &[PlayerStats]) -> Self {
        if stats.is_empty() {
            return Self::in_channel("No matches have been reported in this channel yet.");
        }
        Self::in_channel(format!("```{}```", leaderboard::render(stats)))
    }
}
