use crate::message::Reply;
use url::Url;

/// An announcement to be posted to a channel after the command that caused it has been answered.
///
/// Commands which change shared state reply to their author immediately and leave the public
/// announcement to a [`Notice`], which is delivered asynchronously to the command's response URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    NicknameChanged {
        response_url: Url,
        slack_user_id: String,
        nickname: Option<String>,
    },
    RankingsReset {
        response_url: Url,
        slack_user_id: String,
    },
}

impl Notice {
    pub fn response_url(&self) -> &Url {
        match self {
            Self::NicknameChanged { response_url, .. } => response_url,
            Self::RankingsReset { response_url, .. } => response_url,
        }
    }

    pub fn reply(&self) -> Reply {
        match self {
            Self::NicknameChanged {
                slack_user_id,
                nickname: Some(nickname),
                ..
            } => Reply::in_channel(format!(
                "<@{slack_user_id}> changed their nickname to _{nickname}_"
            )),
            Self::NicknameChanged { slack_user_id, .. } => {
                Reply::in_channel(format!("<@{slack_user_id}> removed their nickname"))
            }
            Self::RankingsReset { slack_user_id, .. } => Reply::in_channel(format!(
                "<@{slack_user_id}> reset the rankings of this channel. Everyone starts over at 1500."
            )),
        }
    }
}
