// Classified inbound messages.
//
// `ParsedMessage` is what the session worker sees after the classifier has
// looked at a raw line: a `MessageType` tag, the numeric reply code (if the
// line was numeric), the sender split into nick/ident/host, the channel the
// message concerns (position depends on the type, see `classify.rs`), the
// trailing text after the first ` :`, and the raw line itself.
//
// Values are transient: produced by `classify::parse`, consumed by one call
// to the session's message handler, then dropped.

use serde::{Deserialize, Serialize};

use crate::codes::ReplyCode;

/// Semantic category of an inbound line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Ping,
    Info,
    Login,
    Motd,
    List,
    Join,
    Kick,
    Part,
    Invite,
    Quit,
    Kill,
    Who,
    WhoIs,
    WhoWas,
    Name,
    Topic,
    BanList,
    NickChange,
    TopicChange,
    UserMode,
    UserModeChange,
    ChannelMode,
    ChannelModeChange,
    ChannelMessage,
    ChannelAction,
    ChannelNotice,
    QueryMessage,
    QueryAction,
    QueryNotice,
    CtcpReply,
    CtcpRequest,
    /// An `ERROR :...` line from the server (usually right before it closes
    /// the connection).
    Error,
    /// A numeric reply in the 400–599 range.
    ErrorMessage,
    Unknown,
}

/// Characters that mark a target as a channel rather than a nick.
pub const CHANNEL_SIGILS: [char; 4] = ['#', '!', '&', '+'];

/// True if `target` names a channel.
pub fn is_channel_name(target: &str) -> bool {
    target.starts_with(CHANNEL_SIGILS)
}

/// One classified inbound line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub kind: MessageType,
    pub reply_code: Option<ReplyCode>,
    /// Full sender token without the leading `:` (`nick!ident@host` or a
    /// server name). Empty for prefix-less lines such as `PING`.
    pub from: String,
    pub nick: Option<String>,
    pub ident: Option<String>,
    pub host: Option<String>,
    pub channel: Option<String>,
    /// Text after the first ` :` separator.
    pub text: Option<String>,
    pub raw: String,
}

impl ParsedMessage {
    /// Space-separated word `index` of the raw line (word 0 is the prefix,
    /// including its leading `:`). Used for positional fields such as the
    /// kicked nick or the nick named in a 433 reply.
    pub fn word(&self, index: usize) -> Option<&str> {
        self.raw.split(' ').nth(index)
    }

    /// Text with the CTCP `ACTION` wrapper removed, for action messages.
    pub fn action_text(&self) -> Option<&str> {
        let text = self.text.as_deref()?;
        let inner = text.strip_prefix("\u{1}ACTION")?;
        let inner = inner.strip_suffix('\u{1}').unwrap_or(inner);
        Some(inner.strip_prefix(' ').unwrap_or(inner))
    }
}
