// Line classifier.
//
// Turns one raw inbound line into a `ParsedMessage`. Classification runs an
// ordered table of shape matchers and takes the first hit. The order is
// load-bearing: an action is also a CTCP request, which is also a plain
// PRIVMSG; a CTCP reply is also a NOTICE. Reordering `MATCHERS` changes
// behaviour.
//
// 1. numeric reply      6. PRIVMSG             11. TOPIC   16. QUIT
// 2. PING               7. CTCP reply (NOTICE) 12. NICK    17. KILL
// 3. ERROR              8. NOTICE              13. KICK
// 4. CTCP ACTION        9. INVITE              14. PART
// 5. CTCP request      10. JOIN                15. MODE
//
// Anything that matches nothing is `Unknown`. Classification never fails:
// malformed input produces an `Unknown` message that the caller logs and
// drops.
//
// The line is first split into prefix / command / middle params / trailing
// (`Shape`). Positional fields (the channel) are then read from fixed word
// offsets of the raw line, which differ per message type — see
// `channel_word`.

use crate::codes::ReplyCode;
use crate::message::{MessageType, ParsedMessage, is_channel_name};

/// Tokenized view of a raw line.
struct Shape<'a> {
    prefix: Option<&'a str>,
    command: &'a str,
    params: Vec<&'a str>,
    trailing: Option<&'a str>,
}

impl<'a> Shape<'a> {
    fn parse(raw: &'a str) -> Option<Self> {
        let mut rest = raw;
        let prefix = match rest.strip_prefix(':') {
            Some(after) => {
                let (prefix, after) = after.split_once(' ')?;
                rest = after;
                Some(prefix)
            }
            None => None,
        };
        let (head, trailing) = match rest.find(" :") {
            Some(i) => (&rest[..i], Some(&rest[i + 2..])),
            None => (rest, None),
        };
        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?;
        Some(Self {
            prefix,
            command,
            params: words.collect(),
            trailing,
        })
    }

    fn is(&self, command: &str) -> bool {
        self.prefix.is_some() && self.command.eq_ignore_ascii_case(command)
    }

    fn target(&self) -> Option<&'a str> {
        self.params.first().copied()
    }

    /// Number of arguments, counting the trailing one.
    fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.trailing.is_some())
    }

    fn trailing_is_ctcp(&self) -> bool {
        self.trailing
            .is_some_and(|t| t.len() >= 2 && t.starts_with('\u{1}') && t.ends_with('\u{1}'))
    }
}

type Matcher = fn(&Shape<'_>, &str) -> Option<MessageType>;

/// Shape matchers in precedence order. First match wins.
const MATCHERS: &[Matcher] = &[
    numeric_reply,
    ping,
    server_error,
    action,
    ctcp_request,
    privmsg,
    ctcp_reply,
    notice,
    invite,
    join,
    topic_change,
    nick_change,
    kick,
    part,
    mode_change,
    quit,
    kill,
];

fn numeric_reply(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    s.prefix?;
    let code = ReplyCode::parse(s.command)?;
    (s.arg_count() > 0).then(|| code.category())
}

fn ping(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    (s.prefix.is_none() && s.command == "PING" && s.arg_count() > 0).then_some(MessageType::Ping)
}

fn server_error(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    (s.prefix.is_none() && s.command == "ERROR").then_some(MessageType::Error)
}

fn action(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    if !s.is("PRIVMSG") || !s.trailing_is_ctcp() {
        return None;
    }
    let target = s.target()?;
    let trailing = s.trailing?;
    if !trailing.starts_with("\u{1}ACTION ") {
        return None;
    }
    Some(if is_channel_name(target) {
        MessageType::ChannelAction
    } else {
        MessageType::QueryAction
    })
}

fn ctcp_request(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    (s.is("PRIVMSG") && s.target().is_some() && s.trailing_is_ctcp())
        .then_some(MessageType::CtcpRequest)
}

fn privmsg(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    if !s.is("PRIVMSG") || s.trailing.is_none() {
        return None;
    }
    Some(if is_channel_name(s.target()?) {
        MessageType::ChannelMessage
    } else {
        MessageType::QueryMessage
    })
}

fn ctcp_reply(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    (s.is("NOTICE") && s.target().is_some() && s.trailing_is_ctcp())
        .then_some(MessageType::CtcpReply)
}

fn notice(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    if !s.is("NOTICE") || s.trailing.is_none() {
        return None;
    }
    Some(if is_channel_name(s.target()?) {
        MessageType::ChannelNotice
    } else {
        MessageType::QueryNotice
    })
}

fn invite(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    (s.is("INVITE") && s.arg_count() >= 2).then_some(MessageType::Invite)
}

fn join(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    (s.is("JOIN") && s.arg_count() >= 1).then_some(MessageType::Join)
}

fn topic_change(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    (s.is("TOPIC") && s.target().is_some() && s.trailing.is_some())
        .then_some(MessageType::TopicChange)
}

fn nick_change(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    (s.is("NICK") && s.arg_count() >= 1).then_some(MessageType::NickChange)
}

fn kick(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    (s.is("KICK") && s.params.len() >= 2).then_some(MessageType::Kick)
}

fn part(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    (s.is("PART") && s.arg_count() >= 1).then_some(MessageType::Part)
}

fn mode_change(s: &Shape<'_>, own_nick: &str) -> Option<MessageType> {
    if !s.is("MODE") || s.arg_count() < 2 {
        return None;
    }
    Some(if s.target()? == own_nick {
        MessageType::UserModeChange
    } else {
        MessageType::ChannelModeChange
    })
}

fn quit(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    s.is("QUIT").then_some(MessageType::Quit)
}

fn kill(s: &Shape<'_>, _own_nick: &str) -> Option<MessageType> {
    (s.is("KILL") && s.target().is_some()).then_some(MessageType::Kill)
}

/// Classify a raw line (without its CR-LF). `own_nick` is the session's
/// current actual nick, used to tell user mode changes from channel ones.
pub fn classify(raw: &str, own_nick: &str) -> MessageType {
    let Some(shape) = Shape::parse(raw) else {
        return MessageType::Unknown;
    };
    MATCHERS
        .iter()
        .find_map(|matcher| matcher(&shape, own_nick))
        .unwrap_or(MessageType::Unknown)
}

/// Word offset of the channel name in the raw line, per message type.
fn channel_word(kind: MessageType) -> Option<usize> {
    match kind {
        MessageType::Join
        | MessageType::Kick
        | MessageType::Part
        | MessageType::TopicChange
        | MessageType::ChannelModeChange
        | MessageType::ChannelMessage
        | MessageType::ChannelAction
        | MessageType::ChannelNotice => Some(2),
        MessageType::Who
        | MessageType::Topic
        | MessageType::Invite
        | MessageType::BanList
        | MessageType::ChannelMode => Some(3),
        MessageType::Name => Some(4),
        _ => None,
    }
}

/// Fully parse a raw line into a `ParsedMessage`.
pub fn parse(raw: &str, own_nick: &str) -> ParsedMessage {
    let shape = Shape::parse(raw);
    let kind = classify(raw, own_nick);

    let from = shape
        .as_ref()
        .and_then(|s| s.prefix)
        .unwrap_or_default()
        .to_string();
    let bang = from.find('!');
    let at = from.find('@');
    let nick = bang.map(|i| from[..i].to_string());
    let ident = match (bang, at) {
        (Some(b), Some(a)) if a > b => Some(from[b + 1..a].to_string()),
        _ => None,
    };
    let host = at.map(|i| from[i + 1..].to_string());

    let reply_code = shape.as_ref().and_then(|s| ReplyCode::parse(s.command));
    let text = shape
        .as_ref()
        .and_then(|s| s.trailing)
        .map(str::to_string);

    let channel = channel_word(kind)
        .and_then(|i| raw.split(' ').nth(i))
        .map(|w| w.strip_prefix(':').unwrap_or(w))
        .filter(|w| !w.is_empty())
        .map(str::to_string);

    ParsedMessage {
        kind,
        reply_code,
        from,
        nick,
        ident,
        host,
        channel,
        text,
        raw: raw.to_string(),
    }
}
