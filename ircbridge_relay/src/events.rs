// Events crossing the boundary between the bridge and the game server.
//
// Inbound (network → game): the responsible session turns relayed channel
// traffic into `InboundEvent`s and hands them to the `ChatSink` the game
// registered. `to_game_text` renders each event in the game's chat format,
// tagged with the IRC colour so players can tell relayed lines apart.
//
// Outbound (game → network): `ChatKind` tags player chat passed to
// `Bridge::on_chat`, and `ServerEvent` covers player lifecycle
// announcements passed to `Bridge::announce`.

use std::sync::mpsc::Sender;

use serde::Serialize;

use crate::text::BOLD_MARK;

/// Game colour tag in front of every relayed line.
const IRC_TAG: &str = "&i(IRC)";

/// Something that happened on the network, as seen by the responsible
/// session. Texts are already in game format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum InboundEvent {
    Chat {
        channel: String,
        nick: String,
        text: String,
    },
    Action {
        channel: String,
        nick: String,
        text: String,
    },
    Joined {
        channel: String,
        nick: String,
    },
    /// A user left a channel (`channel` set) or the network (`channel` unset).
    Left {
        channel: Option<String>,
        nick: String,
        reason: Option<String>,
    },
    Kicked {
        channel: String,
        nick: String,
        by: String,
        reason: Option<String>,
    },
    NickChanged {
        old: String,
        new: String,
    },
}

impl InboundEvent {
    /// The line to broadcast in game chat.
    pub fn to_game_text(&self) -> String {
        match self {
            Self::Chat { nick, text, .. } => format!("{IRC_TAG} {nick}&f: {text}"),
            Self::Action { nick, text, .. } => format!("{IRC_TAG} * {nick} {text}"),
            Self::Joined { channel, nick } => format!("{IRC_TAG} {nick} joined {channel}"),
            Self::Left {
                channel: Some(channel),
                nick,
                ..
            } => format!("{IRC_TAG} {nick} left {channel}"),
            Self::Left {
                channel: None,
                nick,
                reason: Some(reason),
            } if !reason.is_empty() => format!("{IRC_TAG} {nick} left IRC ({reason})"),
            Self::Left { nick, .. } => format!("{IRC_TAG} {nick} left IRC"),
            Self::Kicked {
                channel,
                nick,
                by,
                reason: Some(reason),
            } if !reason.is_empty() => {
                format!("{IRC_TAG} {by} kicked {nick} from {channel} ({reason})")
            }
            Self::Kicked {
                channel, nick, by, ..
            } => format!("{IRC_TAG} {by} kicked {nick} from {channel}"),
            Self::NickChanged { old, new } => {
                format!("{IRC_TAG} {old} is now known as {new}")
            }
        }
    }
}

/// Receives relayed network events. Called from session worker threads, so
/// implementations must not block for long.
pub trait ChatSink: Send + Sync {
    fn deliver(&self, event: InboundEvent);
}

/// `ChatSink` that forwards events over an mpsc channel. Events are dropped
/// once the receiver is gone.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: Sender<InboundEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<InboundEvent>) -> Self {
        Self { tx }
    }
}

impl ChatSink for ChannelSink {
    fn deliver(&self, event: InboundEvent) {
        let _ = self.tx.send(event);
    }
}

/// Kind of game chat passed to `Bridge::on_chat`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    /// Ordinary global chat.
    Global,
    /// `/me` emote.
    Me,
    /// Server-wide `/say` broadcast.
    Say,
}

/// Player lifecycle events announced on the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    PlayerConnected {
        player: String,
    },
    PlayerDisconnected {
        player: String,
    },
    PlayerKicked {
        player: String,
        by: String,
        reason: Option<String>,
    },
    PlayerBanned {
        player: String,
        by: String,
        reason: Option<String>,
    },
    PlayerUnbanned {
        player: String,
        by: String,
    },
    RankChanged {
        player: String,
        by: String,
        old_rank: String,
        new_rank: String,
    },
}

impl ServerEvent {
    /// Connect/disconnect events, gated by `announce_server_joins`. The rest
    /// are gated by `announce_server_events`.
    pub fn is_join_event(&self) -> bool {
        matches!(
            self,
            Self::PlayerConnected { .. } | Self::PlayerDisconnected { .. }
        )
    }

    /// Announcement text in game format, bold.
    pub fn to_game_text(&self) -> String {
        let body = match self {
            Self::PlayerConnected { player } => format!("Player {player}&S connected."),
            Self::PlayerDisconnected { player } => format!("Player {player}&S left the server."),
            Self::PlayerKicked { player, by, reason } => {
                format!("Player {player}&S was kicked by {by}&S{}", reason_suffix(reason))
            }
            Self::PlayerBanned { player, by, reason } => {
                format!("Player {player}&S was banned by {by}&S{}", reason_suffix(reason))
            }
            Self::PlayerUnbanned { player, by } => {
                format!("Player {player}&S was unbanned by {by}&S.")
            }
            Self::RankChanged {
                player,
                by,
                old_rank,
                new_rank,
            } => format!("{by}&S changed the rank of {player}&S from {old_rank}&S to {new_rank}&S."),
        };
        format!("{BOLD_MARK}&S{body}")
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason.as_deref() {
        Some(reason) if !reason.trim().is_empty() => format!(": {reason}"),
        _ => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::text::{FormatToggles, to_network};

    #[test]
    fn inbound_rendering() {
        let chat = InboundEvent::Chat {
            channel: "#test".into(),
            nick: "alice".into(),
            text: "hello".into(),
        };
        assert_eq!(chat.to_game_text(), "&i(IRC) alice&f: hello");

        let action = InboundEvent::Action {
            channel: "#test".into(),
            nick: "alice".into(),
            text: "waves".into(),
        };
        assert_eq!(action.to_game_text(), "&i(IRC) * alice waves");

        let joined = InboundEvent::Joined {
            channel: "#test".into(),
            nick: "bob".into(),
        };
        assert_eq!(joined.to_game_text(), "&i(IRC) bob joined #test");
    }

    #[test]
    fn leaving_and_kicks() {
        let part = InboundEvent::Left {
            channel: Some("#test".into()),
            nick: "bob".into(),
            reason: None,
        };
        assert_eq!(part.to_game_text(), "&i(IRC) bob left #test");
        let quit = InboundEvent::Left {
            channel: None,
            nick: "bob".into(),
            reason: Some("Ping timeout".into()),
        };
        assert_eq!(quit.to_game_text(), "&i(IRC) bob left IRC (Ping timeout)");
        let kick = InboundEvent::Kicked {
            channel: "#test".into(),
            nick: "bob".into(),
            by: "op".into(),
            reason: Some(String::new()),
        };
        assert_eq!(kick.to_game_text(), "&i(IRC) op kicked bob from #test");
        let renamed = InboundEvent::NickChanged {
            old: "bob".into(),
            new: "robert".into(),
        };
        assert_eq!(renamed.to_game_text(), "&i(IRC) bob is now known as robert");
    }

    #[test]
    fn channel_sink_forwards() {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.deliver(InboundEvent::Joined {
            channel: "#a".into(),
            nick: "x".into(),
        });
        assert!(matches!(rx.try_recv(), Ok(InboundEvent::Joined { .. })));
        drop(rx);
        // Receiver gone: delivery is a no-op.
        sink.deliver(InboundEvent::NickChanged {
            old: "a".into(),
            new: "b".into(),
        });
    }

    #[test]
    fn server_events_render_bold() {
        let event = ServerEvent::PlayerConnected {
            player: "Steve".into(),
        };
        assert!(event.is_join_event());
        assert_eq!(
            to_network(&event.to_game_text(), FormatToggles::NONE),
            "Player Steve connected."
        );
        let ban = ServerEvent::PlayerBanned {
            player: "Griefer".into(),
            by: "Admin".into(),
            reason: Some("griefing".into()),
        };
        assert!(!ban.is_join_event());
        assert_eq!(
            to_network(&ban.to_game_text(), FormatToggles::NONE),
            "Player Griefer was banned by Admin: griefing"
        );
        assert!(to_network(&ban.to_game_text(), FormatToggles::ALL).starts_with('\u{2}'));
    }
}
