// Bridge configuration.
//
// `BridgeConfig` is read once, from JSON, before the bridge starts and is
// never mutated afterwards — every session gets its own clone. All fields
// have defaults so a config file only needs to name what it changes (see
// `default_bridge.json` at the crate root for a complete example).
//
// Delays are stored as milliseconds to keep the JSON readable and exposed as
// `Duration`s through accessor methods.
//
// `validate` normalises channel names (adds a missing `#`, trims whitespace)
// and rejects configs the bridge could never run with: no host, no channels,
// a nick the network would refuse outright, zero sessions.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::queue::DEFAULT_MAX_NICK_LEN;
use crate::text::FormatToggles;

/// Longest channel name accepted, in bytes. Keeps every outbound frame,
/// action wrapper included, inside the line limit.
pub const MAX_CHANNEL_LEN: usize = 200;

/// Everything the bridge needs to know before it connects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Master switch. A disabled bridge refuses to start.
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub channels: Vec<String>,
    /// Desired nick. Session 0 uses it as-is, session `i` appends `i + 1`.
    pub nick: String,
    /// Number of concurrent connections sharing the outbound load.
    pub session_count: usize,
    /// Minimum interval between two lines sent by one session.
    pub send_delay_ms: u64,
    /// Wait after a disconnect before reconnecting, and before rejoining a
    /// channel we were kicked from.
    pub reconnect_delay_ms: u64,
    /// Minimum interval between attempts to reclaim the desired nick.
    pub nick_retry_delay_ms: u64,
    /// Connect and write timeout.
    pub io_timeout_ms: u64,
    /// Real-name field sent with USER.
    pub real_name: String,
    pub formatting: FormattingConfig,
    /// Relay every channel message into the game. When off, only messages
    /// starting with `#` are relayed (with the `#` removed).
    pub forward_from_network: bool,
    /// Relay every game chat message to the network. When off, only
    /// messages starting with `#` are relayed.
    pub forward_to_network: bool,
    /// Announce network-side joins and parts in the game.
    pub announce_network_joins: bool,
    /// Announce game-side connects and disconnects on the network.
    pub announce_server_joins: bool,
    /// Announce kicks, bans and rank changes on the network.
    pub announce_server_events: bool,
    /// Identify with a nick service after registering.
    pub nickserv: Option<NickServConfig>,
}

/// Per-direction formatting toggles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormattingConfig {
    pub colors_from_network: bool,
    pub emotes_from_network: bool,
    pub colors_to_network: bool,
    pub emotes_to_network: bool,
}

/// Nick service identification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NickServConfig {
    #[serde(default = "default_nickserv_service")]
    pub service: String,
    /// Sent verbatim, e.g. `IDENTIFY hunter2`.
    pub message: String,
}

fn default_nickserv_service() -> String {
    "NickServ".into()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "irc.esper.net".into(),
            port: 6667,
            channels: vec!["#changeme".into()],
            nick: "ServerBot".into(),
            session_count: 1,
            send_delay_ms: 750,
            reconnect_delay_ms: 15_000,
            nick_retry_delay_ms: 30_000,
            io_timeout_ms: 15_000,
            real_name: "Game server chat bridge".into(),
            formatting: FormattingConfig::default(),
            forward_from_network: true,
            forward_to_network: true,
            announce_network_joins: true,
            announce_server_joins: true,
            announce_server_events: true,
            nickserv: None,
        }
    }
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            colors_from_network: true,
            emotes_from_network: true,
            colors_to_network: true,
            emotes_to_network: true,
        }
    }
}

impl FormattingConfig {
    /// Toggles for network → game text.
    pub fn from_network(&self) -> FormatToggles {
        FormatToggles {
            colors: self.colors_from_network,
            emotes: self.emotes_from_network,
        }
    }

    /// Toggles for game → network text.
    pub fn to_network(&self) -> FormatToggles {
        FormatToggles {
            colors: self.colors_to_network,
            emotes: self.emotes_to_network,
        }
    }
}

impl BridgeConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Parse and validate a JSON config string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Normalise channel names and reject unusable settings.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.session_count == 0 {
            return Err(ConfigError::NoSessions);
        }
        if !is_valid_nick(&self.nick) {
            return Err(ConfigError::InvalidNick(self.nick.clone()));
        }
        let longest = self.session_nick(self.session_count - 1);
        if longest.len() > DEFAULT_MAX_NICK_LEN {
            return Err(ConfigError::NickTooLong {
                nick: longest,
                max: DEFAULT_MAX_NICK_LEN,
            });
        }

        let mut channels = Vec::with_capacity(self.channels.len());
        for raw in &self.channels {
            let name = raw.trim();
            if name.is_empty() {
                continue;
            }
            let name = if name.starts_with('#') {
                name.to_string()
            } else {
                format!("#{name}")
            };
            if name.len() < 2
                || name.len() > MAX_CHANNEL_LEN
                || name.contains([' ', ',', '\u{7}'])
            {
                return Err(ConfigError::InvalidChannel(raw.clone()));
            }
            channels.push(name);
        }
        if channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        self.channels = channels;
        Ok(())
    }

    /// Desired nick for session `index`.
    pub fn session_nick(&self, index: usize) -> String {
        if index == 0 {
            self.nick.clone()
        } else {
            format!("{}{}", self.nick, index + 1)
        }
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn nick_retry_delay(&self) -> Duration {
        Duration::from_millis(self.nick_retry_delay_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.max(1))
    }
}

/// Nick syntax accepted by the network: a letter or special character, then
/// letters, digits, specials or `-`.
pub fn is_valid_nick(nick: &str) -> bool {
    fn special(c: char) -> bool {
        matches!(c, '_' | '-' | '[' | ']' | '\\' | '^' | '{' | '}' | '|' | '`')
    }
    let mut chars = nick.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || special(first) => {
            chars.all(|c| c.is_ascii_alphanumeric() || special(c))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_example_parses() {
        let config = BridgeConfig::from_json(include_str!("../default_bridge.json")).unwrap();
        assert!(config.enabled);
        assert_eq!(config.port, 6667);
        assert_eq!(config.channels, vec!["#changeme".to_string()]);
        assert!(config.nickserv.is_none());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = BridgeConfig::from_json(
            r#"{ "host": "irc.test", "channels": ["test", " #other "], "nick": "Srv" }"#,
        )
        .unwrap();
        assert_eq!(config.host, "irc.test");
        assert_eq!(config.channels, vec!["#test", "#other"]);
        assert_eq!(config.session_count, 1);
        assert_eq!(config.send_delay(), Duration::from_millis(750));
        assert!(config.formatting.colors_to_network);
    }

    #[test]
    fn nested_formatting_is_partial_too() {
        let config = BridgeConfig::from_json(
            r#"{ "formatting": { "colors_to_network": false } }"#,
        )
        .unwrap();
        assert!(!config.formatting.colors_to_network);
        assert!(config.formatting.emotes_to_network);
        assert_eq!(
            config.formatting.to_network(),
            FormatToggles {
                colors: false,
                emotes: true
            }
        );
    }

    #[test]
    fn nickserv_defaults_service_name() {
        let config =
            BridgeConfig::from_json(r#"{ "nickserv": { "message": "IDENTIFY pw" } }"#).unwrap();
        let ns = config.nickserv.unwrap();
        assert_eq!(ns.service, "NickServ");
        assert_eq!(ns.message, "IDENTIFY pw");
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(matches!(
            BridgeConfig::from_json(r#"{ "host": " " }"#),
            Err(ConfigError::EmptyHost)
        ));
        assert!(matches!(
            BridgeConfig::from_json(r#"{ "port": 0 }"#),
            Err(ConfigError::ZeroPort)
        ));
        assert!(matches!(
            BridgeConfig::from_json(r#"{ "channels": ["", "  "] }"#),
            Err(ConfigError::NoChannels)
        ));
        assert!(matches!(
            BridgeConfig::from_json(r#"{ "channels": ["bad chan"] }"#),
            Err(ConfigError::InvalidChannel(_))
        ));
        assert!(matches!(
            BridgeConfig::from_json(r#"{ "nick": "9lives" }"#),
            Err(ConfigError::InvalidNick(_))
        ));
        assert!(matches!(
            BridgeConfig::from_json(r#"{ "session_count": 0 }"#),
            Err(ConfigError::NoSessions)
        ));
        let long_channel = format!(r##"{{ "channels": ["#{}"] }}"##, "c".repeat(MAX_CHANNEL_LEN));
        assert!(matches!(
            BridgeConfig::from_json(&long_channel),
            Err(ConfigError::InvalidChannel(_))
        ));
        assert!(matches!(
            BridgeConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn nick_must_fit_default_length_for_every_session() {
        assert!(matches!(
            BridgeConfig::from_json(r#"{ "nick": "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefgh" }"#),
            Err(ConfigError::NickTooLong { max: 30, .. })
        ));
        let thirty = "N".repeat(DEFAULT_MAX_NICK_LEN);
        assert!(BridgeConfig::from_json(&format!(r#"{{ "nick": "{thirty}" }}"#)).is_ok());
        // The second session's nick gets a digit appended.
        let err = BridgeConfig::from_json(&format!(
            r#"{{ "nick": "{thirty}", "session_count": 2 }}"#
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::NickTooLong { ref nick, .. } if nick.len() == 31));
    }

    #[test]
    fn nick_syntax() {
        assert!(is_valid_nick("Srv"));
        assert!(is_valid_nick("[srv]_bot-2"));
        assert!(is_valid_nick("`quoted`"));
        assert!(!is_valid_nick(""));
        assert!(!is_valid_nick("2fast"));
        assert!(!is_valid_nick("has space"));
        assert!(!is_valid_nick("dot.ted"));
    }

    #[test]
    fn session_nicks() {
        let config = BridgeConfig {
            nick: "Srv".into(),
            ..BridgeConfig::default()
        };
        assert_eq!(config.session_nick(0), "Srv");
        assert_eq!(config.session_nick(1), "Srv2");
        assert_eq!(config.session_nick(2), "Srv3");
    }
}
