// Numeric reply codes.
//
// Servers answer many commands with a three-digit code in place of a named
// command (`:irc.example.net 433 * Bot :Nickname is already in use`). This
// module names the codes the bridge acts on, keeps the full RFC 2812 table so
// that "known but uninteresting" can be told apart from "never heard of it",
// and maps each known code to a coarse `MessageType` category.
//
// Several categories (list, ban-list, whowas, ...) are never acted on by the
// relay. They are classified anyway so that logs stay readable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::MessageType;

/// A three-digit numeric reply code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplyCode(pub u16);

impl ReplyCode {
    pub const WELCOME: Self = Self(1);
    pub const YOUR_HOST: Self = Self(2);
    pub const CREATED: Self = Self(3);
    pub const MY_INFO: Self = Self(4);
    /// RPL_ISUPPORT on modern networks; carries `NICKLEN=`.
    pub const BOUNCE: Self = Self(5);
    pub const USER_MODE_IS: Self = Self(221);
    pub const USER_HOST: Self = Self(302);
    pub const CHANNEL_MODE_IS: Self = Self(324);
    pub const NAMES_REPLY: Self = Self(353);
    pub const END_OF_MOTD: Self = Self(376);
    pub const ERR_NO_SUCH_CHANNEL: Self = Self(403);
    pub const ERR_ERRONEUS_NICKNAME: Self = Self(432);
    pub const ERR_NICKNAME_IN_USE: Self = Self(433);
    pub const ERR_NICKNAME_COLLISION: Self = Self(436);
    pub const ERR_INVITE_ONLY_CHANNEL: Self = Self(473);
    pub const ERR_BANNED_FROM_CHANNEL: Self = Self(474);
    pub const ERR_BAD_CHANNEL_KEY: Self = Self(475);

    /// Parse a three-digit code. Anything else is not a reply code.
    pub fn parse(token: &str) -> Option<Self> {
        if token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()) {
            token.parse().ok().map(Self)
        } else {
            None
        }
    }

    /// True if the code appears in the RFC 2812 reply table.
    pub fn is_known(self) -> bool {
        KNOWN_CODES.binary_search(&self.0).is_ok()
    }

    /// True for nickname-in-use and nickname-collision errors.
    pub fn is_nick_conflict(self) -> bool {
        self == Self::ERR_NICKNAME_IN_USE || self == Self::ERR_NICKNAME_COLLISION
    }

    /// True for channel errors that make retrying pointless: the channel does
    /// not exist, is invite-only, has banned us, or needs a key we don't have.
    pub fn is_fatal_channel_error(self) -> bool {
        matches!(
            self,
            Self::ERR_NO_SUCH_CHANNEL
                | Self::ERR_INVITE_ONLY_CHANNEL
                | Self::ERR_BANNED_FROM_CHANNEL
                | Self::ERR_BAD_CHANNEL_KEY
        )
    }

    /// Coarse category for a numeric line carrying this code.
    pub fn category(self) -> MessageType {
        if !self.is_known() {
            return MessageType::Unknown;
        }
        match self.0 {
            1..=5 => MessageType::Login,
            250..=255 | 265 | 266 => MessageType::Info,
            372 | 375 | 376 => MessageType::Motd,
            353 | 366 => MessageType::Name,
            315 | 352 => MessageType::Who,
            321..=323 => MessageType::List,
            367 | 368 => MessageType::BanList,
            331..=333 => MessageType::Topic,
            311..=313 | 317..=319 => MessageType::WhoIs,
            314 | 369 => MessageType::WhoWas,
            221 => MessageType::UserMode,
            324 => MessageType::ChannelMode,
            400..=599 => MessageType::ErrorMessage,
            _ => MessageType::Unknown,
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// RFC 2812 reply table, sorted for binary search.
const KNOWN_CODES: &[u16] = &[
    1, 2, 3, 4, 5, //
    200, 201, 202, 203, 204, 205, 206, 207, 208, 209, 210, 211, 212, 219, //
    221, 234, 235, 242, 243, //
    250, 251, 252, 253, 254, 255, 256, 257, 258, 259, 261, 262, 263, 265, 266, //
    301, 302, 303, 305, 306, //
    311, 312, 313, 314, 315, 317, 318, 319, //
    321, 322, 323, 324, 325, 331, 332, 333, 341, 342, 346, 347, 348, 349, //
    351, 352, 353, 364, 365, 366, 367, 368, 369, //
    371, 372, 374, 375, 376, 381, 382, 383, 391, 392, 393, 394, 395, //
    401, 402, 403, 404, 405, 406, 407, 408, 409, 411, 412, 413, 414, 415, //
    421, 422, 423, 424, 431, 432, 433, 436, 437, //
    441, 442, 443, 444, 445, 446, 451, //
    461, 462, 463, 464, 465, 466, 467, //
    471, 472, 473, 474, 475, 476, 477, 478, //
    481, 482, 483, 484, 485, 491, 501, 502,
];
