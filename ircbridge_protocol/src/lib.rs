// ircbridge_protocol — line codec for the game-server chat bridge.
//
// This crate holds everything that touches the chat network's wire format and
// nothing that touches the game. It is shared by the bridge
// (`ircbridge_relay`) and by the scripted test network in `bridge_tests`.
//
// Module overview:
// - `framing.rs`:   CRLF line framing. `write_line` enforces the 512-byte
//                   frame limit; `LineReader` yields one complete line per
//                   poll and tolerates read timeouts mid-line.
// - `codes.rs`:     `ReplyCode` — named numeric replies, the RFC 2812 table,
//                   and the code → category mapping.
// - `message.rs`:   `MessageType` and `ParsedMessage`, the classified form of
//                   an inbound line.
// - `classify.rs`:  Ordered shape-matcher table that classifies a raw line,
//                   plus sender/channel/text extraction.
// - `commands.rs`:  Builders for the outbound commands the bridge sends.
//
// Design decisions:
// - **No regex.** Lines are tokenized once (prefix / command / params /
//   trailing) and each matcher inspects the tokens. Precedence lives in one
//   array, so it can be read top to bottom.
// - **Never fails on input.** Anything unrecognised becomes
//   `MessageType::Unknown`; the caller decides whether to log it.
// - **No async runtime.** Framing works on any `std::io::Read`/`Write`, so
//   the same code runs on blocking sockets with read timeouts and on
//   in-memory cursors in tests.

pub mod classify;
pub mod codes;
pub mod commands;
pub mod framing;
pub mod message;

pub use classify::{classify, parse};
pub use codes::ReplyCode;
pub use framing::{LineReader, MAX_LINE_CONTENT, MAX_LINE_LENGTH, write_line};
pub use message::{CHANNEL_SIGILS, MessageType, ParsedMessage, is_channel_name};

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Write a few commands, read them back through the line reader, and
    /// classify each one from the point of view of a session named "Bot".
    #[test]
    fn written_lines_classify_after_reading() {
        let mut wire = Vec::new();
        write_line(&mut wire, ":srv 001 Bot :Welcome").unwrap();
        write_line(&mut wire, "PING :srv").unwrap();
        write_line(
            &mut wire,
            &format!(":al!a@h {}", commands::privmsg("#test", "hello")),
        )
        .unwrap();

        let mut reader = LineReader::new(Cursor::new(wire));
        let mut kinds = Vec::new();
        while let Ok(Some(line)) = reader.poll_line() {
            kinds.push(parse(&line, "Bot").kind);
        }
        assert_eq!(
            kinds,
            vec![
                MessageType::Login,
                MessageType::Ping,
                MessageType::ChannelMessage
            ]
        );
    }
}
