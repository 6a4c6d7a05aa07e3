// Outbound command builders.
//
// The bridge only needs a small slice of the command vocabulary: identity
// registration (NICK/USER), channel membership (JOIN), addressed messages
// (PRIVMSG), keepalive (PONG), host lookup (USERHOST) and disconnect (QUIT). Each builder returns the line without its CR-LF;
// `framing::write_line` adds that.

/// CTCP delimiter byte wrapping action and other client-control messages.
pub const CTCP_DELIMITER: char = '\u{1}';

/// Text that opens an action payload inside a PRIVMSG.
pub const ACTION_OPEN: &str = "\u{1}ACTION ";

pub fn nick(nick: &str) -> String {
    format!("NICK {nick}")
}

/// `USER` registration. `mode` is the RFC 2812 bitmask (8 = invisible).
pub fn user(username: &str, mode: u8, real_name: &str) -> String {
    format!("USER {username} {mode} * :{real_name}")
}

pub fn join(channel: &str) -> String {
    format!("JOIN {channel}")
}

pub fn privmsg(target: &str, text: &str) -> String {
    format!("PRIVMSG {target} :{text}")
}

pub fn pong(token: &str) -> String {
    format!("PONG :{token}")
}

pub fn userhost(nick: &str) -> String {
    format!("USERHOST {nick}")
}

pub fn quit(reason: &str) -> String {
    format!("QUIT :{reason}")
}

/// True if `line` is a QUIT command. A session stops after sending one.
pub fn is_quit(line: &str) -> bool {
    line.get(..4).is_some_and(|head| head.eq_ignore_ascii_case("QUIT"))
        && matches!(line.as_bytes().get(4), None | Some(b' '))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_lines() {
        assert_eq!(nick("Bot"), "NICK Bot");
        assert_eq!(user("Bot", 8, "My Server"), "USER Bot 8 * :My Server");
    }

    #[test]
    fn messaging_lines() {
        assert_eq!(privmsg("#test", "hi"), "PRIVMSG #test :hi");
        assert_eq!(
            privmsg("#test", &format!("{ACTION_OPEN}waves{CTCP_DELIMITER}")),
            "PRIVMSG #test :\u{1}ACTION waves\u{1}"
        );
    }

    #[test]
    fn keepalive_and_disconnect() {
        assert_eq!(pong("irc.test"), "PONG :irc.test");
        assert_eq!(quit("bye"), "QUIT :bye");
        assert_eq!(join("#test"), "JOIN #test");
        assert_eq!(userhost("Bot"), "USERHOST Bot");
    }

    #[test]
    fn quit_detection() {
        assert!(is_quit("QUIT :bye"));
        assert!(is_quit("QUIT"));
        assert!(is_quit("quit :bye"));
        assert!(!is_quit("QUITTER"));
        assert!(!is_quit("PRIVMSG #a :QUIT"));
        assert!(!is_quit("QU"));
    }
}
