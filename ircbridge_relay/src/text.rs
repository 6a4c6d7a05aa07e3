// Formatting translation between game chat and the chat network.
//
// The two sides encode formatting differently:
//
// | concept   | game                                  | network                  |
// |-----------|---------------------------------------|--------------------------|
// | colour    | `&` + hex digit (`&c`), or an alias   | `\x03` + 2-digit number  |
// |           | letter (`&s`, `&w`, ...)              | (optional `,bg`)         |
// | bold      | `BOLD_MARK` (U+212C)                  | `\x02`                   |
// | reset     | `RESET_MARK` (U+211C)                 | `\x03\x0F`               |
// | emote     | control byte 0x01–0x1F (not 0x0A),    | the matching CP437 glyph |
// |           | or 0x7F                               | (☺ ☻ ♥ ...)              |
// | newline   | `&n`, `&N` or `\n`                    | split point (`\n`)       |
//
// Each direction has its own `FormatToggles`. A disabled toggle strips that
// feature instead of translating it, so all four combinations of
// colours × emotes are supported. Both directions drop control characters
// that are neither formatting nor emotes, and trim surrounding whitespace.
//
// Network → game also removes newlines (a game chat line is one line) and
// turns `%c`-style codes typed by network users into game colour codes when
// colours are enabled. With colours disabled, game colour codes typed on the
// network side are stripped so they can't be injected.
//
// Game → network keeps newlines; the outbound splitter in `queue.rs` turns
// them into separate messages.

/// Game-side marker for bold text.
pub const BOLD_MARK: char = '\u{212C}';

/// Game-side marker for "reset formatting".
pub const RESET_MARK: char = '\u{211C}';

const NET_BOLD: char = '\u{2}';
const NET_COLOR: char = '\u{3}';
const NET_RESET: char = '\u{f}';

/// Network colour number for each game hex colour `&0`..`&f`.
const GAME_TO_NET_COLOR: [u8; 16] = [1, 2, 3, 10, 5, 6, 7, 15, 14, 12, 9, 11, 4, 13, 8, 0];

/// CP437 glyphs for emote bytes 0x01..=0x1F, then 0x7F.
const EMOTE_GLYPHS: [char; 32] = [
    '☺', '☻', '♥', '♦', '♣', '♠', '•', '◘', '○', '◙', '♂', '♀', '♪', '♫', '☼', '►', //
    '◄', '↕', '‼', '¶', '§', '▬', '↨', '↑', '↓', '→', '←', '∟', '↔', '▲', '▼', '⌂',
];

/// Which formatting features survive translation in one direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FormatToggles {
    pub colors: bool,
    pub emotes: bool,
}

impl FormatToggles {
    pub const ALL: Self = Self {
        colors: true,
        emotes: true,
    };
    pub const NONE: Self = Self {
        colors: false,
        emotes: false,
    };
}

/// Resolve a game colour code letter to its hex index 0..=15. Alias letters
/// map to the default palette (system/say yellow, warning red, ...).
fn game_color_index(code: char) -> Option<usize> {
    let hex = match code.to_ascii_lowercase() {
        's' | 'y' => 'e',
        'p' | 'r' => 'f',
        'h' => 'a',
        'w' => 'c',
        'm' => 'd',
        'i' => '5',
        other => other,
    };
    hex.to_digit(16).map(|d| d as usize)
}

fn net_color_to_game(number: u32) -> Option<char> {
    let index = GAME_TO_NET_COLOR.iter().position(|&n| u32::from(n) == number)?;
    char::from_digit(index as u32, 16)
}

/// True for characters the game renders as emotes.
pub fn is_game_emote(c: char) -> bool {
    matches!(c, '\u{1}'..='\u{1f}' | '\u{7f}') && c != '\n'
}

fn emote_to_glyph(c: char) -> Option<char> {
    match c {
        '\n' => None,
        '\u{1}'..='\u{1f}' => Some(EMOTE_GLYPHS[c as usize - 1]),
        '\u{7f}' => Some(EMOTE_GLYPHS[31]),
        _ => None,
    }
}

fn glyph_to_emote(glyph: char) -> Option<char> {
    let index = EMOTE_GLYPHS.iter().position(|&g| g == glyph)?;
    let emote = if index == 31 {
        '\u{7f}'
    } else {
        char::from_u32(index as u32 + 1)?
    };
    (emote != '\n').then_some(emote)
}

/// Translate game chat text into network text.
pub fn to_network(text: &str, toggles: FormatToggles) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '&' => match chars.peek().copied() {
                Some('n' | 'N') => {
                    chars.next();
                    out.push('\n');
                }
                Some(code) if game_color_index(code).is_some() => {
                    chars.next();
                    if toggles.colors {
                        let index = game_color_index(code).unwrap_or(15);
                        out.push(NET_COLOR);
                        out.push_str(&format!("{:02}", GAME_TO_NET_COLOR[index]));
                    }
                }
                _ => out.push('&'),
            },
            BOLD_MARK => {
                if toggles.colors {
                    out.push(NET_BOLD);
                }
            }
            RESET_MARK => {
                if toggles.colors {
                    out.push(NET_COLOR);
                    out.push(NET_RESET);
                }
            }
            '\n' => out.push('\n'),
            c if is_game_emote(c) => {
                if let Some(glyph) = emote_to_glyph(c).filter(|_| toggles.emotes) {
                    out.push(glyph);
                }
            }
            '\0' => {}
            c => out.push(c),
        }
    }
    out.trim().to_string()
}

/// Translate network text into game chat text.
pub fn from_network(text: &str, toggles: FormatToggles) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            NET_COLOR => {
                let foreground = take_digits(&mut chars);
                if foreground.is_some() && chars.peek() == Some(&',') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek().is_some_and(char::is_ascii_digit) {
                        chars.next();
                        take_digits(&mut chars);
                    }
                }
                let shown = foreground.filter(|_| toggles.colors);
                if let Some(code) = shown.and_then(net_color_to_game) {
                    out.push('&');
                    out.push(code);
                }
            }
            '%' if toggles.colors && chars.peek().is_some_and(char::is_ascii_hexdigit) => {
                if let Some(code) = chars.next() {
                    out.push('&');
                    out.push(code.to_ascii_lowercase());
                }
            }
            '&' if chars.peek().is_some_and(|&n| {
                matches!(n, 'n' | 'N') || (!toggles.colors && game_color_index(n).is_some())
            }) =>
            {
                chars.next();
            }
            ' '..='~' => out.push(c),
            c if toggles.emotes => {
                if let Some(emote) = glyph_to_emote(c) {
                    out.push(emote);
                }
            }
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Read up to two ASCII digits.
fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<u32> {
    let mut value = None;
    for _ in 0..2 {
        match chars.peek().and_then(|c| c.to_digit(10)) {
            Some(d) => {
                chars.next();
                value = Some(value.unwrap_or(0) * 10 + d);
            }
            None => break,
        }
    }
    value
}

/// Network text reduced to printable ASCII plus emote glyphs, for logs.
pub fn strip_network_formatting(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            NET_COLOR => {
                if take_digits(&mut chars).is_some() && chars.peek() == Some(&',') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek().is_some_and(char::is_ascii_digit) {
                        chars.next();
                        take_digits(&mut chars);
                    }
                }
            }
            ' '..='~' => out.push(c),
            c if glyph_to_emote(c).is_some() => out.push(c),
            _ => {}
        }
    }
    out
}
