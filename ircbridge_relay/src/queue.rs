// Outbound queues, the per-session rate limiter, and the frame splitter.
//
// Every session owns a local `OutboundQueue` for its own control traffic
// (registration retries, PONG, JOIN, QUIT) and shares one global queue with
// all other sessions for relayed chat. A session drains its local queue
// first and only then takes from the global queue, at most one line per
// `RateLimiter` interval. Lines popped from the global queue are consumed by
// exactly one session.
//
// Splitting: a relayed message becomes `prefix + content + suffix`, where the
// network will prepend our `:nick!ident@host ` when delivering it to other
// clients. The content budget therefore subtracts the prefix, the suffix, the
// longest possible nick and the learned host-mask length from the 510-byte
// frame. Newlines in the text split first; any piece still over budget is cut
// on char boundaries. Every segment after the first starts with
// `CONTINUATION_MARKER`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ircbridge_protocol::MAX_LINE_CONTENT;
use ircbridge_protocol::commands::{ACTION_OPEN, CTCP_DELIMITER};

/// Marker prepended to every continuation segment of a split message.
pub const CONTINUATION_MARKER: &str = "> ";

/// Nick length assumed until the network advertises `NICKLEN`.
pub const DEFAULT_MAX_NICK_LEN: usize = 30;

/// Host-mask (`ident@host`) length assumed until `USERHOST` tells us ours.
pub const DEFAULT_USER_HOST_LEN: usize = 60;

/// Smallest nick length we accept from the network (RFC 2812 minimum).
pub const MIN_NICK_LEN: usize = 9;

/// Content budget floor, so a hostile `NICKLEN` can't shrink segments to
/// nothing.
const MIN_CONTENT_LEN: usize = 64;

/// `:` + `!` + ` ` around the sender prefix the network adds.
const SENDER_PREFIX_OVERHEAD: usize = 3;

/// FIFO of ready-to-send lines, safe to share across threads.
#[derive(Clone, Debug, Default)]
pub struct OutboundQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, line: impl Into<String>) {
        self.lock().push_back(line.into());
    }

    /// Enqueue several lines back to back, with no other producer's lines
    /// interleaved.
    pub fn push_all(&self, lines: impl IntoIterator<Item = String>) {
        self.lock().extend(lines);
    }

    pub fn pop(&self) -> Option<String> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Enforces a minimum interval between two sends.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_send: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_send: None,
        }
    }

    pub fn ready(&self, now: Instant) -> bool {
        self.last_send
            .is_none_or(|last| now.saturating_duration_since(last) >= self.min_interval)
    }

    pub fn record(&mut self, now: Instant) {
        self.last_send = Some(now);
    }
}

/// Limits learned from the network, shared by all sessions.
#[derive(Debug)]
pub struct NetworkLimits {
    max_nick_len: AtomicUsize,
    user_host_len: AtomicUsize,
}

impl Default for NetworkLimits {
    fn default() -> Self {
        Self {
            max_nick_len: AtomicUsize::new(DEFAULT_MAX_NICK_LEN),
            user_host_len: AtomicUsize::new(DEFAULT_USER_HOST_LEN),
        }
    }
}

impl NetworkLimits {
    pub fn max_nick_len(&self) -> usize {
        self.max_nick_len.load(Ordering::Relaxed)
    }

    pub fn set_max_nick_len(&self, len: usize) {
        self.max_nick_len
            .store(len.max(MIN_NICK_LEN), Ordering::Relaxed);
    }

    pub fn user_host_len(&self) -> usize {
        self.user_host_len.load(Ordering::Relaxed)
    }

    pub fn set_user_host_len(&self, len: usize) {
        self.user_host_len.store(len, Ordering::Relaxed);
    }

    /// Bytes of message content that fit in one frame between `prefix_len`
    /// and `suffix_len` bytes of fixed framing.
    pub fn content_budget(&self, prefix_len: usize, suffix_len: usize) -> usize {
        MAX_LINE_CONTENT
            .saturating_sub(prefix_len)
            .saturating_sub(suffix_len)
            .saturating_sub(self.user_host_len())
            .saturating_sub(SENDER_PREFIX_OVERHEAD)
            .saturating_sub(self.max_nick_len())
            .max(MIN_CONTENT_LEN)
    }
}

/// One relayed message before splitting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub prefix: String,
    pub text: String,
    pub suffix: String,
}

impl OutboundMessage {
    pub fn privmsg(target: &str, text: &str) -> Self {
        Self {
            prefix: format!("PRIVMSG {target} :"),
            text: text.to_string(),
            suffix: String::new(),
        }
    }

    pub fn action(target: &str, text: &str) -> Self {
        Self {
            prefix: format!("PRIVMSG {target} :{ACTION_OPEN}"),
            text: text.to_string(),
            suffix: CTCP_DELIMITER.to_string(),
        }
    }

    /// Complete protocol lines for this message, each within the frame limit.
    pub fn frames(&self, limits: &NetworkLimits) -> Vec<String> {
        let budget = limits.content_budget(self.prefix.len(), self.suffix.len());
        split_content(&self.text, budget)
            .into_iter()
            .map(|segment| format!("{}{segment}{}", self.prefix, self.suffix))
            .collect()
    }
}

/// Split `text` into segments of at most `budget` bytes. Newlines are split
/// points; blank lines are dropped. Segments after the first carry the
/// continuation marker, which counts against the budget.
pub fn split_content(text: &str, budget: usize) -> Vec<String> {
    let budget = budget.max(CONTINUATION_MARKER.len() + 4);
    let mut segments = Vec::new();
    for piece in text.split('\n') {
        let mut rest = piece.trim_end_matches('\r');
        if rest.trim().is_empty() {
            continue;
        }
        while !rest.is_empty() {
            let first = segments.is_empty();
            let room = if first {
                budget
            } else {
                budget - CONTINUATION_MARKER.len()
            };
            let (head, tail) = rest.split_at(floor_char_boundary(rest, room));
            segments.push(if first {
                head.to_string()
            } else {
                format!("{CONTINUATION_MARKER}{head}")
            });
            rest = tail;
        }
    }
    segments
}

/// Largest char boundary `<= max`, but always at least one whole char.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut at = max;
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    if at == 0 {
        s.chars().next().map_or(s.len(), char::len_utf8)
    } else {
        at
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn queue_is_fifo() {
        let queue = OutboundQueue::new();
        queue.push("one");
        queue.push_all(vec!["two".to_string(), "three".to_string()]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().as_deref(), Some("one"));
        assert_eq!(queue.pop().as_deref(), Some("two"));
        assert_eq!(queue.pop().as_deref(), Some("three"));
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn clones_share_contents() {
        let a = OutboundQueue::new();
        let b = a.clone();
        a.push("x");
        assert_eq!(b.pop().as_deref(), Some("x"));
        a.push("y");
        b.clear();
        assert!(a.is_empty());
    }

    #[test]
    fn concurrent_producers_and_consumers_lose_nothing() {
        let queue = OutboundQueue::new();
        let consumed = Arc::new(AtomicUsize::new(0));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.push(format!("{p}-{i}"));
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                let consumed = consumed.clone();
                thread::spawn(move || {
                    let mut got = Vec::new();
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while consumed.load(Ordering::SeqCst) < 1000 && Instant::now() < deadline {
                        match queue.pop() {
                            Some(line) => {
                                got.push(line);
                                consumed.fetch_add(1, Ordering::SeqCst);
                            }
                            None => thread::yield_now(),
                        }
                    }
                    got
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        let mut all: Vec<String> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort();
        let before = all.len();
        all.dedup();
        assert_eq!(before, all.len(), "duplicated entries");
        assert_eq!(all.len(), 1000);
        assert!(queue.is_empty());
    }

    #[test]
    fn per_producer_order_is_kept() {
        let queue = OutboundQueue::new();
        for i in 0..50 {
            queue.push(i.to_string());
        }
        let drained: Vec<usize> = std::iter::from_fn(|| queue.pop())
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(drained, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn rate_limiter_interval() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(Duration::from_millis(750));
        assert!(limiter.ready(start));
        limiter.record(start);
        assert!(!limiter.ready(start + Duration::from_millis(749)));
        assert!(limiter.ready(start + Duration::from_millis(750)));
    }

    #[test]
    fn default_budget_for_channel_message() {
        let limits = NetworkLimits::default();
        // 510 - 15 ("PRIVMSG #test :") - 60 - 3 - 30
        assert_eq!(limits.content_budget("PRIVMSG #test :".len(), 0), 402);
    }

    #[test]
    fn learned_limits_change_budget() {
        let limits = NetworkLimits::default();
        limits.set_max_nick_len(16);
        limits.set_user_host_len(20);
        assert_eq!(limits.content_budget(15, 0), 510 - 15 - 20 - 3 - 16);
        limits.set_max_nick_len(2);
        assert_eq!(limits.max_nick_len(), MIN_NICK_LEN);
        limits.set_user_host_len(10_000);
        assert_eq!(limits.content_budget(15, 0), MIN_CONTENT_LEN);
    }

    #[test]
    fn six_hundred_chars_split_into_two_frames() {
        let limits = NetworkLimits::default();
        let text = "x".repeat(600);
        let message = OutboundMessage::privmsg("#test", &text);
        let frames = message.frames(&limits);
        assert_eq!(frames.len(), 2);
        let budget = limits.content_budget(message.prefix.len(), 0);
        for frame in &frames {
            let content = frame.strip_prefix("PRIVMSG #test :").unwrap();
            assert!(content.len() <= budget);
            assert!(frame.len() <= MAX_LINE_CONTENT);
        }
        assert_eq!(frames[0].len(), "PRIVMSG #test :".len() + 402);
        assert!(frames[1].starts_with("PRIVMSG #test :> "));
    }

    #[test]
    fn longest_channel_fits_under_hostile_limits() {
        let limits = NetworkLimits::default();
        limits.set_user_host_len(10_000);
        let channel = format!("#{}", "c".repeat(crate::config::MAX_CHANNEL_LEN - 1));
        let text = "y".repeat(900);
        for message in [
            OutboundMessage::privmsg(&channel, &text),
            OutboundMessage::action(&channel, &text),
        ] {
            let frames = message.frames(&limits);
            assert!(frames.len() > 1);
            assert!(frames.iter().all(|f| f.len() <= MAX_LINE_CONTENT));
        }
    }

    #[test]
    fn short_message_is_one_frame() {
        let frames = OutboundMessage::privmsg("#test", "hi").frames(&NetworkLimits::default());
        assert_eq!(frames, vec!["PRIVMSG #test :hi".to_string()]);
    }

    #[test]
    fn action_frames_keep_ctcp_wrapper() {
        let frames = OutboundMessage::action("#test", "waves").frames(&NetworkLimits::default());
        assert_eq!(frames, vec!["PRIVMSG #test :\u{1}ACTION waves\u{1}".to_string()]);
    }

    #[test]
    fn newlines_split_first() {
        assert_eq!(
            split_content("one\ntwo\r\n\nthree", 100),
            vec!["one", "> two", "> three"]
        );
        assert!(split_content("\n \n", 100).is_empty());
    }

    #[test]
    fn continuation_segments_stay_within_budget() {
        let segments = split_content(&"abcdefghij".repeat(10), 30);
        assert!(segments.iter().all(|s| s.len() <= 30));
        let joined: String = segments
            .iter()
            .enumerate()
            .map(|(i, s)| {
                if i == 0 {
                    s.as_str()
                } else {
                    s.strip_prefix(CONTINUATION_MARKER).unwrap()
                }
            })
            .collect();
        assert_eq!(joined, "abcdefghij".repeat(10));
    }

    #[test]
    fn splits_on_char_boundaries() {
        let text = "♥".repeat(40); // 3 bytes each
        let segments = split_content(&text, 31);
        assert_eq!(segments[0].len(), 30);
        assert!(segments.iter().all(|s| s.len() <= 31));
    }
}
