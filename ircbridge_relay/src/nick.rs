// Nick negotiation.
//
// A session wants one nick (`desired`) but may be registered under another
// (`actual`) while the desired one is taken. On a 433/436 reply the
// negotiator picks the next attempt:
//
//   1. The reply names our registered nick as current and the desired nick
//      as rejected: we tried to reclaim the desired nick and it is still
//      taken. Keep the working nick; the idle retry will try again later.
//   2. No numbered attempt yet and the attempt is shorter than the network's
//      maximum: append `_`.
//   3. Otherwise: bump the counter and use `desired + counter`, truncating
//      the desired nick so the result fits.
//
// Truncation can make a numbered attempt collide with an earlier one
// (`Nickname1` + `2` vs `Nicknam` + `12`), so attempts are remembered and a
// repeat skips to the next counter. Every attempt is therefore new, and
// negotiation ends as soon as the network has a free name of that shape.
//
// The configured nick may be longer than a network allows. `fit` and
// `reset` cut the desired nick to the current maximum, so no attempt ever
// exceeds it.

/// What to do after the network rejected a nick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NickOutcome {
    /// Keep the current nick; retry the desired one after the retry delay.
    RetryLater,
    /// Send `NICK` with this attempt.
    Try(String),
}

#[derive(Clone, Debug)]
pub struct NickNegotiator {
    configured: String,
    desired: String,
    actual: String,
    tries: u32,
    attempted: Vec<String>,
}

impl NickNegotiator {
    pub fn new(desired: impl Into<String>) -> Self {
        let desired = desired.into();
        Self {
            configured: desired.clone(),
            actual: desired.clone(),
            desired,
            tries: 0,
            attempted: Vec::new(),
        }
    }

    pub fn desired(&self) -> &str {
        &self.desired
    }

    /// The nick we are registered under, or are currently attempting.
    pub fn actual(&self) -> &str {
        &self.actual
    }

    pub fn has_desired(&self) -> bool {
        self.actual.eq_ignore_ascii_case(&self.desired)
    }

    /// Cut the desired nick to `max_len` bytes, leaving the current nick
    /// alone.
    pub fn fit(&mut self, max_len: usize) {
        self.desired = truncate_nick(&self.configured, max_len);
    }

    /// Start over from the desired nick, cut to `max_len`, as on a fresh
    /// connection.
    pub fn reset(&mut self, max_len: usize) {
        self.fit(max_len);
        self.actual = self.desired.clone();
        self.tries = 0;
        self.attempted.clear();
    }

    /// The network confirmed `nick` as ours.
    pub fn confirm(&mut self, nick: &str) {
        self.actual = nick.to_string();
        self.tries = 0;
        self.attempted.clear();
    }

    /// React to a nick-in-use reply. `current` is the nick the network knows
    /// us by (`*` before registration), `rejected` the refused nick.
    pub fn on_conflict(&mut self, current: &str, rejected: &str, max_len: usize) -> NickOutcome {
        if current.eq_ignore_ascii_case(&self.actual)
            && rejected.eq_ignore_ascii_case(&self.desired)
        {
            return NickOutcome::RetryLater;
        }
        self.attempted.push(rejected.to_string());
        self.attempted.push(self.actual.clone());
        let max_len = max_len.max(1);
        if self.tries == 0 && self.actual.len() < max_len {
            self.actual.push('_');
        } else {
            loop {
                self.tries += 1;
                let suffix = self.tries.to_string();
                let mut keep = max_len.saturating_sub(suffix.len()).min(self.desired.len());
                while !self.desired.is_char_boundary(keep) {
                    keep -= 1;
                }
                let candidate = format!("{}{suffix}", &self.desired[..keep]);
                if !self.attempted.iter().any(|a| a.eq_ignore_ascii_case(&candidate)) {
                    self.actual = candidate;
                    break;
                }
            }
        }
        NickOutcome::Try(self.actual.clone())
    }
}

/// Longest prefix of `nick` within `max_len` bytes (at least one char).
fn truncate_nick(nick: &str, max_len: usize) -> String {
    let mut keep = max_len.max(1).min(nick.len());
    while !nick.is_char_boundary(keep) {
        keep -= 1;
    }
    if keep == 0 {
        keep = nick.chars().next().map_or(0, char::len_utf8);
    }
    nick[..keep].to_string()
}
