// Session roster and responsibility election.
//
// The roster tracks every session's state and nick under one mutex, so the
// responsible flag is always updated atomically with the state change that
// caused it. Rules:
//
// - A session entering `Ready` claims responsibility if nobody holds it.
// - A responsible session leaving `Ready` drops the flag, and the first
//   session (by index) still `Ready` picks it up. If none is ready the
//   bridge has no active relay until one becomes ready again.
//
// Consequently at most one session is responsible at any time, and whenever
// at least one session is ready exactly one is.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{info, warn};
use serde::Serialize;

/// Connection lifecycle of one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Registering,
    Ready,
    /// Terminal: stopped by shutdown or a fatal channel error.
    Stopped,
}

/// Point-in-time view of one session, for status reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub index: usize,
    pub nick: String,
    pub state: SessionState,
    pub responsible: bool,
}

#[derive(Debug)]
struct Slot {
    nick: String,
    state: SessionState,
    responsible: bool,
}

#[derive(Debug)]
pub struct Roster {
    slots: Mutex<Vec<Slot>>,
}

impl Roster {
    pub fn new(nicks: impl IntoIterator<Item = String>) -> Self {
        let slots = nicks
            .into_iter()
            .map(|nick| Slot {
                nick,
                state: SessionState::Disconnected,
                responsible: false,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a state change for session `index` and re-run the election.
    pub fn set_state(&self, index: usize, state: SessionState) {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(index) else {
            return;
        };
        slot.state = state;

        if state == SessionState::Ready {
            if !slots.iter().any(|s| s.responsible) {
                slots[index].responsible = true;
                info!("{} is now the responsible session", slots[index].nick);
            }
            return;
        }

        if slots[index].responsible {
            slots[index].responsible = false;
            match slots.iter().position(|s| s.state == SessionState::Ready) {
                Some(next) => {
                    slots[next].responsible = true;
                    info!("{} took over as the responsible session", slots[next].nick);
                }
                None => warn!("All sessions disconnected; no active relay"),
            }
        }
    }

    pub fn state(&self, index: usize) -> Option<SessionState> {
        self.lock().get(index).map(|s| s.state)
    }

    pub fn is_responsible(&self, index: usize) -> bool {
        self.lock().get(index).is_some_and(|s| s.responsible)
    }

    pub fn responsible(&self) -> Option<usize> {
        self.lock().iter().position(|s| s.responsible)
    }

    pub fn set_nick(&self, index: usize, nick: &str) {
        if let Some(slot) = self.lock().get_mut(index) {
            slot.nick = nick.to_string();
        }
    }

    /// True if `nick` belongs to one of our own sessions.
    pub fn is_bot_nick(&self, nick: &str) -> bool {
        self.lock().iter().any(|s| s.nick.eq_ignore_ascii_case(nick))
    }

    pub fn snapshot(&self) -> Vec<SessionStatus> {
        self.lock()
            .iter()
            .enumerate()
            .map(|(index, s)| SessionStatus {
                index,
                nick: s.nick.clone(),
                state: s.state,
                responsible: s.responsible,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(n: usize) -> Roster {
        Roster::new((0..n).map(|i| format!("Srv{i}")))
    }

    #[test]
    fn first_ready_claims() {
        let r = roster(2);
        r.set_state(1, SessionState::Ready);
        assert_eq!(r.responsible(), Some(1));
        r.set_state(0, SessionState::Ready);
        assert_eq!(r.responsible(), Some(1));
    }

    #[test]
    fn failover_goes_to_first_ready() {
        let r = roster(3);
        r.set_state(0, SessionState::Ready);
        r.set_state(2, SessionState::Ready);
        r.set_state(1, SessionState::Ready);
        assert!(r.is_responsible(0));
        r.set_state(0, SessionState::Disconnected);
        assert_eq!(r.responsible(), Some(1));
    }

    #[test]
    fn no_ready_sessions_leaves_flag_unset() {
        let r = roster(2);
        r.set_state(0, SessionState::Ready);
        r.set_state(0, SessionState::Disconnected);
        assert_eq!(r.responsible(), None);
        r.set_state(1, SessionState::Registering);
        assert_eq!(r.responsible(), None);
        r.set_state(1, SessionState::Ready);
        assert_eq!(r.responsible(), Some(1));
    }

    #[test]
    fn non_responsible_leaving_changes_nothing() {
        let r = roster(2);
        r.set_state(0, SessionState::Ready);
        r.set_state(1, SessionState::Ready);
        r.set_state(1, SessionState::Stopped);
        assert_eq!(r.responsible(), Some(0));
    }

    #[test]
    fn bot_nicks_and_snapshot() {
        let r = roster(2);
        r.set_nick(1, "Srv2_");
        assert!(r.is_bot_nick("srv2_"));
        assert!(!r.is_bot_nick("alice"));
        r.set_state(1, SessionState::Ready);
        let snap = r.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[1].nick, "Srv2_");
        assert!(snap[1].responsible);
        assert_eq!(snap[0].state, SessionState::Disconnected);
    }

    #[test]
    fn out_of_range_index_is_ignored() {
        let r = roster(1);
        r.set_state(5, SessionState::Ready);
        assert_eq!(r.responsible(), None);
        assert!(!r.is_responsible(5));
    }
}
