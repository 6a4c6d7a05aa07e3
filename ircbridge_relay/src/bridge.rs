// The bridge facade: the only type the game server talks to.
//
// `Bridge::new` validates the configuration. `start` spawns one worker
// thread per session (see `session.rs`); `stop` asks them to QUIT and waits
// briefly before forcing their sockets closed. Outbound operations translate
// game text (see `text.rs`), split it into frames (see `queue.rs`) and push
// the frames onto the shared queue once per configured channel. Whichever
// ready session's turn comes first sends each frame.
//
// None of the outbound operations fail: when the bridge is stopped they
// drop the message, and network trouble is handled inside the sessions.
//
// Every `start` gets a fresh `Roster`. A worker from an earlier run that
// outlived `stop` (stuck in a connect) only ever reports into its own run's
// roster, so it cannot unseat a session of the current run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ircbridge_protocol::commands;
use log::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::election::{Roster, SessionStatus};
use crate::error::BridgeError;
use crate::events::{ChatKind, ChatSink, ServerEvent};
use crate::queue::{NetworkLimits, OutboundMessage, OutboundQueue};
use crate::session::{Session, Shared, ShutdownSignal, SocketSlot, close_socket};
use crate::text::{self, RESET_MARK};

/// How long `stop` waits for sessions to send QUIT and exit.
pub const STOP_GRACE: Duration = Duration::from_secs(1);

/// Handle on one running session worker.
struct Worker {
    local: OutboundQueue,
    socket: SocketSlot,
    thread: JoinHandle<()>,
}

struct Running {
    shutdown: ShutdownSignal,
    workers: Vec<Worker>,
}

pub struct Bridge {
    config: Arc<BridgeConfig>,
    sink: Arc<dyn ChatSink>,
    global: OutboundQueue,
    limits: Arc<NetworkLimits>,
    roster: Mutex<Arc<Roster>>,
    running: Mutex<Option<Running>>,
}

impl Bridge {
    /// Validate `config` and prepare a stopped bridge delivering inbound
    /// events to `sink`.
    pub fn new(mut config: BridgeConfig, sink: Arc<dyn ChatSink>) -> Result<Self, BridgeError> {
        config.validate()?;
        let roster = new_roster(&config);
        Ok(Self {
            config: Arc::new(config),
            sink,
            global: OutboundQueue::new(),
            limits: Arc::new(NetworkLimits::default()),
            roster: Mutex::new(Arc::new(roster)),
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Roster of the current (or most recent) run.
    fn roster(&self) -> Arc<Roster> {
        self.roster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Spawn the session workers.
    pub fn start(&self) -> Result<(), BridgeError> {
        if !self.config.enabled {
            return Err(BridgeError::Disabled);
        }
        let mut running = self.lock_running();
        if running.is_some() {
            return Err(BridgeError::AlreadyRunning);
        }

        let roster = Arc::new(new_roster(&self.config));
        *self.roster.lock().unwrap_or_else(PoisonError::into_inner) = roster.clone();
        let shutdown = ShutdownSignal::new();
        let shared = Shared {
            config: self.config.clone(),
            global: self.global.clone(),
            limits: self.limits.clone(),
            roster,
            sink: self.sink.clone(),
            shutdown: shutdown.clone(),
        };

        let mut workers = Vec::with_capacity(self.config.session_count);
        for index in 0..self.config.session_count {
            let local = OutboundQueue::new();
            let socket = SocketSlot::default();
            let session = Session::new(index, shared.clone(), local.clone(), socket.clone());
            let spawned = thread::Builder::new()
                .name(format!("ircbridge-session-{index}"))
                .spawn(move || session.run());
            match spawned {
                Ok(thread) => workers.push(Worker {
                    local,
                    socket,
                    thread,
                }),
                Err(e) => {
                    shutdown.raise();
                    for worker in &workers {
                        close_socket(&worker.socket);
                    }
                    return Err(BridgeError::Spawn(e));
                }
            }
        }

        info!(
            "Bridge started: {} session(s) to {}:{}",
            workers.len(),
            self.config.host,
            self.config.port
        );
        *running = Some(Running { shutdown, workers });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    /// Per-session status, in session order.
    pub fn statuses(&self) -> Vec<SessionStatus> {
        self.roster().snapshot()
    }

    /// Ask every session to QUIT with `reason`, wait up to `STOP_GRACE`,
    /// then close whatever sockets are still open.
    pub fn stop(&self, reason: &str) -> Result<(), BridgeError> {
        let Some(running) = self.lock_running().take() else {
            return Err(BridgeError::NotRunning);
        };
        let reason: String = reason.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
        for worker in &running.workers {
            worker.local.clear();
            worker.local.push(commands::quit(&reason));
        }
        running.shutdown.raise();

        let deadline = Instant::now() + STOP_GRACE;
        while Instant::now() < deadline
            && running.workers.iter().any(|w| !w.thread.is_finished())
        {
            thread::sleep(Duration::from_millis(10));
        }

        for worker in running.workers {
            if worker.thread.is_finished() {
                let _ = worker.thread.join();
            } else {
                warn!("Session did not stop in time; closing its socket");
                close_socket(&worker.socket);
            }
        }
        self.global.clear();
        info!("Bridge stopped: {reason}");
        Ok(())
    }

    /// Relay a line of game text to every channel.
    pub fn send_channel_message(&self, message: &str) {
        self.enqueue(message, OutboundMessage::privmsg);
    }

    /// Relay a line of game text to every channel as an action.
    pub fn send_action(&self, message: &str) {
        self.enqueue(message, OutboundMessage::action);
    }

    fn enqueue(&self, message: &str, build: fn(&str, &str) -> OutboundMessage) {
        if !self.is_running() {
            debug!("Bridge not running; dropped outbound message");
            return;
        }
        let text = text::to_network(message, self.config.formatting.to_network());
        if text.is_empty() {
            return;
        }
        for channel in &self.config.channels {
            self.global.push_all(build(channel, &text).frames(&self.limits));
        }
    }

    /// Relay player chat. Global chat is forwarded when `forward_to_network`
    /// is set, or when it starts with `#` (which is removed).
    pub fn on_chat(&self, kind: ChatKind, player: &str, message: &str) {
        match kind {
            ChatKind::Global => {
                let message = if self.config.forward_to_network {
                    message
                } else {
                    match message.strip_prefix('#') {
                        Some(rest) => rest,
                        None => return,
                    }
                };
                if message.trim().is_empty() {
                    return;
                }
                self.send_channel_message(&format!("{player}{RESET_MARK}: {message}"));
            }
            ChatKind::Me if self.config.forward_to_network => {
                self.send_action(&format!("* {player}{RESET_MARK} {message}"));
            }
            ChatKind::Say if self.config.forward_to_network => self.send_action(message),
            ChatKind::Me | ChatKind::Say => {}
        }
    }

    /// Announce a player lifecycle event, if announcements of its kind are
    /// enabled.
    pub fn announce(&self, event: &ServerEvent) {
        let enabled = if event.is_join_event() {
            self.config.announce_server_joins
        } else {
            self.config.announce_server_events
        };
        if enabled {
            self.send_action(&event.to_game_text());
        }
    }

    #[cfg(test)]
    fn queued(&self) -> Vec<String> {
        std::iter::from_fn(|| self.global.pop()).collect()
    }
}

fn new_roster(config: &BridgeConfig) -> Roster {
    Roster::new((0..config.session_count).map(|i| config.session_nick(i)))
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop("Bridge shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::SessionState;
    use crate::events::InboundEvent;

    struct Discard;

    impl ChatSink for Discard {
        fn deliver(&self, _event: InboundEvent) {}
    }

    fn config() -> BridgeConfig {
        BridgeConfig {
            // Nothing listens on port 9 of localhost; sessions just retry.
            host: "127.0.0.1".into(),
            port: 9,
            channels: vec!["#a".into(), "b".into()],
            nick: "Srv".into(),
            session_count: 2,
            reconnect_delay_ms: 60_000,
            formatting: crate::config::FormattingConfig {
                colors_to_network: false,
                ..Default::default()
            },
            ..BridgeConfig::default()
        }
    }

    fn bridge(config: BridgeConfig) -> Bridge {
        Bridge::new(config, Arc::new(Discard)).unwrap()
    }

    #[test]
    fn new_validates_config() {
        let b = bridge(config());
        assert_eq!(b.config().channels, vec!["#a", "#b"]);
        assert!(matches!(
            Bridge::new(
                BridgeConfig {
                    channels: vec![],
                    ..config()
                },
                Arc::new(Discard)
            ),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn disabled_bridge_refuses_to_start() {
        let b = bridge(BridgeConfig {
            enabled: false,
            ..config()
        });
        assert!(matches!(b.start(), Err(BridgeError::Disabled)));
        assert!(!b.is_running());
    }

    #[test]
    fn start_stop_lifecycle() {
        let b = bridge(config());
        assert!(matches!(b.stop("x"), Err(BridgeError::NotRunning)));
        b.start().unwrap();
        assert!(b.is_running());
        assert!(matches!(b.start(), Err(BridgeError::AlreadyRunning)));
        assert_eq!(b.statuses().len(), 2);

        let started = Instant::now();
        b.stop("bye").unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!b.is_running());
        for status in b.statuses() {
            assert_eq!(status.state, SessionState::Stopped);
            assert!(!status.responsible);
        }
    }

    #[test]
    fn restart_ignores_sessions_of_previous_run() {
        let b = bridge(config());
        b.start().unwrap();
        let previous = b.roster();
        b.stop("restart").unwrap();
        b.start().unwrap();
        let current = b.roster();
        assert!(!Arc::ptr_eq(&previous, &current));

        // Connects to port 9 are refused at once; the new workers then sit
        // out the long reconnect delay.
        thread::sleep(Duration::from_millis(300));
        assert_eq!(current.state(0), Some(SessionState::Disconnected));
        current.set_state(0, SessionState::Ready);

        // A worker of the first run, stuck in connect until now, finally
        // gives up.
        previous.set_state(0, SessionState::Disconnected);
        previous.set_state(0, SessionState::Stopped);

        let statuses = b.statuses();
        assert_eq!(statuses[0].state, SessionState::Ready);
        assert!(statuses[0].responsible);
        b.stop("done").unwrap();
    }

    #[test]
    fn messages_dropped_while_stopped() {
        let b = bridge(config());
        b.send_channel_message("nobody hears this");
        assert!(b.queued().is_empty());
    }

    #[test]
    fn messages_fan_out_to_every_channel() {
        let b = bridge(config());
        *b.lock_running() = Some(Running {
            shutdown: ShutdownSignal::new(),
            workers: Vec::new(),
        });
        b.send_channel_message("&chello");
        b.send_action("waves");
        assert_eq!(
            b.queued(),
            vec![
                "PRIVMSG #a :hello",
                "PRIVMSG #b :hello",
                "PRIVMSG #a :\u{1}ACTION waves\u{1}",
                "PRIVMSG #b :\u{1}ACTION waves\u{1}",
            ]
        );
    }

    #[test]
    fn chat_forwarding_rules() {
        let b = bridge(BridgeConfig {
            channels: vec!["#a".into()],
            ..config()
        });
        *b.lock_running() = Some(Running {
            shutdown: ShutdownSignal::new(),
            workers: Vec::new(),
        });
        b.on_chat(ChatKind::Global, "Steve", "hi all");
        b.on_chat(ChatKind::Me, "Steve", "dances");
        assert_eq!(
            b.queued(),
            vec!["PRIVMSG #a :Steve: hi all", "PRIVMSG #a :\u{1}ACTION * Steve dances\u{1}"]
        );

        let quiet = bridge(BridgeConfig {
            channels: vec!["#a".into()],
            forward_to_network: false,
            ..config()
        });
        *quiet.lock_running() = Some(Running {
            shutdown: ShutdownSignal::new(),
            workers: Vec::new(),
        });
        quiet.on_chat(ChatKind::Global, "Steve", "private");
        quiet.on_chat(ChatKind::Global, "Steve", "#public");
        quiet.on_chat(ChatKind::Say, "Console", "server restarting");
        assert_eq!(quiet.queued(), vec!["PRIVMSG #a :Steve: public"]);
    }

    #[test]
    fn announcements_follow_toggles() {
        let b = bridge(BridgeConfig {
            channels: vec!["#a".into()],
            announce_server_events: false,
            ..config()
        });
        *b.lock_running() = Some(Running {
            shutdown: ShutdownSignal::new(),
            workers: Vec::new(),
        });
        b.announce(&ServerEvent::PlayerConnected {
            player: "Steve".into(),
        });
        b.announce(&ServerEvent::PlayerKicked {
            player: "Steve".into(),
            by: "Admin".into(),
            reason: None,
        });
        assert_eq!(
            b.queued(),
            vec!["PRIVMSG #a :\u{1}ACTION Player Steve connected.\u{1}"]
        );
    }
}
