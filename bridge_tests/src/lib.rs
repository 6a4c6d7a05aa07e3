// Test harness for end-to-end bridge tests.
//
// `MockIrcServer` is a small scripted chat network on a localhost port. It
// speaks just enough of the protocol for the bridge to register, join,
// chat, and be disrupted: nick collisions (433), channel bans (474), kills,
// dropped connections, kicks, and users quitting. Every line a client sends
// is recorded so tests can assert on the exact wire traffic.
//
// Each accepted connection gets a reader thread; all replies are written
// under the shared state lock, so the order a client sees matches the order
// the server processed events in.
//
// `RecordingSink` stands in for the game: it collects every event the
// bridge delivers.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use ircbridge_protocol::{LineReader, write_line};
use ircbridge_relay::{ChatSink, InboundEvent};

/// How long `wait_*` helpers wait before giving up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

const SERVER_NAME: &str = "mock.irc";
const HOST_MASK: &str = "user@mock.host";

/// One line a client sent, tagged with who sent it.
#[derive(Clone, Debug)]
pub struct Received {
    /// Connection number, in accept order starting at 1.
    pub client: u64,
    /// The client's nick when the line arrived (`*` before it had one).
    pub nick: String,
    pub line: String,
}

struct Client {
    stream: TcpStream,
    nick: Option<String>,
    has_user: bool,
    registered: bool,
    channels: BTreeSet<String>,
}

struct ServerState {
    next_id: u64,
    clients: BTreeMap<u64, Client>,
    /// Lowercased nicks held by users that are not real connections.
    reserved: HashSet<String>,
    banned: HashSet<String>,
    /// Lowercased nicks whose welcome is withheld until released.
    held: HashSet<String>,
    nick_len: usize,
    received: Vec<Received>,
}

impl ServerState {
    fn nick_of(&self, id: u64) -> String {
        self.clients
            .get(&id)
            .and_then(|c| c.nick.clone())
            .unwrap_or_else(|| "*".to_string())
    }

    fn prefix_of(&self, id: u64) -> String {
        format!("{}!{HOST_MASK}", self.nick_of(id))
    }

    fn find(&self, nick: &str) -> Option<u64> {
        self.clients.iter().find_map(|(id, c)| {
            c.nick
                .as_deref()
                .filter(|n| n.eq_ignore_ascii_case(nick))
                .map(|_| *id)
        })
    }

    fn nick_taken(&self, nick: &str, asking: u64) -> bool {
        self.reserved.contains(&nick.to_ascii_lowercase())
            || self.find(nick).is_some_and(|id| id != asking)
    }

    fn send(&mut self, id: u64, line: &str) {
        if let Some(client) = self.clients.get_mut(&id) {
            let _ = write_line(&mut client.stream, line);
        }
    }

    fn send_numeric(&mut self, id: u64, code: &str, rest: &str) {
        let nick = self.nick_of(id);
        self.send(id, &format!(":{SERVER_NAME} {code} {nick} {rest}"));
    }

    fn members(&self, channel: &str) -> Vec<u64> {
        self.clients
            .iter()
            .filter(|(_, c)| c.channels.contains(&channel.to_ascii_lowercase()))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Clients sharing at least one channel with `id`, excluding `id`.
    fn peers(&self, id: u64) -> Vec<u64> {
        let Some(me) = self.clients.get(&id) else {
            return Vec::new();
        };
        self.clients
            .iter()
            .filter(|(other, c)| **other != id && !c.channels.is_disjoint(&me.channels))
            .map(|(other, _)| *other)
            .collect()
    }

    fn broadcast(&mut self, targets: &[u64], line: &str) {
        for id in targets {
            self.send(*id, line);
        }
    }

    fn maybe_welcome(&mut self, id: u64) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        let Some(nick) = client.nick.clone() else {
            return;
        };
        if client.registered || !client.has_user || self.held.contains(&nick.to_ascii_lowercase()) {
            return;
        }
        if let Some(client) = self.clients.get_mut(&id) {
            client.registered = true;
        }
        let nick_len = self.nick_len;
        self.send_numeric(id, "001", ":Welcome to the mock network");
        self.send_numeric(
            id,
            "005",
            &format!("NICKLEN={nick_len} CHANTYPES=# :are supported by this server"),
        );
    }

    /// Drop a client, telling its peers it quit.
    fn remove(&mut self, id: u64, reason: &str) {
        let peers = self.peers(id);
        let line = format!(":{} QUIT :{reason}", self.prefix_of(id));
        self.broadcast(&peers, &line);
        if let Some(client) = self.clients.remove(&id) {
            let _ = client.stream.shutdown(Shutdown::Both);
        }
    }

    fn handle(&mut self, id: u64, line: &str) {
        let nick = self.nick_of(id);
        self.received.push(Received {
            client: id,
            nick,
            line: line.to_string(),
        });

        let (head, trailing) = match line.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (line, None),
        };
        let mut words = head.split(' ');
        let command = words.next().unwrap_or_default().to_ascii_uppercase();
        let args: Vec<&str> = words.collect();

        match command.as_str() {
            "NICK" => {
                let Some(new) = args.first().copied().or(trailing) else {
                    return;
                };
                self.on_nick(id, new);
            }
            "USER" => {
                if let Some(client) = self.clients.get_mut(&id) {
                    client.has_user = true;
                }
                self.maybe_welcome(id);
            }
            "JOIN" => {
                if let Some(channel) = args.first().copied().or(trailing) {
                    self.on_join(id, channel);
                }
            }
            "PART" => {
                if let Some(channel) = args.first() {
                    let key = channel.to_ascii_lowercase();
                    let members = self.members(channel);
                    let line = format!(":{} PART {channel}", self.prefix_of(id));
                    self.broadcast(&members, &line);
                    if let Some(client) = self.clients.get_mut(&id) {
                        client.channels.remove(&key);
                    }
                }
            }
            "PRIVMSG" => {
                let (Some(target), Some(text)) = (args.first(), trailing) else {
                    return;
                };
                let line = format!(":{} PRIVMSG {target} :{text}", self.prefix_of(id));
                let targets: Vec<u64> = if target.starts_with('#') {
                    self.members(target).into_iter().filter(|m| *m != id).collect()
                } else {
                    self.find(target).into_iter().collect()
                };
                self.broadcast(&targets, &line);
            }
            "USERHOST" => {
                if let Some(found) = args.first().and_then(|target| self.find(target)) {
                    let reply = format!(":{}=+{HOST_MASK}", self.nick_of(found));
                    self.send_numeric(id, "302", &reply);
                }
            }
            "PING" => {
                let token = trailing.or(args.first().copied()).unwrap_or_default();
                self.send(id, &format!(":{SERVER_NAME} PONG {SERVER_NAME} :{token}"));
            }
            "QUIT" => self.remove(id, trailing.unwrap_or("Client quit")),
            _ => {}
        }
    }

    fn on_nick(&mut self, id: u64, new: &str) {
        if self.nick_taken(new, id) {
            self.send_numeric(id, "433", &format!("{new} :Nickname is already in use"));
            return;
        }
        let old_prefix = self.prefix_of(id);
        let registered = self.clients.get(&id).is_some_and(|c| c.registered);
        if let Some(client) = self.clients.get_mut(&id) {
            client.nick = Some(new.to_string());
        }
        if registered {
            let mut targets = self.peers(id);
            targets.push(id);
            self.broadcast(&targets, &format!(":{old_prefix} NICK :{new}"));
        } else {
            self.maybe_welcome(id);
        }
    }

    fn on_join(&mut self, id: u64, channel: &str) {
        let key = channel.to_ascii_lowercase();
        if self.banned.contains(&key) {
            self.send_numeric(id, "474", &format!("{channel} :Cannot join channel (+b)"));
            return;
        }
        if let Some(client) = self.clients.get_mut(&id) {
            client.channels.insert(key);
        }
        let members = self.members(channel);
        let line = format!(":{} JOIN {channel}", self.prefix_of(id));
        self.broadcast(&members, &line);
    }
}

/// A scripted chat network for integration tests. Shuts down when dropped.
pub struct MockIrcServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    keep_running: Arc<AtomicBool>,
}

impl MockIrcServer {
    /// Listen on a random localhost port.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind mock server");
        let addr = listener.local_addr().expect("no local address");
        listener
            .set_nonblocking(true)
            .expect("failed to set non-blocking");

        let state = Arc::new(Mutex::new(ServerState {
            next_id: 1,
            clients: BTreeMap::new(),
            reserved: HashSet::new(),
            banned: HashSet::new(),
            held: HashSet::new(),
            nick_len: 30,
            received: Vec::new(),
        }));
        let keep_running = Arc::new(AtomicBool::new(true));

        let accept_state = state.clone();
        let accept_running = keep_running.clone();
        thread::spawn(move || {
            while accept_running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        accept_client(stream, accept_state.clone(), accept_running.clone());
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            addr,
            state,
            keep_running,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().expect("mock server state poisoned")
    }

    /// Nick length advertised in the 005 reply.
    pub fn set_nick_len(&self, len: usize) {
        self.lock().nick_len = len;
    }

    /// Mark `nick` as held by someone who is not a bridge session.
    pub fn reserve_nick(&self, nick: &str) {
        self.lock().reserved.insert(nick.to_ascii_lowercase());
    }

    /// The holder of a reserved nick quits; every registered client sees it.
    pub fn release_nick(&self, nick: &str) {
        let mut state = self.lock();
        state.reserved.remove(&nick.to_ascii_lowercase());
        let targets: Vec<u64> = state
            .clients
            .iter()
            .filter(|(_, c)| c.registered)
            .map(|(id, _)| *id)
            .collect();
        state.broadcast(&targets, &format!(":{nick}!ghost@elsewhere QUIT :Leaving"));
    }

    pub fn ban_channel(&self, channel: &str) {
        self.lock().banned.insert(channel.to_ascii_lowercase());
    }

    /// Withhold the welcome from whoever registers as `nick`.
    pub fn hold_registration(&self, nick: &str) {
        self.lock().held.insert(nick.to_ascii_lowercase());
    }

    pub fn release_registration(&self, nick: &str) {
        let mut state = self.lock();
        state.held.remove(&nick.to_ascii_lowercase());
        if let Some(id) = state.find(nick) {
            state.maybe_welcome(id);
        }
    }

    /// A network user says something in a channel.
    pub fn say(&self, from: &str, channel: &str, text: &str) {
        let mut state = self.lock();
        let members = state.members(channel);
        state.broadcast(
            &members,
            &format!(":{from}!someone@elsewhere PRIVMSG {channel} :{text}"),
        );
    }

    /// An operator removes `nick` from `channel`.
    pub fn kick(&self, channel: &str, nick: &str, by: &str, reason: &str) {
        let mut state = self.lock();
        let members = state.members(channel);
        state.broadcast(
            &members,
            &format!(":{by}!op@elsewhere KICK {channel} {nick} :{reason}"),
        );
        if let Some(id) = state.find(nick) {
            let channel = channel.to_ascii_lowercase();
            state.clients.entry(id).and_modify(|client| {
                client.channels.remove(&channel);
            });
        }
    }

    /// An operator kills `nick`: it gets a KILL, then its connection closes.
    /// Returns false if nobody has that nick.
    pub fn kill(&self, nick: &str) -> bool {
        let mut state = self.lock();
        let Some(id) = state.find(nick) else {
            return false;
        };
        state.send(id, &format!(":{SERVER_NAME} KILL {nick} :Killed (test)"));
        state.remove(id, "Killed (test)");
        true
    }

    /// Close `nick`'s connection without a word, as a network failure would.
    pub fn drop_client(&self, nick: &str) -> bool {
        let mut state = self.lock();
        let Some(id) = state.find(nick) else {
            return false;
        };
        state.remove(id, "Connection reset by peer");
        true
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> u64 {
        self.lock().next_id - 1
    }

    /// Nicks of registered clients, sorted.
    pub fn registered_nicks(&self) -> Vec<String> {
        let state = self.lock();
        let mut nicks: Vec<String> = state
            .clients
            .values()
            .filter(|c| c.registered)
            .filter_map(|c| c.nick.clone())
            .collect();
        nicks.sort();
        nicks
    }

    /// Nicks currently in `channel`, sorted.
    pub fn channel_members(&self, channel: &str) -> Vec<String> {
        let state = self.lock();
        let mut nicks: Vec<String> = state
            .members(channel)
            .into_iter()
            .map(|id| state.nick_of(id))
            .collect();
        nicks.sort();
        nicks
    }

    /// Every line received so far, in arrival order.
    pub fn received(&self) -> Vec<Received> {
        self.lock().received.clone()
    }

    /// Lines received so far that satisfy `pred`.
    pub fn lines_matching(&self, pred: impl Fn(&str) -> bool) -> Vec<Received> {
        self.lock()
            .received
            .iter()
            .filter(|r| pred(&r.line))
            .cloned()
            .collect()
    }

    /// Wait for a received line satisfying `pred`.
    pub fn wait_for_line(&self, pred: impl Fn(&str) -> bool) -> Received {
        let mut found = None;
        wait_until(|| {
            found = self.lines_matching(&pred).into_iter().next();
            found.is_some()
        });
        found.expect("wait_until returned without a match")
    }
}

impl Drop for MockIrcServer {
    fn drop(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Ok(mut state) = self.state.lock() {
            for client in state.clients.values() {
                let _ = client.stream.shutdown(Shutdown::Both);
            }
            state.clients.clear();
        }
    }
}

fn accept_client(stream: TcpStream, state: Arc<Mutex<ServerState>>, keep_running: Arc<AtomicBool>) {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_millis(20)));
    let Ok(writer) = stream.try_clone() else {
        return;
    };
    let id = {
        let mut guard = state.lock().expect("mock server state poisoned");
        let id = guard.next_id;
        guard.next_id += 1;
        guard.clients.insert(
            id,
            Client {
                stream: writer,
                nick: None,
                has_user: false,
                registered: false,
                channels: BTreeSet::new(),
            },
        );
        id
    };

    thread::spawn(move || {
        let mut reader = LineReader::new(stream);
        while keep_running.load(Ordering::SeqCst) {
            match reader.poll_line() {
                Ok(Some(line)) => {
                    let mut guard = state.lock().expect("mock server state poisoned");
                    if !guard.clients.contains_key(&id) {
                        break;
                    }
                    guard.handle(id, &line);
                }
                Ok(None) => {}
                Err(_) => break,
            }
        }
        let mut guard = state.lock().expect("mock server state poisoned");
        if guard.clients.contains_key(&id) {
            guard.remove(id, "Connection closed");
        }
    });
}

/// Poll `cond` until it holds, panicking after `WAIT_TIMEOUT`.
pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met within {WAIT_TIMEOUT:?}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Collects everything the bridge delivers to the game.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<InboundEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<InboundEvent> {
        self.events.lock().expect("sink poisoned").clone()
    }

    /// Game-formatted text of every event so far.
    pub fn texts(&self) -> Vec<String> {
        self.events().iter().map(InboundEvent::to_game_text).collect()
    }
}

impl ChatSink for RecordingSink {
    fn deliver(&self, event: InboundEvent) {
        self.events.lock().expect("sink poisoned").push(event);
    }
}
