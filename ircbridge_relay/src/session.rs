// One connection to the chat network, driven by its own worker thread.
//
// Lifecycle (reported to the shared `Roster`):
//
//   Disconnected → Connecting → Registering → Ready → Disconnected → ...
//                                                  ↘ Stopped (fatal / shutdown)
//
// The worker loop in `run` wraps each connect-to-disconnect cycle in
// `catch_unwind`, so a bug in line handling costs one reconnect instead of
// the whole bridge. Between cycles it sleeps for the reconnect delay on the
// `ShutdownSignal`, which wakes it early when the bridge stops.
//
// Inside a cycle the socket has a read timeout of one `TICK`, so each pass
// of the relay loop is: run scheduled rejoins, send at most one line
// (local queue first, then the shared queue, subject to the rate limiter;
// when idle, maybe retry the desired nick), then wait up to one tick for one
// inbound line and handle it.
//
// `handle_line` never touches the socket. Everything it wants to send goes
// through the local queue, which keeps it testable without a network.
//
// Only the responsible session (see `election.rs`) delivers events to the
// game's `ChatSink`. All ready sessions drain the shared queue.

use std::any::Any;
use std::io::{self, Write};
use std::net::{self, TcpStream, ToSocketAddrs};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use ircbridge_protocol::{LineReader, MessageType, ParsedMessage, ReplyCode, commands, write_line};
use log::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::election::{Roster, SessionState};
use crate::events::{ChatSink, InboundEvent};
use crate::nick::{NickNegotiator, NickOutcome};
use crate::queue::{MIN_NICK_LEN, NetworkLimits, OutboundQueue, RateLimiter};
use crate::text;

/// Relay loop granularity; also the socket read timeout.
pub const TICK: Duration = Duration::from_millis(20);

/// RFC 2812 user mode bitmask for USER: invisible.
const USER_MODE: u8 = 8;

/// Cooperative stop flag that sleeping workers can wait on.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wake.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`. Returns true if the signal was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = wake
            .wait_timeout_while(guard, timeout, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// The live socket of a session, shared with the facade so `stop` can force
/// it closed.
pub(crate) type SocketSlot = Arc<Mutex<Option<TcpStream>>>;

pub(crate) fn close_socket(slot: &SocketSlot) {
    let stream = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(stream) = stream {
        let _ = stream.shutdown(net::Shutdown::Both);
    }
}

/// State every session of one bridge run shares.
#[derive(Clone)]
pub(crate) struct Shared {
    pub config: Arc<BridgeConfig>,
    pub global: OutboundQueue,
    pub limits: Arc<NetworkLimits>,
    pub roster: Arc<Roster>,
    pub sink: Arc<dyn ChatSink>,
    pub shutdown: ShutdownSignal,
}

/// Why a connection cycle ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionExit {
    /// Transient failure; reconnect after the delay.
    Reconnect,
    /// The network refused us for good (banned, bad key, ...).
    Fatal,
    /// QUIT sent or shutdown requested.
    Shutdown,
}

pub(crate) struct Session {
    index: usize,
    shared: Shared,
    local: OutboundQueue,
    socket: SocketSlot,
    nick: NickNegotiator,
    limiter: RateLimiter,
    ready: bool,
    last_nick_retry: Instant,
    rejoins: Vec<(Instant, String)>,
}

impl Session {
    pub(crate) fn new(index: usize, shared: Shared, local: OutboundQueue, socket: SocketSlot) -> Self {
        let nick = NickNegotiator::new(shared.config.session_nick(index));
        let limiter = RateLimiter::new(shared.config.send_delay());
        Self {
            index,
            shared,
            local,
            socket,
            nick,
            limiter,
            ready: false,
            last_nick_retry: Instant::now(),
            rejoins: Vec::new(),
        }
    }

    /// Worker entry point. Returns once the session is stopped.
    pub(crate) fn run(mut self) {
        while !self.shared.shutdown.is_raised() {
            self.set_state(SessionState::Connecting);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.connect_and_relay()));
            let exit = match outcome {
                Ok(Ok(exit)) => exit,
                Ok(Err(e)) => {
                    warn!("[{}] connection lost: {e}", self.nick.actual());
                    SessionExit::Reconnect
                }
                Err(payload) => {
                    error!(
                        "[{}] session crashed: {}",
                        self.nick.actual(),
                        panic_message(payload.as_ref())
                    );
                    SessionExit::Reconnect
                }
            };
            self.disconnect();

            match exit {
                SessionExit::Reconnect => {
                    self.set_state(SessionState::Disconnected);
                    let delay = self.shared.config.reconnect_delay();
                    if self.shared.shutdown.wait_timeout(delay) {
                        break;
                    }
                    info!("[{}] reconnecting", self.nick.desired());
                }
                SessionExit::Fatal | SessionExit::Shutdown => break,
            }
        }
        self.set_state(SessionState::Stopped);
        info!("[{}] session stopped", self.nick.actual());
    }

    fn set_state(&self, state: SessionState) {
        self.shared.roster.set_state(self.index, state);
    }

    fn is_responsible(&self) -> bool {
        self.shared.roster.is_responsible(self.index)
    }

    fn disconnect(&mut self) {
        close_socket(&self.socket);
        self.ready = false;
        self.rejoins.clear();
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let config = &self.shared.config;
        let mut last_err = None;
        for addr in (config.host.as_str(), config.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, config.io_timeout()) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", config.host),
            )
        }))
    }

    /// One connect-to-disconnect cycle.
    fn connect_and_relay(&mut self) -> io::Result<SessionExit> {
        let config = self.shared.config.clone();
        info!(
            "[{}] connecting to {}:{}",
            self.nick.desired(),
            config.host,
            config.port
        );
        let stream = self.connect()?;
        if self.shared.shutdown.is_raised() {
            return Ok(SessionExit::Shutdown);
        }
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(TICK))?;
        stream.set_write_timeout(Some(config.io_timeout()))?;
        *self.socket.lock().unwrap_or_else(PoisonError::into_inner) = Some(stream.try_clone()?);
        let mut writer = stream.try_clone()?;
        let mut reader = LineReader::new(stream);

        self.set_state(SessionState::Registering);
        self.nick.reset(self.shared.limits.max_nick_len());
        self.shared.roster.set_nick(self.index, self.nick.actual());
        let nick = self.nick.actual().to_string();
        self.write(&mut writer, &commands::nick(&nick), "Out.Local")?;
        self.write(
            &mut writer,
            &commands::user(self.nick.desired(), USER_MODE, &config.real_name),
            "Out.Local",
        )?;
        self.limiter.record(Instant::now());

        loop {
            if self.shared.shutdown.is_raised() {
                self.flush_local(&mut writer);
                return Ok(SessionExit::Shutdown);
            }
            let now = Instant::now();
            self.run_due_rejoins(now);
            if self.send_next(&mut writer, now)? {
                return Ok(SessionExit::Shutdown);
            }
            if let Some(exit) = reader.poll_line()?.and_then(|line| self.handle_line(&line)) {
                return Ok(exit);
            }
        }
    }

    fn write<W: Write>(&self, writer: &mut W, line: &str, tag: &str) -> io::Result<()> {
        debug!("[{tag}] {}", text::strip_network_formatting(line));
        match write_line(writer, line) {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                warn!("[{}] dropped unsendable line: {e}", self.nick.actual());
                Ok(())
            }
            other => other,
        }
    }

    /// Send the local queue regardless of the rate limit, up to and
    /// including a QUIT. Used on shutdown.
    fn flush_local<W: Write>(&mut self, writer: &mut W) {
        while let Some(line) = self.local.pop() {
            if self.write(writer, &line, "Out.Local").is_err() || commands::is_quit(&line) {
                break;
            }
        }
    }

    /// Send at most one queued line. Returns true if it was a QUIT.
    fn send_next<W: Write>(&mut self, writer: &mut W, now: Instant) -> io::Result<bool> {
        if !self.limiter.ready(now) {
            return Ok(false);
        }
        let (line, tag) = match self.local.pop() {
            Some(line) => (line, "Out.Local"),
            None if self.ready => match self.shared.global.pop() {
                Some(line) => (line, "Out.Global"),
                None => {
                    self.retry_nick(now);
                    return Ok(false);
                }
            },
            None => return Ok(false),
        };
        self.limiter.record(now);
        self.write(writer, &line, tag)?;
        Ok(commands::is_quit(&line))
    }

    /// Try to reclaim the desired nick, at most once per retry delay.
    fn retry_nick(&mut self, now: Instant) {
        if !self.ready || self.nick.has_desired() {
            return;
        }
        if now.saturating_duration_since(self.last_nick_retry) < self.shared.config.nick_retry_delay() {
            return;
        }
        self.last_nick_retry = now;
        self.local.push(commands::nick(self.nick.desired()));
    }

    fn run_due_rejoins(&mut self, now: Instant) {
        if self.rejoins.is_empty() {
            return;
        }
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.rejoins)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.rejoins = later;
        for (_, channel) in due {
            info!("[{}] rejoining {channel}", self.nick.actual());
            self.local.push(commands::join(&channel));
        }
    }

    fn identify(&self) {
        if let Some(nickserv) = &self.shared.config.nickserv {
            self.local
                .push(commands::privmsg(&nickserv.service, &nickserv.message));
        }
    }

    /// React to one inbound line. Returns `Some` to end the cycle.
    fn handle_line(&mut self, line: &str) -> Option<SessionExit> {
        debug!("[In] {}", text::strip_network_formatting(line));
        let msg = ircbridge_protocol::parse(line, self.nick.actual());
        if let Some(code) = msg.reply_code {
            return self.handle_reply(code, &msg);
        }
        match msg.kind {
            MessageType::Ping => {
                let token = msg.text.as_deref().or_else(|| msg.word(1)).unwrap_or_default();
                self.local.push(commands::pong(token));
            }
            MessageType::Error => {
                warn!(
                    "[{}] server error: {}",
                    self.nick.actual(),
                    msg.text.as_deref().unwrap_or_default()
                );
            }
            MessageType::Kill => {
                if msg
                    .word(2)
                    .is_some_and(|target| target.eq_ignore_ascii_case(self.nick.actual()))
                {
                    warn!(
                        "[{}] killed by {}: {}",
                        self.nick.actual(),
                        msg.from,
                        msg.text.as_deref().unwrap_or_default()
                    );
                    return Some(SessionExit::Reconnect);
                }
            }
            MessageType::ChannelMessage => self.relay_chat(&msg, false),
            MessageType::ChannelAction => self.relay_chat(&msg, true),
            MessageType::Join => self.on_join(&msg),
            MessageType::Part => self.on_part(&msg),
            MessageType::Quit => self.on_quit(&msg),
            MessageType::Kick => self.on_kick(&msg),
            MessageType::NickChange => self.on_nick_change(&msg),
            _ => {}
        }
        None
    }

    fn handle_reply(&mut self, code: ReplyCode, msg: &ParsedMessage) -> Option<SessionExit> {
        match code {
            ReplyCode::WELCOME => self.on_welcome(msg),
            ReplyCode::BOUNCE => self.learn_isupport(msg),
            ReplyCode::USER_HOST => self.learn_user_host(msg),
            code if code.is_nick_conflict() => self.on_nick_conflict(msg),
            ReplyCode::ERR_ERRONEUS_NICKNAME => return self.on_erroneous_nick(msg),
            code if code.is_fatal_channel_error() => {
                error!(
                    "[{}] cannot use channel {}: {} ({code}); session stopped",
                    self.nick.actual(),
                    msg.word(3).unwrap_or("?"),
                    msg.text.as_deref().unwrap_or_default()
                );
                return Some(SessionExit::Fatal);
            }
            _ => {}
        }
        None
    }

    fn on_welcome(&mut self, msg: &ParsedMessage) {
        let nick = msg.word(2).unwrap_or(self.nick.actual()).to_string();
        self.nick.confirm(&nick);
        self.shared.roster.set_nick(self.index, &nick);
        info!("[{nick}] registered with {}", self.shared.config.host);

        self.identify();
        for channel in &self.shared.config.channels {
            self.local.push(commands::join(channel));
        }
        self.ready = true;
        self.last_nick_retry = Instant::now();
        self.set_state(SessionState::Ready);
        self.local.push(commands::userhost(&nick));
    }

    fn learn_isupport(&self, msg: &ParsedMessage) {
        let nick_len = msg
            .raw
            .split(' ')
            .find_map(|token| token.strip_prefix("NICKLEN="))
            .and_then(|value| value.parse::<usize>().ok());
        if let Some(len) = nick_len {
            self.shared.limits.set_max_nick_len(len);
            debug!("network nick length is {len}");
        }
    }

    fn learn_user_host(&self, msg: &ParsedMessage) {
        let Some(replies) = msg.text.as_deref() else {
            return;
        };
        for reply in replies.split_whitespace() {
            let Some((nick, user_host)) = reply.split_once('=') else {
                continue;
            };
            if nick.trim_end_matches('*').eq_ignore_ascii_case(self.nick.actual()) {
                let user_host = user_host.trim_start_matches(['+', '-']);
                self.shared.limits.set_user_host_len(user_host.len());
                debug!("[{}] host mask is {user_host}", self.nick.actual());
            }
        }
    }

    fn on_nick_conflict(&mut self, msg: &ParsedMessage) {
        let current = msg.word(2).unwrap_or("*");
        let rejected = msg.word(3).unwrap_or_default();
        let max_len = self.shared.limits.max_nick_len();
        match self.nick.on_conflict(current, rejected, max_len) {
            NickOutcome::RetryLater => {
                debug!("[{}] {rejected} is still taken", self.nick.actual());
            }
            NickOutcome::Try(next) => {
                info!("[{}] nick {rejected} is taken, trying {next}", self.nick.desired());
                self.shared.roster.set_nick(self.index, &next);
                self.local.push(commands::nick(&next));
            }
        }
    }

    /// 432: the network refused a nick outright. If it may just be too long,
    /// lower the learned limit and try again shorter.
    fn on_erroneous_nick(&mut self, msg: &ParsedMessage) -> Option<SessionExit> {
        let rejected = msg.word(3).unwrap_or_default();
        if rejected.len() <= MIN_NICK_LEN {
            if self.ready {
                warn!("[{}] network refuses nick {rejected}", self.nick.actual());
                return None;
            }
            error!(
                "[{}] network refuses nick {rejected}: {}; session stopped",
                self.nick.desired(),
                msg.text.as_deref().unwrap_or_default()
            );
            return Some(SessionExit::Fatal);
        }
        self.shared.limits.set_max_nick_len(rejected.len() - 1);
        let max_len = self.shared.limits.max_nick_len();
        if self.ready {
            self.nick.fit(max_len);
            warn!(
                "[{}] nick {rejected} refused; will reclaim {} instead",
                self.nick.actual(),
                self.nick.desired()
            );
        } else {
            self.nick.reset(max_len);
            let next = self.nick.actual().to_string();
            warn!("nick {rejected} refused; trying {next}");
            self.shared.roster.set_nick(self.index, &next);
            self.local.push(commands::nick(&next));
        }
        None
    }

    fn is_own_nick(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(self.nick.actual())
    }

    /// True if network events from `nick` should reach the game.
    fn should_announce(&self, nick: &str) -> bool {
        self.is_responsible() && !self.shared.roster.is_bot_nick(nick)
    }

    fn relay_chat(&self, msg: &ParsedMessage, is_action: bool) {
        let (Some(nick), Some(channel)) = (msg.nick.as_deref(), msg.channel.as_deref()) else {
            return;
        };
        if !self.should_announce(nick) {
            return;
        }
        let config = &self.shared.config;
        let raw = if is_action {
            msg.action_text()
        } else {
            msg.text.as_deref()
        };
        let Some(raw) = raw else {
            return;
        };
        let raw = if config.forward_from_network {
            raw
        } else if is_action {
            return;
        } else {
            match raw.strip_prefix('#') {
                Some(rest) => rest,
                None => return,
            }
        };
        let text = text::from_network(raw, config.formatting.from_network());
        if text.is_empty() {
            return;
        }
        let (channel, nick) = (channel.to_string(), nick.to_string());
        self.shared.sink.deliver(if is_action {
            InboundEvent::Action {
                channel,
                nick,
                text,
            }
        } else {
            InboundEvent::Chat {
                channel,
                nick,
                text,
            }
        });
    }

    fn on_join(&self, msg: &ParsedMessage) {
        let (Some(nick), Some(channel)) = (msg.nick.as_deref(), msg.channel.as_deref()) else {
            return;
        };
        if self.is_own_nick(nick) {
            info!("[{nick}] joined {channel}");
        } else if self.shared.config.announce_network_joins && self.should_announce(nick) {
            self.shared.sink.deliver(InboundEvent::Joined {
                channel: channel.to_string(),
                nick: nick.to_string(),
            });
        }
    }

    fn on_part(&self, msg: &ParsedMessage) {
        let (Some(nick), Some(channel)) = (msg.nick.as_deref(), msg.channel.as_deref()) else {
            return;
        };
        if !self.is_own_nick(nick)
            && self.shared.config.announce_network_joins
            && self.should_announce(nick)
        {
            self.shared.sink.deliver(InboundEvent::Left {
                channel: Some(channel.to_string()),
                nick: nick.to_string(),
                reason: msg.text.clone(),
            });
        }
    }

    fn on_quit(&mut self, msg: &ParsedMessage) {
        let Some(nick) = msg.nick.as_deref() else {
            return;
        };
        if self.ready && !self.nick.has_desired() && nick.eq_ignore_ascii_case(self.nick.desired()) {
            info!("[{}] {nick} quit, reclaiming it", self.nick.actual());
            self.last_nick_retry = Instant::now();
            self.local.push(commands::nick(self.nick.desired()));
        }
        if self.shared.config.announce_network_joins && self.should_announce(nick) {
            self.shared.sink.deliver(InboundEvent::Left {
                channel: None,
                nick: nick.to_string(),
                reason: msg.text.clone(),
            });
        }
    }

    fn on_kick(&mut self, msg: &ParsedMessage) {
        let (Some(channel), Some(kicked)) = (msg.channel.clone(), msg.word(3)) else {
            return;
        };
        let by = msg.nick.clone().unwrap_or_else(|| msg.from.clone());
        if self.is_own_nick(kicked) {
            let delay = self.shared.config.reconnect_delay();
            warn!(
                "[{}] kicked from {channel} by {by}; rejoining in {}s",
                self.nick.actual(),
                delay.as_secs()
            );
            self.rejoins.push((Instant::now() + delay, channel));
        } else if self.should_announce(kicked) {
            self.shared.sink.deliver(InboundEvent::Kicked {
                channel,
                nick: kicked.to_string(),
                by,
                reason: msg.text.clone(),
            });
        }
    }

    fn on_nick_change(&mut self, msg: &ParsedMessage) {
        let Some(old) = msg.nick.as_deref() else {
            return;
        };
        let new = msg
            .text
            .as_deref()
            .or_else(|| msg.word(2).map(|w| w.strip_prefix(':').unwrap_or(w)))
            .unwrap_or_default();
        if new.is_empty() {
            return;
        }
        if self.is_own_nick(old) {
            info!("[{old}] now known as {new}");
            self.nick.confirm(new);
            self.shared.roster.set_nick(self.index, new);
            self.identify();
        } else if self.should_announce(old) {
            self.shared.sink.deliver(InboundEvent::NickChanged {
                old: old.to_string(),
                new: new.to_string(),
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
