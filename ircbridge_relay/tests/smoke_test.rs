// Integration smoke test for the bridge.
//
// Plays the chat network by hand on a localhost socket: accepts the
// bridge's connection, checks its registration, welcomes it, relays a
// channel message into the game, receives game chat, and finally sees the
// QUIT on shutdown.
//
// The fake network is a plain TCP socket using the protocol crate's framing.
// The scripted multi-client network lives in `bridge_tests`.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use ircbridge_protocol::{LineReader, write_line};
use ircbridge_relay::{Bridge, BridgeConfig, ChannelSink, InboundEvent, SessionState};

/// Read lines until one satisfies `pred`, failing after a few seconds.
fn expect_line(reader: &mut LineReader<TcpStream>, pred: impl Fn(&str) -> bool) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(line) = reader.poll_line().unwrap().filter(|l| pred(l)) {
            return line;
        }
    }
    panic!("expected line never arrived");
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition never became true");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn full_bridge_lifecycle() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = BridgeConfig {
        host: "127.0.0.1".into(),
        port,
        channels: vec!["#test".into()],
        nick: "Srv".into(),
        send_delay_ms: 10,
        reconnect_delay_ms: 200,
        ..BridgeConfig::default()
    };
    let (tx, rx) = mpsc::channel();
    let bridge = Bridge::new(config, Arc::new(ChannelSink::new(tx))).unwrap();
    bridge.start().unwrap();

    // 1. Registration.
    let (stream, _) = listener.accept().unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = LineReader::new(stream);
    assert_eq!(expect_line(&mut reader, |_| true), "NICK Srv");
    assert!(expect_line(&mut reader, |_| true).starts_with("USER Srv 8 * :"));

    // 2. Welcome: the session joins and becomes responsible.
    write_line(&mut writer, ":irc.test 001 Srv :Welcome to the test network").unwrap();
    expect_line(&mut reader, |l| l == "JOIN #test");
    expect_line(&mut reader, |l| l == "USERHOST Srv");
    wait_for(|| bridge.statuses()[0].state == SessionState::Ready);
    assert!(bridge.statuses()[0].responsible);

    // 3. Keepalive.
    write_line(&mut writer, "PING :irc.test").unwrap();
    expect_line(&mut reader, |l| l == "PONG :irc.test");

    // 4. Network → game.
    write_line(&mut writer, ":alice!a@host PRIVMSG #test :hello from irc").unwrap();
    let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(
        event,
        InboundEvent::Chat {
            channel: "#test".into(),
            nick: "alice".into(),
            text: "hello from irc".into(),
        }
    );
    assert_eq!(event.to_game_text(), "&i(IRC) alice&f: hello from irc");

    // 5. Game → network.
    bridge.send_channel_message("&chello from the game");
    expect_line(&mut reader, |l| l == "PRIVMSG #test :\u{3}04hello from the game");
    bridge.send_action("waves");
    expect_line(&mut reader, |l| l == "PRIVMSG #test :\u{1}ACTION waves\u{1}");

    // 6. Orderly shutdown.
    bridge.stop("maintenance").unwrap();
    expect_line(&mut reader, |l| l == "QUIT :maintenance");
    assert!(!bridge.is_running());
    wait_for(|| bridge.statuses()[0].state == SessionState::Stopped);
}
