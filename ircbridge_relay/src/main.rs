// CLI entry point for the standalone chat bridge.
//
// Stands in for the game server: lines typed on stdin are relayed to the
// configured channels, and relayed network chat is printed to stdout in game
// format. Logs go to stderr. See `bridge.rs` for the facade this drives.
//
// Usage:
//   ircbridge --config <FILE> [OPTIONS]
//     --config <FILE>         Bridge config JSON (see default_bridge.json)
//     --log-level <LEVEL>     off, error, warn, info, debug, trace
//                             (default: info)
//
// Stdin commands:
//   /me <text>                Send as an action
//   /quit [reason]            Disconnect and exit
//   anything else             Send as a channel message
//
// Ctrl+C (SIGINT) or SIGTERM disconnects cleanly.

use std::io::{self, BufRead};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use ircbridge_relay::{Bridge, BridgeConfig, ChannelSink, logging};
use log::LevelFilter;

/// Set from the signal handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const DEFAULT_QUIT_REASON: &str = "Bridge shutting down";

struct Args {
    config_path: String,
    log_level: LevelFilter,
}

/// One line of stdin input.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Message(&'a str),
    Action(&'a str),
    Quit(&'a str),
    Empty,
}

fn main() {
    let args = parse_args();
    if let Err(e) = logging::init(args.log_level) {
        eprintln!("Failed to initialise logging: {e}");
    }

    let config = match BridgeConfig::load(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", args.config_path);
            std::process::exit(1);
        }
    };

    let (event_tx, event_rx) = mpsc::channel();
    let bridge = match Bridge::new(config, Arc::new(ChannelSink::new(event_tx))) {
        Ok(bridge) => bridge,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = bridge.start() {
        eprintln!("Failed to start bridge: {e}");
        std::process::exit(1);
    }

    thread::spawn(move || {
        for event in event_rx {
            println!("{}", event.to_game_text());
        }
    });

    let (line_tx, line_rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    install_interrupt_handler();

    let mut reason = DEFAULT_QUIT_REASON.to_string();
    let mut stdin_open = true;
    while !INTERRUPTED.load(Ordering::SeqCst) {
        if !stdin_open {
            thread::sleep(Duration::from_millis(100));
            continue;
        }
        match line_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => match parse_input(&line) {
                Input::Message(text) => bridge.send_channel_message(text),
                Input::Action(text) => bridge.send_action(text),
                Input::Quit(text) => {
                    if !text.is_empty() {
                        reason = text.to_string();
                    }
                    break;
                }
                Input::Empty => {}
            },
            Err(RecvTimeoutError::Timeout) => {}
            // Stdin closed (e.g. running detached): keep relaying until a
            // signal arrives.
            Err(RecvTimeoutError::Disconnected) => stdin_open = false,
        }
    }

    if let Err(e) = bridge.stop(&reason) {
        eprintln!("Failed to stop bridge: {e}");
    }
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    match line.split_once(' ') {
        Some(("/me", rest)) => Input::Action(rest.trim()),
        Some(("/quit", rest)) => Input::Quit(rest.trim()),
        None if line == "/me" => Input::Empty,
        None if line == "/quit" => Input::Quit(""),
        _ => Input::Message(line),
    }
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching.
fn parse_args() -> Args {
    let mut config_path = None;
    let mut log_level = LevelFilter::Info;
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--config requires a file path");
                    std::process::exit(1);
                }));
            }
            "--log-level" => {
                i += 1;
                log_level = args
                    .get(i)
                    .and_then(|s| logging::parse_level(s))
                    .unwrap_or_else(|| {
                        eprintln!("--log-level requires one of off, error, warn, info, debug, trace");
                        std::process::exit(1);
                    });
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let Some(config_path) = config_path else {
        eprintln!("--config is required");
        print_usage();
        std::process::exit(1);
    };
    Args {
        config_path,
        log_level,
    }
}

fn print_usage() {
    println!("Usage: ircbridge --config <FILE> [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>         Bridge config JSON");
    println!("  --log-level <LEVEL>     off, error, warn, info, debug, trace (default: info)");
    println!("  --help, -h              Show this help");
}

#[cfg(unix)]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_interrupt_handler() {
    let handler = on_interrupt as extern "C" fn(libc::c_int);
    // SAFETY: the handler only stores to an atomic, which is
    // async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_interrupt_handler() {
    // Without a handler the default Ctrl+C behaviour ends the process; the
    // network side sees a dropped connection instead of a QUIT.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_commands() {
        assert_eq!(parse_input("hello there"), Input::Message("hello there"));
        assert_eq!(parse_input("  /me waves  "), Input::Action("waves"));
        assert_eq!(parse_input("/quit going home"), Input::Quit("going home"));
        assert_eq!(parse_input("/quit"), Input::Quit(""));
        assert_eq!(parse_input("/me"), Input::Empty);
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input("/mean thing"), Input::Message("/mean thing"));
    }
}
