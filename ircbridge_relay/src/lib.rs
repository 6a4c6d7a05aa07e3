// ircbridge_relay — relays a game server's chat to and from an IRC-style
// chat network.
//
// The bridge keeps one or more sessions (bot connections) on the network.
// Game chat goes out through a shared queue that every ready session drains,
// so relay throughput scales with the session count while each connection
// stays under the network's flood limits. Network chat comes back in through
// exactly one "responsible" session, which hands it to the game via a
// `ChatSink`.
//
// Module overview:
// - `bridge.rs`:   `Bridge`, the facade: start/stop, outbound chat and
//                  announcements, status snapshots.
// - `session.rs`:  One worker thread per connection: connect, register,
//                  relay, reconnect. Handles inbound lines.
// - `election.rs`: `Roster` of session states and the responsible-session
//                  election.
// - `nick.rs`:     Nick collision handling.
// - `queue.rs`:    Outbound queues, rate limiter, frame splitting, and the
//                  limits learned from the network.
// - `text.rs`:     Game ↔ network formatting translation.
// - `events.rs`:   `InboundEvent`/`ChatSink` (network → game) and
//                  `ChatKind`/`ServerEvent` (game → network).
// - `config.rs`:   `BridgeConfig`, loaded from JSON.
// - `error.rs`:    `ConfigError`, `BridgeError`.
// - `logging.rs`:  fern logger for the standalone binary.
//
// Dependencies: `ircbridge_protocol` for the wire format. Nothing here knows
// about the game beyond the text format in `text.rs`.
//
// The bridge can run as a standalone binary (`main.rs`, stdin/stdout as the
// "game") or be embedded in a server process via `Bridge`.

pub mod bridge;
pub mod config;
pub mod election;
pub mod error;
pub mod events;
pub mod logging;
pub mod nick;
pub mod queue;
pub mod session;
pub mod text;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use election::{SessionState, SessionStatus};
pub use error::{BridgeError, ConfigError};
pub use events::{ChannelSink, ChatKind, ChatSink, InboundEvent, ServerEvent};
