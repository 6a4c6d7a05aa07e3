// Error types for the bridge facade and configuration loading.
//
// Network failures never show up here: sessions recover from those on their
// own (see `session.rs`). What remains are the things the embedding server
// can actually act on — a bad config file, an invalid nick, starting twice,
// or the OS refusing to spawn a worker thread.

use thiserror::Error;

/// Problems with the bridge configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("host must not be empty")]
    EmptyHost,

    #[error("port must be non-zero")]
    ZeroPort,

    #[error("at least one channel is required")]
    NoChannels,

    #[error("invalid channel name {0:?}")]
    InvalidChannel(String),

    #[error("unacceptable nick {0:?}")]
    InvalidNick(String),

    #[error("nick {nick:?} is longer than {max} bytes")]
    NickTooLong { nick: String, max: usize },

    #[error("session_count must be at least 1")]
    NoSessions,
}

/// Errors returned by `Bridge` operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge is disabled in the configuration")]
    Disabled,

    #[error("bridge is already running")]
    AlreadyRunning,

    #[error("bridge is not running")]
    NotRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn session worker: {0}")]
    Spawn(#[source] std::io::Error),
}
