// Logger setup for the `ircbridge` binary.
//
// The library only logs through the `log` facade; embedding servers install
// their own logger. The standalone binary uses this `fern` dispatcher:
// local timestamps, level and target, to stderr so stdout stays free for
// relayed chat.

use log::LevelFilter;

/// Install the global logger. Fails if a logger is already installed.
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
}

/// Parse a `--log-level` value.
pub fn parse_level(value: &str) -> Option<LevelFilter> {
    value.parse().ok()
}
