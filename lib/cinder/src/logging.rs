//! Structured logging for the whole workspace, built on `slog`.
//!
//! Components take an `Into<Option<&Logger>>` at construction time and fall
//! back to a discarding root logger, so library code never needs to know
//! whether logging was configured.

pub use slog::{crit, debug, error, info, o, trace, warn};
pub use slog::{Discard, Logger};

use sloggers::{Config, LoggerConfig};

const DEFAULT_CONFIG: &str = r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#;

/// Builds the root terminal logger used by the executables.
pub fn init() -> Logger {
    let config: LoggerConfig =
        serdeconv::from_toml_str(DEFAULT_CONFIG).expect("Malformed built-in logger configuration");

    config
        .build_logger()
        .expect("Failed to construct the root logger")
}

/// Resolves an optional parent logger into a child or discarding logger.
pub fn child_or_discard<'a, L: Into<Option<&'a Logger>>>(log: L) -> Logger {
    match log.into() {
        Some(log) => log.new(o!()),
        None => Logger::root(Discard, o!()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_builds_terminal_logger() {
        let log = init();
        info!(log, "logger constructed"; "context" => "test");
    }

    #[test]
    fn test_child_or_discard() {
        let root = Logger::root(Discard, o!());

        let child = child_or_discard(&root);
        debug!(child, "child logger");

        let discard = child_or_discard(None);
        debug!(discard, "discard logger");
    }
}
