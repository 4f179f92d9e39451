//! Tracing setup for the `stowage` binary.
//!
//! Log lines go to stderr so that summaries and JSON printed on stdout stay
//! machine-readable. Without `RUST_LOG`, stowage's own crates log at the
//! requested level and everything else (tokio, glob) only at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log targets of the stowage crates.
const STOWAGE_TARGETS: [&str; 3] = ["stowage", "stowage_core", "stowage_build"];

/// Install the global subscriber; `json` switches to newline-delimited JSON.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(layer.json()).try_init().ok();
    } else {
        registry.with(layer).try_init().ok();
    }
}

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    STOWAGE_TARGETS
        .iter()
        .fold("warn".to_string(), |acc, target| format!("{},{}={}", acc, target, level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_level_to_stowage() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,stowage=debug,stowage_core=debug,stowage_build=debug"
        );
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
        tracing::info!("still logging");
    }
}
