//! Process-wide `tracing` subscriber setup.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INITIALISED: OnceLock<bool> = OnceLock::new();

/// Installs the global subscriber: `RUST_LOG` filter (default `info`) and a
/// formatted layer with targets, ANSI only on a terminal.
///
/// Safe to call repeatedly. Returns true if this call installed the
/// subscriber, false if one was already in place.
pub fn init_tracing() -> bool {
    let mut installed = false;
    INITIALISED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr);
        installed = Registry::default()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .is_ok();
        installed
    });
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let _ = init_tracing();
        assert!(!init_tracing());
    }
}
