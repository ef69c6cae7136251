//! Diagnostic logging.
//!
//! Status lines go to stdout with `println!`; everything below them (engine
//! command lines, cache decisions, locks) is a `tracing` event on stderr.
//! `RUST_LOG` overrides the level picked from `--verbose`.

use std::io::IsTerminal as _;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init(verbose: bool) -> anyhow::Result<()> {
    let level = level(verbose);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("xcross={level},xc={level}")));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise tracing: {e}"))
}

fn level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "warn" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_maps_to_debug() {
        assert_eq!(level(true), "debug");
        assert_eq!(level(false), "warn");
    }
}
