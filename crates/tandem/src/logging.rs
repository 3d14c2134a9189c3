//! Log output for binaries built on Tandem.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs a formatted stderr logger filtered by `RUST_LOG`, falling back
/// to `default_filter` (e.g. `"info"` or `"tandem=debug"`).
///
/// Returns `false` if a global subscriber was already installed, which is
/// harmless in tests.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_second_call_is_noop() {
        let _ = init_logging("warn");
        assert!(!init_logging("warn"));
    }
}
