//! Tracing subscriber setup
//!
//! Libraries only emit `tracing` events; binaries and test harnesses call
//! [`init_tracing`] once to install a formatter.

use tracing_subscriber::{fmt, EnvFilter};

/// Default directive used when `RUST_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "info";

/// Install a global fmt subscriber filtered by `RUST_LOG`
///
/// Returns `false` if a global subscriber was already installed, which is
/// expected when several tests share a process.
pub fn init_tracing() -> bool {
    init_tracing_with(DEFAULT_FILTER)
}

/// Like [`init_tracing`] with an explicit fallback directive
pub fn init_tracing_with(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let _ = init_tracing_with("debug");
        assert!(!init_tracing());
    }
}
