//! Thin `env_logger` init helper for this crate's own unit tests. The
//! library itself only ever depends on the `log` facade — `env_logger` is a
//! dev-dependency, so this helper is test-only (integration tests under
//! `tests/` pull `env_logger` directly; dev-dependencies are visible there
//! too).

#![cfg(test)]

use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes a process-wide `env_logger` subscriber exactly once. Safe to
/// call from multiple tests; subsequent calls are no-ops.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
