//! Shared helpers for the `deploydag` integration tests.

pub mod builders;
pub mod fake_executor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

/// Upper bound for a single test run. Tests that spawn real `sh` children
/// (executor and CLI tests) need more slack than the fake executor ones.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

static INIT: Once = Once::new();

/// Capture `tracing` output per test. Filter with `DEPLOYDAG_LOG`, e.g.
/// `DEPLOYDAG_LOG=deploydag::remote=debug`; defaults to `info`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("DEPLOYDAG_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Fail the test instead of hanging when a run or child process never ends.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("deploy run did not finish within {:?}", TEST_TIMEOUT),
    }
}
