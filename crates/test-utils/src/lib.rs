//! Shared fixtures for cycler's integration tests.

pub mod builders;
pub mod fake_runner;
pub mod harness;
pub mod recording_store;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Longest an async test may run before it is failed.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a capturing subscriber once per test binary.
///
/// Output only shows for failing tests (or with `--nocapture`). The filter
/// comes from `RUST_LOG`, defaulting to `cycler=info` so dependency noise
/// stays out.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cycler=info"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, panicking if it takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .unwrap_or_else(|_| panic!("test timed out after {TEST_TIMEOUT:?}"))
}
