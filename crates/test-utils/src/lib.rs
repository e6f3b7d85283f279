pub mod builders;
pub mod collector;
pub mod mock_stage;

use std::sync::Once;
use std::time::{Duration, Instant};

use tickpipe::errors::Result;
use tickpipe::reactor::Reactor;
use tracing_subscriber::{EnvFilter, fmt};

pub use collector::Collector;
pub use mock_stage::MockStage;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=tickpipe=trace cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Call `wait` until nothing is watched. Panics after 10 seconds.
///
/// Returns the number of `wait` calls it took.
pub fn drive(reactor: &mut Reactor) -> Result<usize> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut passes = 1;
    while reactor.wait(Duration::from_millis(20))? > 0 {
        assert!(
            Instant::now() < deadline,
            "reactor still watching {} streams after 10s",
            reactor.len()
        );
        passes += 1;
    }
    Ok(passes)
}
