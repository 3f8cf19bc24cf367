//! Shared pool names and retry bounds for integration tests.

use std::time::Duration;

use plz_controller::AcquireOptions;

/// Pool every test provisions from unless it needs a second one.
pub const POOL_NAME: &str = "plz-workers";

/// Retry bounds that never sleep.
pub const fn quick(max_trials: u32) -> AcquireOptions {
    AcquireOptions {
        max_trials,
        wait_for: Duration::ZERO,
    }
}
