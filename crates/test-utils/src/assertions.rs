//! Test assertion helpers.
//!
//! Provides polling-based assertions for multi-threaded test scenarios.

use std::{
    thread,
    time::{Duration, Instant},
};

/// Default polling interval for [`assert_eventually`].
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls a condition until it returns true or the timeout expires.
///
/// Useful when another thread (a topology publisher, a cancelling caller)
/// changes state at a non-deterministic moment. It avoids flaky tests that
/// use fixed sleeps.
///
/// # Arguments
///
/// * `timeout` - Maximum wait duration
/// * `condition` - Closure returning `true` when the expected state holds
///
/// # Returns
///
/// `true` if the condition became true before timeout, `false` otherwise.
///
/// # Example
///
/// ```no_run
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use replica_routing_test_utils::assert_eventually;
///
/// let flag = Arc::new(AtomicBool::new(false));
/// let flag_clone = flag.clone();
///
/// std::thread::spawn(move || {
///     std::thread::sleep(Duration::from_millis(50));
///     flag_clone.store(true, Ordering::SeqCst);
/// });
///
/// let result = assert_eventually(Duration::from_millis(200), || flag.load(Ordering::SeqCst));
/// assert!(result, "flag should be set");
/// ```
pub fn assert_eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(DEFAULT_POLL_INTERVAL);
    }

    // Final check after timeout
    condition()
}
