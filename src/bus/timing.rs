// Busy-wait helpers against the monotonic clock
//
// Turnaround holds are a few tens of microseconds, far below what a sleep can
// deliver, so both helpers spin.

use std::time::{Duration, Instant};

/// Spin for at least `duration`.
pub fn spin_for(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

/// Spin until `ready` returns true or `timeout` elapses. Returns whether
/// `ready` was satisfied.
pub fn spin_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if ready() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spin_for_waits() {
        let start = Instant::now();
        spin_for(Duration::from_micros(200));
        assert!(start.elapsed() >= Duration::from_micros(200));
    }

    #[test]
    fn test_spin_until_ready() {
        let mut calls = 0;
        assert!(spin_until(Duration::from_secs(1), || {
            calls += 1;
            calls == 3
        }));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_spin_until_times_out() {
        let start = Instant::now();
        assert!(!spin_until(Duration::from_millis(2), || false));
        assert!(start.elapsed() >= Duration::from_millis(2));
    }
}
