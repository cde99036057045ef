use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Sleeps in short steps; returns false as soon as `stop` is raised.
pub(crate) fn sleep_with_stop(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::from_millis(0) {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(Duration::from_millis(25));
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn raised_stop_returns_immediately() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        assert!(!sleep_with_stop(&stop, Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn full_sleep_reports_still_running() {
        let stop = AtomicBool::new(false);
        assert!(sleep_with_stop(&stop, Duration::from_millis(30)));
    }
}
