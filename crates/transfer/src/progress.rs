use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::{ProgressInfo, calculate_speed};

/// Builds a progress snapshot from raw counters.
///
/// `elapsed` is the wall-clock time since the job started; speed is the
/// average over it. With an unknown total (`0`) the percentage stays 0 and
/// no remaining time is estimated.
pub fn progress_info(loaded: u64, total: u64, elapsed: Duration) -> ProgressInfo {
    let percentage = percentage(loaded, total);
    let speed = calculate_speed(loaded, elapsed);
    let remaining_time = if speed > 0.0 && total > loaded {
        Some(Duration::from_secs_f64((total - loaded) as f64 / speed))
    } else if total > 0 && loaded >= total {
        Some(Duration::ZERO)
    } else {
        None
    };
    ProgressInfo {
        loaded,
        total,
        percentage,
        speed: (speed > 0.0).then_some(speed),
        remaining_time,
        chunk_index: None,
        total_chunks: None,
    }
}

/// `round(loaded / total * 100)`, clamped to 100.
pub fn percentage(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (loaded as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Per-job progress tracker.
///
/// Guarantees that successive snapshots never report a lower percentage
/// than an earlier one, even when parallel pages finish out of order.
pub struct ProgressTracker {
    started: Instant,
    inner: Mutex<TrackerInner>,
}

struct TrackerInner {
    max_percentage: u8,
    updates: u64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// Starts tracking at the current instant.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(TrackerInner {
                max_percentage: 0,
                updates: 0,
            }),
        }
    }

    /// Returns a snapshot for `loaded` of `total` bytes.
    pub fn update(&self, loaded: u64, total: u64) -> ProgressInfo {
        let mut info = progress_info(loaded, total, self.started.elapsed());
        let mut inner = self.inner.lock().unwrap();
        inner.max_percentage = inner.max_percentage.max(info.percentage);
        inner.updates += 1;
        info.percentage = inner.max_percentage;
        info
    }

    /// Number of snapshots produced so far.
    pub fn updates(&self) -> u64 {
        self.inner.lock().unwrap().updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_and_clamps() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(0, 100), 0);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(100, 100), 100);
        assert_eq!(percentage(150, 100), 100);
    }

    #[test]
    fn progress_info_estimates_remaining_time() {
        let info = progress_info(500, 1000, Duration::from_secs(1));
        assert_eq!(info.percentage, 50);
        assert_eq!(info.speed, Some(500.0));
        assert_eq!(info.remaining_time, Some(Duration::from_secs(1)));
    }

    #[test]
    fn progress_info_zero_elapsed_has_no_speed() {
        let info = progress_info(10, 1000, Duration::ZERO);
        assert_eq!(info.speed, None);
        assert_eq!(info.remaining_time, None);
    }

    #[test]
    fn progress_info_unknown_total() {
        let info = progress_info(4096, 0, Duration::from_secs(2));
        assert_eq!(info.percentage, 0);
        assert_eq!(info.remaining_time, None);
        assert_eq!(info.speed, Some(2048.0));
    }

    #[test]
    fn complete_reports_zero_remaining() {
        let info = progress_info(1000, 1000, Duration::from_secs(1));
        assert_eq!(info.percentage, 100);
        assert_eq!(info.remaining_time, Some(Duration::ZERO));
    }

    #[test]
    fn tracker_is_monotonic() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.update(600, 1000).percentage, 60);
        // An out-of-order, lower reading never moves the percentage back.
        assert_eq!(tracker.update(300, 1000).percentage, 60);
        assert_eq!(tracker.update(1000, 1000).percentage, 100);
        assert_eq!(tracker.updates(), 3);
    }
}
