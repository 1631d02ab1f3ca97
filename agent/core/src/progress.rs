//! Progress Tracker
//!
//! Coarse, lock-light progress for the console and the loading screen. The
//! retry controller writes; the display controller reads. Nothing here is
//! persisted.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Point-in-time view of generation progress
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressSnapshot {
    /// Current attempt (1-based, 0 before the first)
    pub attempt: u32,
    /// Attempts allowed for the current request
    pub total: u32,
    /// What is being generated
    pub label: String,
    /// Progress value, `0.0..=target`
    pub current: f64,
    /// Value at which progress is complete
    pub target: f64,
}

impl ProgressSnapshot {
    /// Progress as a whole percentage, `0..=100`
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.target <= 0.0 {
            return 100;
        }
        ((self.current / self.target).clamp(0.0, 1.0) * 100.0) as u8
    }
}

/// Thread-safe progress counter
///
/// Progress advances by `1 / total` per attempt and by one whole unit per
/// finished request, and is clamped to `target`.
#[derive(Debug)]
pub struct ProgressTracker {
    target: f64,
    current: AtomicU64,
    completed: AtomicU64,
    attempt: AtomicU32,
    total: AtomicU32,
    label: Mutex<String>,
}

impl ProgressTracker {
    /// Tracker that completes after `target` finished requests
    #[must_use]
    pub fn new(target: f64) -> Self {
        Self {
            target,
            current: AtomicU64::new(0f64.to_bits()),
            completed: AtomicU64::new(0),
            attempt: AtomicU32::new(0),
            total: AtomicU32::new(0),
            label: Mutex::new(String::new()),
        }
    }

    /// Set progress directly (clamped to `0.0..=target`)
    pub fn set_progress(&self, value: f64) {
        let value = value.clamp(0.0, self.target.max(0.0));
        self.current.store(value.to_bits(), Ordering::Release);
    }

    /// Current progress and target
    #[must_use]
    pub fn get_progress(&self) -> (f64, f64) {
        (f64::from_bits(self.current.load(Ordering::Acquire)), self.target)
    }

    /// Note the start of an attempt
    pub fn record_attempt(&self, attempt: u32, total: u32, label: &str) {
        self.attempt.store(attempt, Ordering::Release);
        self.total.store(total, Ordering::Release);
        *self.label.lock() = label.to_string();

        let completed = self.completed.load(Ordering::Acquire) as f64;
        let within = f64::from(attempt.saturating_sub(1)) / f64::from(total.max(1));
        self.set_progress(completed + within);
    }

    /// Note that a request reached a terminal outcome
    pub fn complete_request(&self) {
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        self.set_progress(completed as f64);
    }

    /// Requests finished so far
    #[must_use]
    pub fn completed_requests(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Whether progress has reached the target
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let (current, target) = self.get_progress();
        current >= target
    }

    /// Snapshot for rendering
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let (current, target) = self.get_progress();
        ProgressSnapshot {
            attempt: self.attempt.load(Ordering::Acquire),
            total: self.total.load(Ordering::Acquire),
            label: self.label.lock().clone(),
            current,
            target,
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_attempts_advance_fractionally() {
        let tracker = ProgressTracker::new(1.0);
        assert_eq!(tracker.snapshot().percent(), 0);

        tracker.record_attempt(1, 5, "rain");
        assert_eq!(tracker.snapshot().percent(), 0);

        tracker.record_attempt(3, 5, "rain");
        let snap = tracker.snapshot();
        assert_eq!(snap.percent(), 40);
        assert_eq!(snap.attempt, 3);
        assert_eq!(snap.total, 5);
        assert_eq!(snap.label, "rain");
        assert!(!tracker.is_complete());

        tracker.complete_request();
        assert!(tracker.is_complete());
        assert_eq!(tracker.snapshot().percent(), 100);
    }

    #[test]
    fn test_progress_is_clamped_to_target() {
        let tracker = ProgressTracker::new(1.0);
        tracker.complete_request();
        tracker.record_attempt(4, 5, "second");
        assert_eq!(tracker.get_progress(), (1.0, 1.0));

        tracker.set_progress(-3.0);
        assert_eq!(tracker.get_progress().0, 0.0);
    }

    #[test]
    fn test_concurrent_updates() {
        let tracker = Arc::new(ProgressTracker::new(100.0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        tracker.complete_request();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.completed_requests(), 40);
    }
}
