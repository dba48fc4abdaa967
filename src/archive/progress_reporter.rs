//! Progress reporting for long-running archive and volume operations
//!
//! Progress is a one-way notification: the operation pushes a number into a
//! [`ProgressSink`] and never waits on the observer.

use std::fmt;
use std::sync::Arc;

/// Progress callback type
pub type ProgressFn = dyn Fn(u32) + Send + Sync;

/// Optional, cloneable progress observer.
///
/// A sink without a callback silently drops every update.
#[derive(Clone, Default)]
pub struct ProgressSink {
    callback: Option<Arc<ProgressFn>>,
}

impl ProgressSink {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// A sink nobody listens to
    pub fn none() -> Self {
        Self { callback: None }
    }

    pub fn is_observed(&self) -> bool {
        self.callback.is_some()
    }

    pub fn report(&self, value: u32) {
        if let Some(ref callback) = self.callback {
            callback(value);
        }
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink")
            .field("observed", &self.is_observed())
            .finish()
    }
}

/// Percentage reporter over a total known before the loop starts
///
/// Emits `processed * 100 / total`, only when the value moves forward, so the
/// observer sees a non-decreasing sequence. A zero total never reports.
#[derive(Debug)]
pub struct ProgressReporter {
    total: u64,
    processed: u64,
    last_reported: Option<u32>,
    sink: ProgressSink,
}

impl ProgressReporter {
    pub fn new(total: u64, sink: ProgressSink) -> Self {
        Self {
            total,
            processed: 0,
            last_reported: None,
            sink,
        }
    }

    /// Records one processed unit (an entry)
    pub fn inc(&mut self) {
        self.add(1);
    }

    /// Records `amount` processed units (bytes, for the volume splitter)
    pub fn add(&mut self, amount: u64) {
        self.processed = self.processed.saturating_add(amount);
        self.emit();
    }

    pub fn percentage(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (self.processed.min(self.total) * 100 / self.total) as u32
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    fn emit(&mut self) {
        if self.total == 0 {
            return;
        }
        let pct = self.percentage();
        if self.last_reported.map_or(true, |last| pct > last) {
            self.last_reported = Some(pct);
            self.sink.report(pct);
        }
    }
}

/// Approximate progress for formats whose entry count is unknown up front
///
/// Reports `processed_entries * 10` without capping; observers clamp for display.
pub fn report_unbounded(sink: &ProgressSink, processed_entries: u64) {
    sink.report(processed_entries.saturating_mul(10).min(u32::MAX as u64) as u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_sink() -> (ProgressSink, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink = ProgressSink::new(move |value| seen_clone.lock().unwrap().push(value));
        (sink, seen)
    }

    #[test]
    fn test_percentage_per_entry() {
        let (sink, seen) = recording_sink();
        let mut reporter = ProgressReporter::new(4, sink);
        for _ in 0..4 {
            reporter.inc();
        }
        assert_eq!(*seen.lock().unwrap(), vec![25, 50, 75, 100]);
    }

    #[test]
    fn test_only_reports_forward_movement() {
        let (sink, seen) = recording_sink();
        let mut reporter = ProgressReporter::new(1000, sink);
        for _ in 0..20 {
            reporter.inc();
        }
        let values = seen.lock().unwrap().clone();
        assert_eq!(values, vec![0, 1, 2]);
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_zero_total_never_divides() {
        let (sink, seen) = recording_sink();
        let mut reporter = ProgressReporter::new(0, sink);
        reporter.inc();
        reporter.add(10);
        assert_eq!(reporter.percentage(), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_overshoot_is_capped() {
        let mut reporter = ProgressReporter::new(10, ProgressSink::none());
        reporter.add(25);
        assert_eq!(reporter.percentage(), 100);
        assert_eq!(reporter.processed(), 25);
    }

    #[test]
    fn test_unbounded_is_not_clamped() {
        let (sink, seen) = recording_sink();
        report_unbounded(&sink, 3);
        report_unbounded(&sink, 15);
        assert_eq!(*seen.lock().unwrap(), vec![30, 150]);
    }

    #[test]
    fn test_unobserved_sink() {
        let sink = ProgressSink::none();
        assert!(!sink.is_observed());
        sink.report(42);
    }
}
