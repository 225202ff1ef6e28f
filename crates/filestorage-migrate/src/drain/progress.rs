//! Progress reporting for a drain.

use std::time::{Duration, Instant};

use tracing::info;

/// Counts processed transactions and decides when to log a progress line.
///
/// A line is due every `every` transactions, or when `interval` has passed
/// since the previous line.
#[derive(Debug)]
pub struct ProgressTracker {
    label: String,
    total: u64,
    processed: u64,
    every: u64,
    interval: Duration,
    started: Instant,
    last_line: Instant,
}

impl ProgressTracker {
    pub fn new(label: impl Into<String>, total: u64, every: u64, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            label: label.into(),
            total,
            processed: 0,
            every: every.max(1),
            interval,
            started: now,
            last_line: now,
        }
    }

    /// Record one transaction and log when a line is due.
    pub fn tick(&mut self) {
        if self.advance(Instant::now()) {
            info!("{}", self.line());
        }
    }

    /// Record one transaction at `now`. Returns whether a line is due.
    pub fn advance(&mut self, now: Instant) -> bool {
        self.processed += 1;
        let due = self.processed % self.every == 0
            || now.saturating_duration_since(self.last_line) > self.interval;
        if due {
            self.last_line = now;
        }
        due
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Transactions per second since start.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }

    /// Share of the estimate processed, in percent. Zero when nothing was estimated.
    pub fn percent(&self) -> f64 {
        if self.total > 0 {
            self.processed as f64 * 100.0 / self.total as f64
        } else {
            0.0
        }
    }

    pub fn line(&self) -> String {
        format!(
            "{}: {}/{} ({:.1}%) - {:.1} txn/s",
            self.label,
            self.processed,
            self.total,
            self.percent(),
            self.rate()
        )
    }
}
