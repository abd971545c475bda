//! # Scan Statistics
//!
//! Lock-free counters maintained by the scan loop and read by anyone holding
//! a [`SpectrumReader`](crate::engine::SpectrumReader).
//!
//! ```rust
//! use spektrum_core::stats::ScanStats;
//!
//! let stats = ScanStats::new();
//! stats.record_segment_ns(1500);
//! stats.record_failure();
//! stats.record_cycle();
//!
//! let snap = stats.snapshot();
//! assert_eq!(snap.segments, 1);
//! assert_eq!(snap.failures, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for one engine, shared between the loop thread and readers.
#[derive(Debug)]
pub struct ScanStats {
    /// Completed round-robin cycles
    cycles: AtomicU64,
    /// Segments written into the buffer
    segments: AtomicU64,
    /// Segments skipped after an acquisition failure
    failures: AtomicU64,
    /// Failures since the last successful segment
    consecutive_failures: AtomicU64,
    total_time_ns: AtomicU64,
    max_time_ns: AtomicU64,
    min_time_ns: AtomicU64,
}

impl Default for ScanStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanStats {
    pub fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            segments: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            total_time_ns: AtomicU64::new(0),
            max_time_ns: AtomicU64::new(0),
            min_time_ns: AtomicU64::new(u64::MAX),
        }
    }

    /// Record a successfully written segment and its processing time.
    ///
    /// Clears the consecutive failure count.
    #[inline]
    pub fn record_segment_ns(&self, time_ns: u64) {
        self.segments.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.total_time_ns.fetch_add(time_ns, Ordering::Relaxed);
        self.max_time_ns.fetch_max(time_ns, Ordering::Relaxed);
        self.min_time_ns.fetch_min(time_ns, Ordering::Relaxed);
    }

    /// Record a skipped segment. Returns the new consecutive failure count.
    #[inline]
    pub fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Forget any failure streak carried over from a previous run.
    #[inline]
    pub fn clear_consecutive_failures(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a completed pass over every segment.
    #[inline]
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn segments(&self) -> u64 {
        self.segments.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Average segment latency in nanoseconds.
    pub fn avg_latency_ns(&self) -> u64 {
        let n = self.segments();
        if n == 0 {
            0
        } else {
            self.total_time_ns.load(Ordering::Relaxed) / n
        }
    }

    #[inline]
    pub fn max_latency_ns(&self) -> u64 {
        self.max_time_ns.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn min_latency_ns(&self) -> u64 {
        let min = self.min_time_ns.load(Ordering::Relaxed);
        if min == u64::MAX {
            0
        } else {
            min
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.cycles.store(0, Ordering::Relaxed);
        self.segments.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.total_time_ns.store(0, Ordering::Relaxed);
        self.max_time_ns.store(0, Ordering::Relaxed);
        self.min_time_ns.store(u64::MAX, Ordering::Relaxed);
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> ScanStatsSnapshot {
        ScanStatsSnapshot {
            cycles: self.cycles(),
            segments: self.segments(),
            failures: self.failures(),
            consecutive_failures: self.consecutive_failures(),
            avg_latency_ns: self.avg_latency_ns(),
            max_latency_ns: self.max_latency_ns(),
            min_latency_ns: self.min_latency_ns(),
        }
    }
}

/// Point-in-time copy of [`ScanStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanStatsSnapshot {
    pub cycles: u64,
    pub segments: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub avg_latency_ns: u64,
    pub max_latency_ns: u64,
    pub min_latency_ns: u64,
}

impl ScanStatsSnapshot {
    /// Average segment latency in microseconds.
    #[inline]
    pub fn avg_latency_us(&self) -> f64 {
        self.avg_latency_ns as f64 / 1000.0
    }

    /// Max segment latency in microseconds.
    #[inline]
    pub fn max_latency_us(&self) -> f64 {
        self.max_latency_ns as f64 / 1000.0
    }

    /// Fraction of attempted segments that failed.
    pub fn failure_rate(&self) -> f64 {
        let attempts = self.segments + self.failures;
        if attempts == 0 {
            0.0
        } else {
            self.failures as f64 / attempts as f64
        }
    }
}

/// RAII timer that records a successful segment on [`finish`](Self::finish).
///
/// Dropping the timer without finishing records nothing, so a failed
/// acquisition does not skew the latency figures.
pub struct SegmentTimer<'a> {
    stats: &'a ScanStats,
    start: Instant,
}

impl<'a> SegmentTimer<'a> {
    #[inline]
    pub fn new(stats: &'a ScanStats) -> Self {
        Self {
            stats,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record the segment.
    pub fn finish(self) {
        let elapsed = self.start.elapsed().as_nanos() as u64;
        self.stats.record_segment_ns(elapsed);
    }
}
