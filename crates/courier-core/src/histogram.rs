//! Latency histogram.
//!
//! The transport's contract with its metrics layer is deliberately small:
//! `record(duration)` on the hot path, borrowed handles for export, and a
//! snapshot utility that persists to disk. Samples land in power-of-two
//! nanosecond buckets; quantiles report the upper bound of the bucket the
//! target sample falls in.

use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

const BUCKETS: usize = 64;

/// Lock-free power-of-two latency histogram.
#[derive(Debug)]
pub struct Histogram {
    buckets: [AtomicU64; BUCKETS],
    count: AtomicU64,
    sum_ns: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl Histogram {
    /// Create an empty histogram.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }

    /// Record one sample.
    pub fn record(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let idx = (63 - ns.max(1).leading_zeros()) as usize;

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ns.fetch_add(ns, Ordering::Relaxed);
        self.min_ns.fetch_min(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
    }

    /// Number of recorded samples.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Smallest recorded sample. Zero when empty.
    #[must_use]
    pub fn min(&self) -> Duration {
        match self.min_ns.load(Ordering::Relaxed) {
            u64::MAX => Duration::ZERO,
            ns => Duration::from_nanos(ns),
        }
    }

    /// Largest recorded sample.
    #[must_use]
    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_ns.load(Ordering::Relaxed))
    }

    /// Arithmetic mean of recorded samples. Zero when empty.
    #[must_use]
    pub fn mean(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.sum_ns.load(Ordering::Relaxed) / count)
    }

    /// Upper bound of the bucket holding the `q`-quantile sample.
    #[must_use]
    pub fn quantile(&self, q: f64) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        let target = ((q.clamp(0.0, 1.0) * count as f64).ceil() as u64).max(1);

        let mut seen = 0u64;
        for (idx, bucket) in self.buckets.iter().enumerate() {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= target {
                let upper = if idx >= 63 { u64::MAX } else { (1u64 << (idx + 1)) - 1 };
                return Duration::from_nanos(upper);
            }
        }
        self.max()
    }

    /// Human-readable snapshot: summary line plus one line per occupied
    /// bucket.
    #[must_use]
    pub fn snapshot(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "count={} min_ns={} mean_ns={} max_ns={} p50_ns={} p90_ns={} p99_ns={}",
            self.count(),
            self.min().as_nanos(),
            self.mean().as_nanos(),
            self.max().as_nanos(),
            self.quantile(0.50).as_nanos(),
            self.quantile(0.90).as_nanos(),
            self.quantile(0.99).as_nanos(),
        );
        for (idx, bucket) in self.buckets.iter().enumerate() {
            let n = bucket.load(Ordering::Relaxed);
            if n > 0 {
                let _ = writeln!(out, "le_ns={} count={}", (1u128 << (idx + 1)) - 1, n);
            }
        }
        out
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Persist a histogram snapshot to `path`.
///
/// # Errors
///
/// I/O errors from writing the file.
pub async fn write_histogram(path: impl AsRef<Path>, hist: &Histogram) -> std::io::Result<()> {
    tokio::fs::write(path, hist.snapshot()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_reports_zeroes() {
        let hist = Histogram::new();
        assert_eq!(hist.count(), 0);
        assert_eq!(hist.min(), Duration::ZERO);
        assert_eq!(hist.mean(), Duration::ZERO);
        assert_eq!(hist.quantile(0.99), Duration::ZERO);
    }

    #[test]
    fn record_tracks_extremes_and_mean() {
        let hist = Histogram::new();
        hist.record(Duration::from_nanos(100));
        hist.record(Duration::from_nanos(300));

        assert_eq!(hist.count(), 2);
        assert_eq!(hist.min(), Duration::from_nanos(100));
        assert_eq!(hist.max(), Duration::from_nanos(300));
        assert_eq!(hist.mean(), Duration::from_nanos(200));
    }

    #[test]
    fn quantile_is_monotone() {
        let hist = Histogram::new();
        for i in 1..=1000u64 {
            hist.record(Duration::from_nanos(i));
        }
        let p50 = hist.quantile(0.50);
        let p99 = hist.quantile(0.99);
        assert!(p50 <= p99);
        assert!(p99 >= Duration::from_nanos(512));
    }

    #[tokio::test]
    async fn snapshot_persists_to_disk() {
        let hist = Histogram::new();
        hist.record(Duration::from_micros(5));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("latency.hist");
        write_histogram(&path, &hist).await.expect("write");

        let contents = std::fs::read_to_string(&path).expect("read back");
        assert!(contents.starts_with("count=1"));
    }
}
