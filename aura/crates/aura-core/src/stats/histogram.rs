//! Histogram - Latency Histogram
//!
//! Tracks the distribution of time-to-safepoint and safepoint pause
//! durations. Buckets are powers of two, so percentiles are upper bounds.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Histogram - logarithmic latency histogram
pub struct Histogram {
    /// Bucket counts (logarithmic buckets)
    buckets: Mutex<BTreeMap<u32, u64>>,

    /// Total count
    count: AtomicU64,

    /// Sum of all values
    sum: AtomicU64,

    /// Min value
    min: AtomicU64,

    /// Max value
    max: AtomicU64,
}

impl Histogram {
    /// Create new histogram
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    /// Record value
    pub fn record(&self, value: u64) {
        *self.buckets.lock().entry(Self::bucket(value)).or_insert(0) += 1;

        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    /// Bucket for value: 0, then 1, 2, 4, 8, ...
    fn bucket(value: u64) -> u32 {
        64 - value.leading_zeros()
    }

    /// Largest value that falls into `bucket`
    fn bucket_upper_bound(bucket: u32) -> u64 {
        match bucket {
            0 => 0,
            64 => u64::MAX,
            b => (1u64 << b) - 1,
        }
    }

    /// Get percentile (upper bound of the bucket holding it)
    ///
    /// # Arguments
    /// * `p` - Fraction in `0.0..=1.0`
    pub fn percentile(&self, p: f64) -> u64 {
        let buckets = self.buckets.lock();
        let total = self.count.load(Ordering::Relaxed);

        if total == 0 {
            return 0;
        }

        let target = ((total as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0;

        for (&bucket, &count) in buckets.iter() {
            cumulative += count;
            if cumulative >= target {
                return Self::bucket_upper_bound(bucket).min(self.max());
            }
        }

        self.max()
    }

    /// Get P50 (median)
    pub fn p50(&self) -> u64 {
        self.percentile(0.50)
    }

    /// Get P99
    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }

    /// Get mean
    pub fn mean(&self) -> u64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        self.sum.load(Ordering::Relaxed) / count
    }

    /// Get min
    pub fn min(&self) -> u64 {
        let min = self.min.load(Ordering::Relaxed);
        if min == u64::MAX {
            0
        } else {
            min
        }
    }

    /// Get max
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    /// Get count
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Clear histogram
    pub fn clear(&self) {
        self.buckets.lock().clear();
        self.count.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.min.store(u64::MAX, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_histogram() {
        let histogram = Histogram::new();
        assert_eq!(histogram.p50(), 0);
        assert_eq!(histogram.min(), 0);
        assert_eq!(histogram.mean(), 0);
    }

    #[test]
    fn test_percentiles_are_bucket_bounds() {
        let histogram = Histogram::new();
        for value in [3, 5, 6, 7, 100] {
            histogram.record(value);
        }

        assert_eq!(histogram.count(), 5);
        assert_eq!(histogram.min(), 3);
        assert_eq!(histogram.max(), 100);
        // 5, 6 and 7 share the 4..=7 bucket
        assert_eq!(histogram.p50(), 7);
        assert_eq!(histogram.p99(), 100);
    }

    #[test]
    fn test_clear() {
        let histogram = Histogram::new();
        histogram.record(42);
        histogram.clear();
        assert_eq!(histogram.count(), 0);
        assert_eq!(histogram.max(), 0);
    }
}
