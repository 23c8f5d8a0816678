//! Atomic Utilities
//!
//! Helpers for header words and statistics counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// AtomicUtils - utility for atomic operations
pub struct AtomicUtils;

impl AtomicUtils {
    /// Load with acquire ordering
    #[inline]
    pub fn load_acquire(atomic: &AtomicUsize) -> usize {
        atomic.load(Ordering::Acquire)
    }

    /// Single strong compare-and-swap
    ///
    /// # Returns
    /// `Ok(previous)` on success, `Err(actual)` when the word changed.
    #[inline]
    pub fn compare_and_swap(atomic: &AtomicUsize, current: usize, new: usize) -> Result<usize, usize> {
        atomic.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    /// Fetch-add on a 64-bit counter that saturates instead of wrapping
    ///
    /// # Returns
    /// The previous value
    pub fn saturating_add(atomic: &AtomicU64, value: u64) -> u64 {
        let mut current = atomic.load(Ordering::Relaxed);

        loop {
            let new_value = current.saturating_add(value);

            match atomic.compare_exchange_weak(current, new_value, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return current,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_and_swap() {
        let word = AtomicUsize::new(5);
        assert_eq!(AtomicUtils::compare_and_swap(&word, 5, 9), Ok(5));
        assert_eq!(AtomicUtils::compare_and_swap(&word, 5, 1), Err(9));
        assert_eq!(AtomicUtils::load_acquire(&word), 9);
    }

    #[test]
    fn test_saturating_add() {
        let counter = AtomicU64::new(u64::MAX - 1);
        assert_eq!(AtomicUtils::saturating_add(&counter, 10), u64::MAX - 1);
        assert_eq!(counter.load(Ordering::Relaxed), u64::MAX);
    }
}
