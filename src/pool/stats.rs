//! Pool statistics tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by a super pool and its record pools.
///
/// The pool itself is single-threaded, but the counters are atomic so a
/// metrics collector holding an `Arc<PoolStats>` can read them from any
/// thread. All operations use `Ordering::Relaxed`; counters are independent.
///
/// # Example
/// ```
/// use superpool::PoolStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = PoolStats::new();
/// stats.seizes.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.snapshot().seizes, 1);
/// ```
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Records handed out by `seize`.
    pub seizes: AtomicU64,

    /// Records returned by `release`.
    pub releases: AtomicU64,

    /// Seize/release calls served by the cached current page.
    pub current_page_hits: AtomicU64,

    /// Seize/release calls that had to switch the current page.
    pub current_page_misses: AtomicU64,

    /// Pages formatted for a record type.
    pub pages_formatted: AtomicU64,

    /// Pages handed back to the shared free list.
    pub pages_returned: AtomicU64,

    /// Backing areas allocated.
    pub areas_allocated: AtomicU64,

    /// Raw allocations thrown away because their pages were not addressable.
    pub allocations_discarded: AtomicU64,

    /// Usable bytes reserved across all areas.
    pub bytes_reserved: AtomicU64,
}

impl PoolStats {
    /// Create a stats tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of seize/release calls served by the current page (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    /// Get a non-atomic copy for display/logging.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            seizes: self.seizes.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            current_page_hits: self.current_page_hits.load(Ordering::Relaxed),
            current_page_misses: self.current_page_misses.load(Ordering::Relaxed),
            pages_formatted: self.pages_formatted.load(Ordering::Relaxed),
            pages_returned: self.pages_returned.load(Ordering::Relaxed),
            areas_allocated: self.areas_allocated.load(Ordering::Relaxed),
            allocations_discarded: self.allocations_discarded.load(Ordering::Relaxed),
            bytes_reserved: self.bytes_reserved.load(Ordering::Relaxed),
        }
    }

    /// Reset the traffic counters. Reservation counters describe live
    /// memory and are kept.
    pub fn reset(&self) {
        self.seizes.store(0, Ordering::Relaxed);
        self.releases.store(0, Ordering::Relaxed);
        self.current_page_hits.store(0, Ordering::Relaxed);
        self.current_page_misses.store(0, Ordering::Relaxed);
        self.pages_formatted.store(0, Ordering::Relaxed);
        self.pages_returned.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub seizes: u64,
    pub releases: u64,
    pub current_page_hits: u64,
    pub current_page_misses: u64,
    pub pages_formatted: u64,
    pub pages_returned: u64,
    pub areas_allocated: u64,
    pub allocations_discarded: u64,
    pub bytes_reserved: u64,
}

impl StatsSnapshot {
    /// Fraction of seize/release calls served by the current page.
    pub fn hit_rate(&self) -> f64 {
        let total = self.current_page_hits + self.current_page_misses;
        if total == 0 {
            0.0
        } else {
            self.current_page_hits as f64 / total as f64
        }
    }

    /// Records seized and not yet released.
    pub fn records_in_use(&self) -> u64 {
        self.seizes.saturating_sub(self.releases)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ seizes: {}, releases: {}, areas: {}, reserved: {}B, hit_rate: {:.2}% }}",
            self.seizes,
            self.releases,
            self.areas_allocated,
            self.bytes_reserved,
            self.hit_rate() * 100.0
        )
    }
}
