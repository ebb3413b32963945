//! Configuration constants and construction-time pool parameters.

use crate::common::{Error, Result};

/// Default size of a page in bytes (4KB).
///
/// Matches the OS page size on most systems. Any multiple of
/// [`RECORD_ALIGN`] is accepted by [`PoolConfig`].
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default width of the page-index field of a handle.
///
/// With 4KB pages this addresses ±2GB around the memory root.
pub const DEFAULT_PAGE_BITS: u32 = 20;

/// Smallest accepted page-index width.
pub const MIN_PAGE_BITS: u32 = 5;

/// Largest accepted page-index width. Leaves at least 2 record-index bits.
pub const MAX_PAGE_BITS: u32 = 30;

/// Width of one per-page check code.
pub const CHECK_BITS: u32 = 4;

/// Check codes packed into one `u32` word of the check array.
pub const CHECK_CODES_PER_WORD: usize = (u32::BITS / CHECK_BITS) as usize;

/// Alignment of pages and records within a pool.
pub const RECORD_ALIGN: usize = 8;

/// Smallest raw allocation (in pages) growth will attempt before giving up.
pub const MIN_GROWTH_PAGES: usize = 2;

/// Default shrink step for growth retries: each retry asks for
/// `attempt - attempt / DEFAULT_SHRINK_DIVISOR` pages.
pub const DEFAULT_SHRINK_DIVISOR: usize = 4;

/// Construction-time parameters of a super pool.
///
/// All sizes are in bytes. `init_size`, `incr_size` and `max_size` are
/// rounded up to whole pages by [`PoolConfig::validate`]; zero means
/// "none" for `init_size`/`incr_size` and "unbounded" for `max_size`.
///
/// # Example
/// ```
/// use superpool::PoolConfig;
///
/// let config = PoolConfig::new(4096, 20)
///     .with_init_size(64 * 1024)
///     .with_incr_size(16 * 1024)
///     .validate()
///     .unwrap();
/// assert_eq!(config.init_pages(), 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Bytes per page.
    pub page_size: usize,
    /// Width of the page-index field of a handle.
    pub page_bits: u32,
    /// Memory reserved eagerly at construction.
    pub init_size: usize,
    /// Growth step once the initial memory is used up (0 = never grow).
    pub incr_size: usize,
    /// Upper bound on total reserved memory (0 = unbounded).
    pub max_size: usize,
    /// Shrink step for growth retries (see [`DEFAULT_SHRINK_DIVISOR`]).
    pub shrink_divisor: usize,
}

impl PoolConfig {
    /// Create a config with the given page geometry and no memory sizes.
    pub fn new(page_size: usize, page_bits: u32) -> Self {
        Self {
            page_size,
            page_bits,
            init_size: 0,
            incr_size: 0,
            max_size: 0,
            shrink_divisor: DEFAULT_SHRINK_DIVISOR,
        }
    }

    pub fn with_init_size(mut self, bytes: usize) -> Self {
        self.init_size = bytes;
        self
    }

    pub fn with_incr_size(mut self, bytes: usize) -> Self {
        self.incr_size = bytes;
        self
    }

    pub fn with_max_size(mut self, bytes: usize) -> Self {
        self.max_size = bytes;
        self
    }

    pub fn with_shrink_divisor(mut self, divisor: usize) -> Self {
        self.shrink_divisor = divisor;
        self
    }

    /// Check the parameters and normalize every size.
    ///
    /// # Errors
    /// `Error::InvalidConfig` if the page geometry is out of range, the
    /// shrink divisor is below 2, or `init_size` exceeds a non-zero `max_size`.
    pub fn validate(self) -> Result<Self> {
        if !(MIN_PAGE_BITS..=MAX_PAGE_BITS).contains(&self.page_bits) {
            return Err(Error::InvalidConfig(format!(
                "page_bits {} outside {}..={}",
                self.page_bits, MIN_PAGE_BITS, MAX_PAGE_BITS
            )));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidConfig("page_size must be > 0".into()));
        }
        if self.shrink_divisor < 2 {
            return Err(Error::InvalidConfig(format!(
                "shrink_divisor {} must be >= 2",
                self.shrink_divisor
            )));
        }

        let page_size = round_up(self.page_size, RECORD_ALIGN);
        // The farthest page must stay addressable as an isize byte offset.
        let half_range = 1usize << (self.page_bits - 1);
        let span = page_size.checked_mul(half_range).unwrap_or(usize::MAX);
        if span > isize::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "page_size {} with page_bits {} overflows the address range",
                page_size, self.page_bits
            )));
        }

        let config = Self {
            page_size,
            page_bits: self.page_bits,
            init_size: round_up(self.init_size, page_size),
            incr_size: round_up(self.incr_size, page_size),
            max_size: round_up(self.max_size, page_size),
            shrink_divisor: self.shrink_divisor,
        };

        if config.max_size != 0 && config.init_size > config.max_size {
            return Err(Error::InvalidConfig(format!(
                "init_size {} exceeds max_size {}",
                config.init_size, config.max_size
            )));
        }

        Ok(config)
    }

    /// Initial size in pages.
    #[inline]
    pub fn init_pages(&self) -> usize {
        self.init_size / self.page_size
    }

    /// Growth step in pages.
    #[inline]
    pub fn incr_pages(&self) -> usize {
        self.incr_size / self.page_size
    }

    /// Memory cap in pages, `None` when unbounded.
    #[inline]
    pub fn max_pages(&self) -> Option<usize> {
        (self.max_size != 0).then(|| self.max_size / self.page_size)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, DEFAULT_PAGE_BITS)
    }
}

/// Round `value` up to a multiple of `to`. Saturates instead of overflowing.
#[inline]
pub(crate) fn round_up(value: usize, to: usize) -> usize {
    match value % to {
        0 => value,
        rem => value.saturating_add(to - rem),
    }
}
