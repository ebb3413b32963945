//! Handles and the handle codec.
//!
//! A [`Handle`] is a 32-bit reference to one record: the high `page_bits`
//! bits hold a signed page index relative to the pool's memory root, the
//! low bits hold the record index within the page.
//!
//! ```text
//!  31                 rec_bits                 0
//! ┌──────────────────────┬──────────────────────┐
//! │ page index (signed)  │    record index      │
//! └──────────────────────┴──────────────────────┘
//! address(page) = memory_root + page_index × page_size
//! ```
//!
//! Page index −1 is never handed out, so no valid handle can equal
//! [`Handle::NIL`].

use std::fmt;

use crate::common::config::{CHECK_BITS, MAX_PAGE_BITS, MIN_PAGE_BITS};

/// Reference to a record (or, with record index 0, to a page).
///
/// # Example
/// ```
/// use superpool::Handle;
///
/// let h = Handle::new(0x0000_1003);
/// assert!(h.is_valid());
/// assert!(!Handle::NIL.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u32);

impl Handle {
    /// Sentinel meaning "no reference".
    pub const NIL: Handle = Handle(u32::MAX);

    /// Wrap a raw handle value.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Handle(raw)
    }

    /// Check that this is not the sentinel.
    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::NIL
    }

    /// Check that this is the sentinel.
    #[inline]
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::NIL
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "Handle(NIL)")
        } else {
            write!(f, "Handle({:#010x})", self.0)
        }
    }
}

/// Pure conversions between page/record indices, handles and addresses.
///
/// The memory root is unset until the first backing allocation fixes it;
/// address conversions before that point are meaningless and debug-asserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleCodec {
    page_bits: u32,
    rec_bits: u32,
    page_size: usize,
    memory_root: Option<usize>,
}

impl HandleCodec {
    /// Create a codec for `page_bits`-wide page indices over `page_size` pages.
    ///
    /// # Panics
    /// Panics if `page_bits` is outside `MIN_PAGE_BITS..=MAX_PAGE_BITS` or
    /// `page_size` is 0. [`PoolConfig::validate`](crate::PoolConfig::validate)
    /// rejects both before a pool is built.
    pub fn new(page_bits: u32, page_size: usize) -> Self {
        assert!(
            (MIN_PAGE_BITS..=MAX_PAGE_BITS).contains(&page_bits),
            "page_bits out of range"
        );
        assert!(page_size > 0, "page_size must be > 0");
        Self {
            page_bits,
            rec_bits: u32::BITS - page_bits,
            page_size,
            memory_root: None,
        }
    }

    /// Same codec with a fixed memory root.
    pub fn with_memory_root(mut self, root: usize) -> Self {
        self.memory_root = Some(root);
        self
    }

    #[inline]
    pub fn page_bits(&self) -> u32 {
        self.page_bits
    }

    #[inline]
    pub fn rec_bits(&self) -> u32 {
        self.rec_bits
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[inline]
    pub fn memory_root(&self) -> Option<usize> {
        self.memory_root
    }

    /// Fix the memory root. Only the first backing allocation does this.
    pub(crate) fn set_memory_root(&mut self, root: usize) {
        debug_assert!(self.memory_root.is_none(), "memory root already fixed");
        self.memory_root = Some(root);
    }

    /// Number of entries in a flat page directory (2^page_bits).
    #[inline]
    pub fn page_slots(&self) -> usize {
        1usize << self.page_bits
    }

    /// Most records a page can index.
    #[inline]
    pub fn max_records_per_page(&self) -> u32 {
        1u32 << self.rec_bits
    }

    #[inline]
    pub fn min_page_index(&self) -> i32 {
        -(1i32 << (self.page_bits - 1))
    }

    #[inline]
    pub fn max_page_index(&self) -> i32 {
        (1i32 << (self.page_bits - 1)) - 1
    }

    /// In range and not the reserved −1.
    #[inline]
    pub fn is_valid_page_index(&self, page_idx: i32) -> bool {
        page_idx != -1 && page_idx >= self.min_page_index() && page_idx <= self.max_page_index()
    }

    #[inline]
    fn rec_mask(&self) -> u32 {
        (1u32 << self.rec_bits) - 1
    }

    #[inline]
    fn page_mask(&self) -> u32 {
        (1u32 << self.page_bits) - 1
    }

    /// Pack a page index and record index into a handle.
    #[inline]
    pub fn encode(&self, page_idx: i32, rec_idx: u32) -> Handle {
        debug_assert!(self.is_valid_page_index(page_idx), "bad page index {page_idx}");
        debug_assert!(rec_idx <= self.rec_mask(), "bad record index {rec_idx}");
        let field = (page_idx as u32) & self.page_mask();
        Handle((field << self.rec_bits) | rec_idx)
    }

    /// Signed page index of a handle.
    #[inline]
    pub fn page_index(&self, handle: Handle) -> i32 {
        let shift = u32::BITS - self.page_bits;
        // Page field sits in the top bits already; arithmetic shift sign-extends.
        (handle.0 as i32) >> shift
    }

    /// Record index of a handle.
    #[inline]
    pub fn record_index(&self, handle: Handle) -> u32 {
        handle.0 & self.rec_mask()
    }

    /// Split a handle into (page index, record index).
    #[inline]
    pub fn decode(&self, handle: Handle) -> (i32, u32) {
        (self.page_index(handle), self.record_index(handle))
    }

    /// Handle of the page a record lives on.
    #[inline]
    pub fn page_of(&self, handle: Handle) -> Handle {
        Handle(handle.0 & !self.rec_mask())
    }

    /// Directory slot of a handle's page (the unsigned page field).
    #[inline]
    pub fn slot(&self, handle: Handle) -> usize {
        (handle.0 >> self.rec_bits) as usize
    }

    /// Address of a handle's page.
    #[inline]
    pub fn address_of(&self, handle: Handle) -> usize {
        debug_assert!(self.memory_root.is_some(), "memory root not fixed");
        let root = self.memory_root.unwrap_or(0);
        let offset = self.page_index(handle) as isize * self.page_size as isize;
        root.wrapping_add_signed(offset)
    }

    /// Page handle of a page address.
    #[inline]
    pub fn handle_of(&self, address: usize) -> Handle {
        debug_assert!(self.memory_root.is_some(), "memory root not fixed");
        let root = self.memory_root.unwrap_or(0);
        let offset = address.wrapping_sub(root) as isize;
        debug_assert!(
            offset.rem_euclid(self.page_size as isize) == 0,
            "address {address:#x} is not page aligned"
        );
        let page_idx = offset.div_euclid(self.page_size as isize) as i32;
        self.encode(page_idx, 0)
    }

    /// Whether pages `first .. first + count` are all addressable.
    pub fn page_range_fits(&self, first: i64, count: usize) -> bool {
        if count == 0 {
            return false;
        }
        let last = first + count as i64 - 1;
        first >= self.min_page_index() as i64
            && last <= self.max_page_index() as i64
            && !(first <= -1 && last >= -1)
    }

    /// Non-zero check code stamped on pages owned by `type_id`.
    #[inline]
    pub fn check_code(type_id: u32) -> u8 {
        let modulus = (1u32 << CHECK_BITS) - 1;
        (1 + type_id % modulus) as u8
    }
}
