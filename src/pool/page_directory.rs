//! Page directory - flat per-page metadata.
//!
//! The directory holds one [`PageEntry`] for every page index a handle can
//! express (2^page_bits), plus a packed array of 4-bit check codes used to
//! catch a handle read through the wrong record pool.

use crate::common::config::{CHECK_BITS, CHECK_CODES_PER_WORD};
use crate::common::{Error, Handle, HandleCodec, Result};

/// Metadata of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    /// Owning record type, 0 when the page is unowned.
    pub type_id: u32,
    /// First free record on the page.
    pub free_rec: Handle,
    /// Records currently seized from the page.
    pub use_count: u32,
    /// Previous page in whichever list holds this page.
    pub prev: Handle,
    /// Next page in whichever list holds this page.
    pub next: Handle,
}

impl PageEntry {
    /// Entry of a page nobody owns.
    pub const EMPTY: PageEntry = PageEntry {
        type_id: 0,
        free_rec: Handle::NIL,
        use_count: 0,
        prev: Handle::NIL,
        next: Handle::NIL,
    };

    #[inline]
    pub fn is_free(&self) -> bool {
        self.type_id == 0
    }
}

impl Default for PageEntry {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Packed 4-bit check codes, eight per word.
#[derive(Debug)]
pub struct CheckBits {
    words: Vec<u32>,
}

impl CheckBits {
    const MASK: u32 = (1 << CHECK_BITS) - 1;

    /// Zero-filled array for `slots` pages.
    pub fn new(slots: usize) -> Result<Self> {
        let len = slots.div_ceil(CHECK_CODES_PER_WORD);
        let mut words = Vec::new();
        words
            .try_reserve_exact(len)
            .map_err(|_| Error::AllocationFailed {
                bytes: len * std::mem::size_of::<u32>(),
            })?;
        words.resize(len, 0);
        Ok(Self { words })
    }

    #[inline]
    fn locate(slot: usize) -> (usize, u32) {
        let word = slot / CHECK_CODES_PER_WORD;
        let shift = (slot % CHECK_CODES_PER_WORD) as u32 * CHECK_BITS;
        (word, shift)
    }

    #[inline]
    pub fn get(&self, slot: usize) -> u8 {
        let (word, shift) = Self::locate(slot);
        ((self.words[word] >> shift) & Self::MASK) as u8
    }

    #[inline]
    pub fn set(&mut self, slot: usize, code: u8) {
        debug_assert!(u32::from(code) <= Self::MASK, "check code too wide");
        let (word, shift) = Self::locate(slot);
        let w = &mut self.words[word];
        *w = (*w & !(Self::MASK << shift)) | ((u32::from(code) & Self::MASK) << shift);
    }
}

/// Flat array of page entries indexed by the page field of a handle.
#[derive(Debug)]
pub struct PageDirectory {
    entries: Vec<PageEntry>,
    check: CheckBits,
    rec_bits: u32,
}

impl PageDirectory {
    /// Allocate a directory covering every page `codec` can address.
    ///
    /// # Errors
    /// `Error::AllocationFailed` if either array cannot be allocated.
    pub fn new(codec: &HandleCodec) -> Result<Self> {
        let slots = codec.page_slots();
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(slots)
            .map_err(|_| Error::AllocationFailed {
                bytes: slots * std::mem::size_of::<PageEntry>(),
            })?;
        entries.resize(slots, PageEntry::EMPTY);

        Ok(Self {
            entries,
            check: CheckBits::new(slots)?,
            rec_bits: codec.rec_bits(),
        })
    }

    #[inline]
    fn slot(&self, page: Handle) -> usize {
        debug_assert!(page.is_valid(), "directory lookup of NIL");
        (page.0 >> self.rec_bits) as usize
    }

    /// Number of page slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entry(&self, page: Handle) -> &PageEntry {
        &self.entries[self.slot(page)]
    }

    #[inline]
    pub fn entry_mut(&mut self, page: Handle) -> &mut PageEntry {
        let slot = self.slot(page);
        &mut self.entries[slot]
    }

    #[inline]
    pub fn check_code(&self, page: Handle) -> u8 {
        self.check.get(self.slot(page))
    }

    #[inline]
    pub fn set_check_code(&mut self, page: Handle, code: u8) {
        let slot = self.slot(page);
        self.check.set(slot, code);
    }
}
