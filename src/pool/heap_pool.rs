//! Heap Pool - a super pool backed by coarse heap allocations.
//!
//! [`HeapArena`] is the [`PageSource`] of a [`HeapPool`]. It reserves
//! memory in large *areas* and carves pages off the current area's unused
//! tail.
//!
//! # Address fit
//! The first area fixes the memory root. Every later area must land where
//! its pages get page indices inside the handle's signed range, and must
//! not cover index −1. An allocation that lands elsewhere is freed and the
//! attempt retried smaller, so the handle width caps how much memory one
//! pool can address.
//!
//! ```text
//!            root
//!  ... ───────┼──────────────────────────────────────── address
//!    area 1   │ area 0 (fixes root)       area 2
//!  [-9 .. -2] │ [0 .. 15]             [40 .. 55]        page index
//! ```

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use crate::common::config::{round_up, MIN_GROWTH_PAGES, RECORD_ALIGN};
use crate::common::{Error, Handle, HandleCodec, PoolConfig, Result};
use crate::pool::stats::PoolStats;
use crate::pool::super_pool::{PageSource, SuperPool};

/// Super pool whose pages come from heap areas.
pub type HeapPool = SuperPool<HeapArena>;

/// Raw allocator behind [`HeapArena`]: one region per call, `None` on
/// failure.
pub(crate) type RawAlloc = Box<dyn FnMut(Layout) -> Option<RawRegion>>;

/// One raw heap allocation, freed on drop unless borrowed.
pub(crate) struct RawRegion {
    ptr: NonNull<u8>,
    layout: Layout,
    owned: bool,
}

impl RawRegion {
    pub(crate) fn allocate(layout: Layout) -> Option<Self> {
        debug_assert!(layout.size() > 0);
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            layout,
            owned: true,
        })
    }

    /// Region over memory owned elsewhere; never freed here.
    #[cfg(test)]
    pub(crate) fn borrowed(ptr: NonNull<u8>, layout: Layout) -> Self {
        Self {
            ptr,
            layout,
            owned: false,
        }
    }

    #[inline]
    fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl Drop for RawRegion {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        // SAFETY: `ptr` came from `alloc::alloc` with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// A backing allocation and the run of page indices it provides.
pub struct Area {
    region: RawRegion,
    first_page: i32,
    page_count: usize,
    /// Pages already handed out, from the front.
    used: usize,
}

impl Area {
    /// Page index of the first page.
    #[inline]
    pub fn first_page(&self) -> i32 {
        self.first_page
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Pages not yet handed out.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.page_count - self.used
    }

    /// Start of the raw allocation.
    #[inline]
    pub fn raw_addr(&self) -> usize {
        self.region.addr()
    }
}

/// Page source that grows through heap allocations.
pub struct HeapArena {
    config: PoolConfig,
    /// Areas in allocation order.
    areas: Vec<Area>,
    /// Area currently serving `get_new_page`.
    curr_area: usize,
    /// Usable bytes across all areas.
    reserved: usize,
    raw_alloc: RawAlloc,
}

impl HeapArena {
    /// Source for a pool built from `config` (normalized on pool build).
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            areas: Vec::new(),
            curr_area: 0,
            reserved: 0,
            raw_alloc: Box::new(RawRegion::allocate),
        }
    }

    /// Replace the raw allocator, e.g. to script placements.
    #[cfg(test)]
    pub(crate) fn with_raw_alloc(mut self, raw_alloc: RawAlloc) -> Self {
        self.raw_alloc = raw_alloc;
        self
    }

    pub fn areas(&self) -> &[Area] {
        &self.areas
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    /// Pages across all areas, handed out or not.
    pub fn total_pages(&self) -> usize {
        self.areas.iter().map(Area::page_count).sum()
    }

    /// Reserve at least `size` more bytes as new areas.
    ///
    /// The request is rounded up to whole pages, then to the growth
    /// increment if one is set, and capped by `max_size`. Each raw
    /// allocation that fails, or lands outside the addressable range, is
    /// retried smaller until the attempt drops below [`MIN_GROWTH_PAGES`].
    ///
    /// # Errors
    /// - `Error::OutOfMemory` if `max_size` leaves no room
    /// - `Error::AllocationFailed` if no pages at all could be reserved
    pub fn alloc_more_data(
        &mut self,
        codec: &mut HandleCodec,
        stats: &PoolStats,
        size: usize,
    ) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let page_size = codec.page_size();
        let mut pages = size.div_ceil(page_size);
        let incr_pages = self.config.incr_size / page_size;
        if incr_pages > 0 {
            pages = round_up(pages, incr_pages);
        }
        if let Some(max_pages) = self.max_pages() {
            let used = self.reserved / page_size;
            pages = pages.min(max_pages.saturating_sub(used));
            if pages == 0 {
                warn!(max_size = self.config.max_size, "superpool.grow.max_size_reached");
                return Err(Error::OutOfMemory);
            }
        }

        let mut remaining = pages;
        while remaining > 0 {
            let got = shrink_attempts(remaining, self.config.shrink_divisor)
                .find_map(|attempt| self.try_add_area(codec, stats, attempt));
            match got {
                Some(n) => remaining -= n,
                None => break,
            }
        }

        let obtained = pages - remaining;
        if obtained == 0 {
            warn!(requested_pages = pages, "superpool.grow.failed");
            return Err(Error::AllocationFailed {
                bytes: pages * page_size,
            });
        }
        if remaining > 0 {
            warn!(
                requested_pages = pages,
                obtained_pages = obtained,
                "superpool.grow.partial"
            );
        }
        Ok(())
    }

    fn max_pages(&self) -> Option<usize> {
        (self.config.max_size != 0).then(|| self.config.max_size / self.config.page_size)
    }

    /// One raw allocation of `pages` usable pages. Returns the pages added.
    fn try_add_area(
        &mut self,
        codec: &mut HandleCodec,
        stats: &PoolStats,
        pages: usize,
    ) -> Option<usize> {
        let page_size = codec.page_size();
        let root = codec.memory_root();
        // Later areas need room to slide their first page onto the root's
        // page grid; the first area defines the grid.
        let slack = if root.is_some() { page_size - RECORD_ALIGN } else { 0 };
        let bytes = pages.checked_mul(page_size)?.checked_add(slack)?;
        let layout = Layout::from_size_align(bytes, RECORD_ALIGN).ok()?;
        let region = (self.raw_alloc)(layout)?;

        let base = region.addr();
        let root_addr = root.unwrap_or(base);
        let pad = (root_addr as i128 - base as i128).rem_euclid(page_size as i128);
        let start = base as i128 + pad;
        let first_page = (start - root_addr as i128) / page_size as i128;

        let fits = i64::try_from(first_page)
            .map(|first| codec.page_range_fits(first, pages))
            .unwrap_or(false);
        if !fits {
            PoolStats::bump(&stats.allocations_discarded);
            warn!(
                base,
                pages,
                first_page = first_page as i64,
                "superpool.grow.discard_unaddressable"
            );
            return None;
        }

        if root.is_none() {
            codec.set_memory_root(base);
        }
        self.areas.push(Area {
            region,
            first_page: first_page as i32,
            page_count: pages,
            used: 0,
        });
        self.reserved += pages * page_size;

        PoolStats::bump(&stats.areas_allocated);
        stats
            .bytes_reserved
            .fetch_add((pages * page_size) as u64, Ordering::Relaxed);
        debug!(
            area = self.areas.len() - 1,
            first_page = first_page as i64,
            pages,
            reserved = self.reserved,
            "superpool.grow.area"
        );
        Some(pages)
    }
}

impl PageSource for HeapArena {
    fn init(&mut self, codec: &mut HandleCodec, stats: &PoolStats) -> Result<()> {
        // The pool normalized the config; keep the normalized copy.
        self.config.page_size = codec.page_size();
        self.config = self.config.validate()?;
        self.alloc_more_data(codec, stats, self.config.init_size)
    }

    fn get_new_page(&mut self, codec: &mut HandleCodec, stats: &PoolStats) -> Option<Handle> {
        loop {
            if let Some(area) = self.areas.get_mut(self.curr_area) {
                if area.used < area.page_count {
                    let page_idx = area.first_page + area.used as i32;
                    area.used += 1;
                    return Some(codec.encode(page_idx, 0));
                }
                if self.curr_area + 1 < self.areas.len() {
                    self.curr_area += 1;
                    continue;
                }
            }

            // Every area is used up.
            if self.config.incr_size == 0 {
                return None;
            }
            self.alloc_more_data(codec, stats, self.config.incr_size).ok()?;
        }
    }

    fn reserved_bytes(&self) -> usize {
        self.reserved
    }
}

impl HeapPool {
    /// Build a heap-backed pool and reserve `config.init_size` up front.
    ///
    /// # Example
    /// ```
    /// use superpool::{HeapPool, PoolConfig};
    ///
    /// let config = PoolConfig::new(4096, 20).with_init_size(64 * 1024);
    /// let pool = HeapPool::new(config).unwrap();
    /// assert_eq!(pool.reserved_bytes(), 64 * 1024);
    /// ```
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::with_source(config, HeapArena::new(config))
    }

    /// Reserve at least `size` more bytes. See [`HeapArena::alloc_more_data`].
    pub fn alloc_more_data(&mut self, size: usize) -> Result<()> {
        let (arena, codec, stats) = self.source_parts();
        arena.alloc_more_data(codec, stats, size)
    }

    pub fn area_count(&self) -> usize {
        self.source().area_count()
    }
}

/// Attempt sizes for one growth step: `pages`, then repeatedly
/// `attempt - attempt / divisor` (at least one less), stopping below
/// [`MIN_GROWTH_PAGES`]. A request smaller than the floor is tried once.
pub(crate) fn shrink_attempts(pages: usize, divisor: usize) -> impl Iterator<Item = usize> {
    std::iter::successors(Some(pages), move |&attempt| {
        let next = attempt - (attempt / divisor).max(1);
        (next >= MIN_GROWTH_PAGES).then_some(next)
    })
    .take_while(|&attempt| attempt > 0)
}
