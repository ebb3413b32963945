//! Super Pool - the shared page allocator.
//!
//! The [`SuperPool`] hands out fixed-size pages to record pools and takes
//! them back. It provides:
//! - The flat page directory and per-page check codes
//! - The shared free-page list
//! - Page formatting and the current-page cache swap used by record pools
//! - A [`PageSource`] seam that supplies brand-new pages

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::common::{Error, Handle, HandleCodec, PoolConfig, Result};
use crate::pool::page_directory::{PageDirectory, PageEntry};
use crate::pool::page_list::PageList;
use crate::pool::policy::{PagePolicy, ReturnEmpty};
use crate::pool::rec_info::RecInfo;
use crate::pool::stats::PoolStats;

/// Supplier of pages the super pool has never seen before.
///
/// The first source allocation fixes the codec's memory root; every page
/// returned afterwards must be addressable through the codec.
pub trait PageSource {
    /// Reserve the initial memory. Called once while the pool is built.
    fn init(&mut self, codec: &mut HandleCodec, stats: &PoolStats) -> Result<()>;

    /// Produce one new page handle, or `None` when the source is exhausted.
    fn get_new_page(&mut self, codec: &mut HandleCodec, stats: &PoolStats) -> Option<Handle>;

    /// Usable bytes reserved so far.
    fn reserved_bytes(&self) -> usize;
}

/// Which list a page belongs on, by use count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageClass {
    Empty,
    Partial,
    Full,
}

impl PageClass {
    #[inline]
    fn of(use_count: u32, max_use_count: u32) -> Self {
        if use_count == 0 {
            PageClass::Empty
        } else if use_count < max_use_count {
            PageClass::Partial
        } else {
            PageClass::Full
        }
    }

    fn list(self, info: &mut RecInfo) -> &mut PageList {
        match self {
            PageClass::Empty => &mut info.free_list,
            PageClass::Partial => &mut info.active_list,
            PageClass::Full => &mut info.full_list,
        }
    }
}

/// Outcome of walking a page's embedded free chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FreeChain {
    Len(u32),
    Contains,
    Broken,
}

/// Page allocator shared by every record pool built on it.
///
/// # Architecture
/// ```text
/// ┌──────────────────────────────────────────────────────────────┐
/// │                         SuperPool<S>                         │
/// │  ┌────────────┐  ┌──────────────────────────────────────┐    │
/// │  │   codec    │  │ directory: [PageEntry; 2^page_bits]  │    │
/// │  │ handle⇄addr│  │            + 4-bit check codes       │    │
/// │  └────────────┘  └──────────────────────────────────────┘    │
/// │  ┌────────────┐  ┌────────────┐  ┌────────────────────┐      │
/// │  │ free_list  │  │   policy   │  │ source: PageSource │      │
/// │  │  PageList  │  │ PagePolicy │  │  (HeapArena, ...)  │      │
/// │  └────────────┘  └────────────┘  └────────────────────┘      │
/// └──────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// None. The pool and every record pool on it must be used from one thread
/// at a time; record pools share it through `Rc<RefCell<_>>`, which keeps
/// them `!Send` and `!Sync`.
pub struct SuperPool<S: PageSource> {
    config: PoolConfig,
    codec: HandleCodec,
    directory: PageDirectory,
    /// Pages owned by no record type.
    free_list: PageList,
    /// Last type id handed to a record pool.
    type_count: u32,
    policy: Box<dyn PagePolicy>,
    stats: Arc<PoolStats>,
    source: S,
}

impl<S: PageSource> SuperPool<S> {
    /// Build a pool over `source` with fresh statistics.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if `config` does not validate
    /// - `Error::AllocationFailed` if the directory or initial memory
    ///   cannot be allocated
    pub fn with_source(config: PoolConfig, source: S) -> Result<Self> {
        Self::with_collector(config, source, Arc::new(PoolStats::new()))
    }

    /// Build a pool that reports into an existing stats collector.
    pub fn with_collector(config: PoolConfig, source: S, stats: Arc<PoolStats>) -> Result<Self> {
        let config = config.validate()?;
        let codec = HandleCodec::new(config.page_bits, config.page_size);
        let directory = PageDirectory::new(&codec)?;

        let mut pool = Self {
            config,
            codec,
            directory,
            free_list: PageList::new(),
            type_count: 0,
            policy: Box::new(ReturnEmpty),
            stats,
            source,
        };
        pool.source.init(&mut pool.codec, &pool.stats)?;

        info!(
            page_size = config.page_size,
            page_bits = config.page_bits,
            reserved = pool.source.reserved_bytes(),
            "superpool.init"
        );
        Ok(pool)
    }

    /// Replace the page return policy.
    pub fn with_policy(mut self, policy: impl PagePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn set_policy(&mut self, policy: Box<dyn PagePolicy>) {
        self.policy = policy;
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn codec(&self) -> &HandleCodec {
        &self.codec
    }

    pub fn directory(&self) -> &PageDirectory {
        &self.directory
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Shared handle to the stats collector.
    pub fn stats_collector(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Pages on the shared free list.
    pub fn free_page_count(&self) -> u32 {
        self.free_list.len()
    }

    pub fn free_list(&self) -> &PageList {
        &self.free_list
    }

    pub fn reserved_bytes(&self) -> usize {
        self.source.reserved_bytes()
    }

    /// Directory entry of the page holding `handle`.
    pub fn page_entry(&self, handle: Handle) -> &PageEntry {
        self.directory.entry(self.codec.page_of(handle))
    }

    pub(crate) fn source_parts(&mut self) -> (&mut S, &mut HandleCodec, &PoolStats) {
        (&mut self.source, &mut self.codec, &self.stats)
    }

    /// Hand out a fresh, non-zero record type id.
    ///
    /// Ids are never reused, so a page tag always names one record pool.
    ///
    /// # Errors
    /// `Error::TypeIdsExhausted` once every `u32` id has been handed out.
    pub(crate) fn next_type_id(&mut self) -> Result<u32> {
        self.type_count = self
            .type_count
            .checked_add(1)
            .ok_or(Error::TypeIdsExhausted)?;
        Ok(self.type_count)
    }

    // ========================================================================
    // Page sourcing
    // ========================================================================

    /// Ask the source for a page nobody has used yet.
    pub fn get_new_page(&mut self) -> Option<Handle> {
        self.source.get_new_page(&mut self.codec, &self.stats)
    }

    /// Take a page from the shared free list (or the source), format it for
    /// `info` and put it at the head of `info`'s free list.
    pub(crate) fn get_free_page(&mut self, info: &mut RecInfo) -> Option<Handle> {
        let page = match self.free_list.pop_head(&mut self.directory) {
            Some(page) => page,
            None => self.get_new_page()?,
        };
        self.format_page(info, page);
        Some(page)
    }

    /// Make some page with free records current for `info`.
    ///
    /// Tries, in order, the head of `info`'s active list, the head of its
    /// free list, and a page from [`get_free_page`](Self::get_free_page).
    /// Returns false when none can be obtained.
    pub(crate) fn get_avail_page(&mut self, info: &mut RecInfo) -> bool {
        let page = if info.active_list.head().is_valid() {
            info.active_list.head()
        } else if info.free_list.head().is_valid() {
            info.free_list.head()
        } else {
            match self.get_free_page(info) {
                Some(page) => page,
                None => return false,
            }
        };
        self.set_curr_page(info, page);
        true
    }

    /// Evict `info`'s current page and make `new_page` current.
    ///
    /// The evicted page's cached free head and use count are written back,
    /// then it goes to the shared free list (empty, if the policy returns
    /// empty pages), or to `info`'s free, active or full list. `new_page`
    /// may be `Handle::NIL` to leave no page current.
    pub(crate) fn set_curr_page(&mut self, info: &mut RecInfo, new_page: Handle) {
        let old_page = info.curr_page;
        if old_page.is_valid() {
            let entry = self.directory.entry_mut(old_page);
            entry.free_rec = info.curr_free;
            entry.use_count = info.curr_use_count;

            let class = PageClass::of(info.curr_use_count, info.max_use_count);
            if class == PageClass::Empty && self.policy.return_empty_page(info) {
                self.return_page(info, old_page);
            } else {
                class.list(info).add_head(&mut self.directory, old_page);
            }
        }

        if new_page.is_valid() {
            let entry = *self.directory.entry(new_page);
            debug_assert_eq!(entry.type_id, info.type_id, "page {new_page} has another owner");
            info.curr_free = entry.free_rec;
            info.curr_use_count = entry.use_count;
            PageClass::of(entry.use_count, info.max_use_count)
                .list(info)
                .remove(&mut self.directory, new_page);
        } else {
            info.curr_free = Handle::NIL;
            info.curr_use_count = 0;
        }
        info.curr_page = new_page;
    }

    /// Return every page of `info` to the shared free list.
    ///
    /// # Errors
    /// `Error::PoolNotEmpty` if records are still seized and `force` is not
    /// set. Nothing is released in that case.
    pub(crate) fn free_all_rec_pages(&mut self, info: &mut RecInfo, force: bool) -> Result<()> {
        if info.total_use_count > 0 {
            if !force {
                return Err(Error::PoolNotEmpty {
                    in_use: info.total_use_count,
                });
            }
            warn!(
                type_id = info.type_id,
                in_use = info.total_use_count,
                "superpool.free.records_in_use"
            );
        }

        self.set_curr_page(info, Handle::NIL);

        let mut returned = 0u64;
        for list in [
            &mut info.free_list,
            &mut info.active_list,
            &mut info.full_list,
        ] {
            let mut cur = list.head();
            while cur.is_valid() {
                let next = self.directory.entry(cur).next;
                self.disown(cur);
                cur = next;
            }
            returned += u64::from(list.len());
            self.free_list.move_all(&mut self.directory, list);
        }

        info.total_rec_count = 0;
        info.total_use_count = 0;
        self.stats
            .pages_returned
            .fetch_add(returned, Ordering::Relaxed);

        debug!(type_id = info.type_id, pages = returned, "superpool.free");
        Ok(())
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Address of the record `handle` of `info`'s type.
    ///
    /// Validated by debug assertions only; see
    /// [`check_record`](Self::check_record).
    pub(crate) fn record_address(&self, info: &RecInfo, handle: Handle) -> *mut u8 {
        let (page_idx, rec_idx) = self.codec.decode(handle);
        let page = self.codec.page_of(handle);
        debug_assert!(self.codec.is_valid_page_index(page_idx), "bad handle {handle}");
        debug_assert!(rec_idx < info.max_use_count, "bad record index in {handle}");
        debug_assert_eq!(
            self.directory.check_code(page),
            HandleCodec::check_code(info.type_id),
            "{handle} read through the wrong record pool"
        );
        let addr = self.codec.address_of(page) + rec_idx as usize * info.record_size;
        addr as *mut u8
    }

    /// Check that `handle` names a record slot on a page `info` owns.
    ///
    /// Unlike the debug assertions in [`record_address`](Self::record_address)
    /// this runs in every build. It cannot tell a seized record from a free
    /// one.
    ///
    /// # Errors
    /// `Error::InvalidHandle` if the handle is NIL, out of range, or on a
    /// page owned by another type.
    pub fn check_record(&self, info: &RecInfo, handle: Handle) -> Result<()> {
        let (page_idx, rec_idx) = self.codec.decode(handle);
        let page = self.codec.page_of(handle);
        let owned = handle.is_valid()
            && self.codec.is_valid_page_index(page_idx)
            && rec_idx < info.max_use_count
            && self.directory.entry(page).type_id == info.type_id
            && self.directory.check_code(page) == HandleCodec::check_code(info.type_id);
        if owned {
            Ok(())
        } else {
            Err(Error::InvalidHandle(handle.0))
        }
    }

    /// Pop a record off `info`'s current page, switching pages on a miss.
    pub(crate) fn seize_record(&mut self, info: &mut RecInfo) -> Option<(Handle, *mut u8)> {
        if info.curr_free.is_nil() {
            PoolStats::bump(&self.stats.current_page_misses);
            if !self.get_avail_page(info) {
                return None;
            }
        } else {
            PoolStats::bump(&self.stats.current_page_hits);
        }
        debug_assert!(info.curr_free.is_valid(), "current page has no free record");

        let handle = info.curr_free;
        let slot = self.record_address(info, handle);
        // SAFETY: `handle` heads the current page's free list, so `slot` is an
        // unused record inside an area owned by this pool's source.
        info.curr_free = unsafe { read_link(slot) };
        info.curr_use_count += 1;
        info.total_use_count += 1;
        PoolStats::bump(&self.stats.seizes);
        Some((handle, slot))
    }

    /// Push `handle` back onto its page's free list.
    ///
    /// If the page is not current it is swapped in first; release traffic is
    /// usually page-local, so the swap is rare.
    ///
    /// # Errors
    /// - `Error::InvalidHandle` if `handle` is not a record slot of `info`
    /// - `Error::NotSeized` if the record is already free
    ///
    /// Nothing changes when an error is returned.
    pub(crate) fn release_record(&mut self, info: &mut RecInfo, handle: Handle) -> Result<()> {
        self.check_record(info, handle)?;
        let page = self.codec.page_of(handle);
        let (free_head, use_count) = if page == info.curr_page {
            (info.curr_free, info.curr_use_count)
        } else {
            let entry = self.directory.entry(page);
            (entry.free_rec, entry.use_count)
        };
        let on_chain = self.walk_free_chain(info, page, free_head, handle);
        if use_count == 0 || !matches!(on_chain, FreeChain::Len(_)) {
            return Err(Error::NotSeized(handle.0));
        }
        // SAFETY: `handle` was checked to be a seized record of `info`.
        unsafe { self.release_record_unchecked(info, handle) };
        Ok(())
    }

    /// [`release_record`](Self::release_record) without validation.
    ///
    /// # Safety
    /// `handle` must have been returned by [`seize_record`](Self::seize_record)
    /// for `info` and not released since.
    pub(crate) unsafe fn release_record_unchecked(&mut self, info: &mut RecInfo, handle: Handle) {
        debug_assert!(handle.is_valid(), "release of NIL");
        let page = self.codec.page_of(handle);
        if page != info.curr_page {
            PoolStats::bump(&self.stats.current_page_misses);
            self.set_curr_page(info, page);
        } else {
            PoolStats::bump(&self.stats.current_page_hits);
        }
        debug_assert!(info.curr_use_count > 0, "release on a page with no records in use");

        let slot = self.record_address(info, handle);
        // SAFETY: the caller seized `handle` from this type, so `slot` is a
        // record it no longer uses inside an area owned by the source.
        unsafe { write_link(slot, info.curr_free) };
        info.curr_free = handle;
        info.curr_use_count -= 1;
        info.total_use_count -= 1;
        PoolStats::bump(&self.stats.releases);
    }

    // ========================================================================
    // Verification
    // ========================================================================

    /// Check `info`'s lists, owner tags, use-count classes, free chains and
    /// counters.
    pub fn verify_rec_info(&self, info: &RecInfo) -> bool {
        let code = HandleCodec::check_code(info.type_id);
        let owned = |page: Handle| {
            self.directory.entry(page).type_id == info.type_id
                && self.directory.check_code(page) == code
        };

        let mut used = 0u64;
        let mut pages = 0u64;
        for (list, class) in [
            (&info.free_list, PageClass::Empty),
            (&info.active_list, PageClass::Partial),
            (&info.full_list, PageClass::Full),
        ] {
            if !list.verify(&self.directory) {
                return false;
            }
            for page in list.iter(&self.directory) {
                let entry = self.directory.entry(page);
                if !owned(page)
                    || PageClass::of(entry.use_count, info.max_use_count) != class
                    || !self.free_chain_matches(info, page, entry.free_rec, entry.use_count)
                {
                    return false;
                }
                used += u64::from(entry.use_count);
                pages += 1;
            }
        }

        if info.curr_page.is_valid() {
            if !owned(info.curr_page)
                || !self.free_chain_matches(info, info.curr_page, info.curr_free, info.curr_use_count)
            {
                return false;
            }
            used += u64::from(info.curr_use_count);
            pages += 1;
        }

        used == info.total_use_count && pages * u64::from(info.max_use_count) == info.total_rec_count
    }

    /// Check the shared free list links and that no page on it has an owner.
    pub fn verify_free_list(&self) -> bool {
        self.free_list.verify(&self.directory)
            && self.free_list.iter(&self.directory).all(|page| {
                self.directory.entry(page).is_free() && self.directory.check_code(page) == 0
            })
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Follow the embedded free chain of `page` from `head`, stopping at
    /// `target` if it is met.
    ///
    /// Every link is checked to stay on `page` before it is read, and the
    /// walk is bounded by the page's record count.
    fn walk_free_chain(
        &self,
        info: &RecInfo,
        page: Handle,
        head: Handle,
        target: Handle,
    ) -> FreeChain {
        let mut cur = head;
        let mut len = 0u32;
        while cur.is_valid() {
            if cur == target {
                return FreeChain::Contains;
            }
            if len >= info.max_use_count
                || self.codec.page_of(cur) != page
                || self.codec.record_index(cur) >= info.max_use_count
            {
                return FreeChain::Broken;
            }
            // SAFETY: `cur` is a record slot on `page`, which `info` owns.
            cur = unsafe { read_link(self.record_address(info, cur)) };
            len += 1;
        }
        FreeChain::Len(len)
    }

    fn free_chain_matches(&self, info: &RecInfo, page: Handle, head: Handle, use_count: u32) -> bool {
        matches!(
            self.walk_free_chain(info, page, head, Handle::NIL),
            FreeChain::Len(len) if len + use_count == info.max_use_count
        )
    }

    /// Thread a free list through every record slot of `page` and give the
    /// page to `info`.
    fn format_page(&mut self, info: &mut RecInfo, page: Handle) {
        let page_idx = self.codec.page_index(page);
        let base = self.codec.address_of(page);
        let max = info.max_use_count;

        for rec in 0..max {
            let next = if rec + 1 < max {
                self.codec.encode(page_idx, rec + 1)
            } else {
                Handle::NIL
            };
            let slot = (base + rec as usize * info.record_size) as *mut u8;
            // SAFETY: the page is unowned and `max * record_size <= page_size`,
            // so every slot lies inside the page.
            unsafe { write_link(slot, next) };
        }

        *self.directory.entry_mut(page) = PageEntry {
            type_id: info.type_id,
            free_rec: self.codec.encode(page_idx, 0),
            use_count: 0,
            prev: Handle::NIL,
            next: Handle::NIL,
        };
        self.directory
            .set_check_code(page, HandleCodec::check_code(info.type_id));
        info.free_list.add_head(&mut self.directory, page);
        info.total_rec_count += u64::from(max);

        PoolStats::bump(&self.stats.pages_formatted);
        trace!(type_id = info.type_id, %page, "superpool.format_page");
    }

    /// Give an empty page of `info` back to the shared free list.
    fn return_page(&mut self, info: &mut RecInfo, page: Handle) {
        self.disown(page);
        self.free_list.add_head(&mut self.directory, page);
        info.total_rec_count -= u64::from(info.max_use_count);
        PoolStats::bump(&self.stats.pages_returned);
    }

    /// Clear owner, free head, use count and check code. Links are kept.
    fn disown(&mut self, page: Handle) {
        let entry = self.directory.entry_mut(page);
        entry.type_id = 0;
        entry.free_rec = Handle::NIL;
        entry.use_count = 0;
        self.directory.set_check_code(page, 0);
    }
}

/// Store the next-free link in an unused record slot.
///
/// # Safety
/// `slot` must address an unused record of at least 4 bytes, 8-aligned,
/// inside memory owned by the pool.
#[inline]
unsafe fn write_link(slot: *mut u8, next: Handle) {
    slot.cast::<u32>().write(next.0);
}

/// Load the next-free link from an unused record slot.
///
/// # Safety
/// Same contract as [`write_link`]; the slot must hold a link.
#[inline]
unsafe fn read_link(slot: *const u8) -> Handle {
    Handle(slot.cast::<u32>().read())
}
