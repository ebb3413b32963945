//! Per-record-type bookkeeping.

use crate::common::Handle;
use crate::pool::page_list::PageList;

/// Bookkeeping block of one record pool.
///
/// Pages owned by the type sit on exactly one of three lists, keyed by
/// use count: `free_list` (none seized), `active_list` (some seized, room
/// left) and `full_list` (no room). At most one further page is detached
/// as the *current* page, whose free-list head and use count are cached
/// here instead of in the page directory.
#[derive(Debug)]
pub struct RecInfo {
    pub(crate) type_id: u32,
    pub(crate) record_size: usize,
    pub(crate) max_use_count: u32,

    pub(crate) curr_page: Handle,
    pub(crate) curr_free: Handle,
    pub(crate) curr_use_count: u32,

    /// Records seized across all pages of the type.
    pub(crate) total_use_count: u64,
    /// Record capacity of all pages the type owns.
    pub(crate) total_rec_count: u64,

    pub(crate) free_list: PageList,
    pub(crate) active_list: PageList,
    pub(crate) full_list: PageList,
}

impl RecInfo {
    pub(crate) fn new(type_id: u32, record_size: usize, max_use_count: u32) -> Self {
        debug_assert!(type_id != 0, "type id 0 marks unowned pages");
        Self {
            type_id,
            record_size,
            max_use_count,
            curr_page: Handle::NIL,
            curr_free: Handle::NIL,
            curr_use_count: 0,
            total_use_count: 0,
            total_rec_count: 0,
            free_list: PageList::new(),
            active_list: PageList::new(),
            full_list: PageList::new(),
        }
    }

    #[inline]
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    #[inline]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    #[inline]
    pub fn max_use_count(&self) -> u32 {
        self.max_use_count
    }

    #[inline]
    pub fn current_page(&self) -> Handle {
        self.curr_page
    }

    #[inline]
    pub fn total_use_count(&self) -> u64 {
        self.total_use_count
    }

    #[inline]
    pub fn total_rec_count(&self) -> u64 {
        self.total_rec_count
    }

    pub fn free_list(&self) -> &PageList {
        &self.free_list
    }

    pub fn active_list(&self) -> &PageList {
        &self.active_list
    }

    pub fn full_list(&self) -> &PageList {
        &self.full_list
    }

    /// Pages owned by the type, the current page included.
    pub fn page_count(&self) -> u32 {
        self.free_list.len()
            + self.active_list.len()
            + self.full_list.len()
            + u32::from(self.curr_page.is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rec_info_new() {
        let info = RecInfo::new(3, 64, 64);
        assert_eq!(info.type_id(), 3);
        assert_eq!(info.record_size(), 64);
        assert_eq!(info.max_use_count(), 64);
        assert!(info.current_page().is_nil());
        assert_eq!(info.page_count(), 0);
        assert_eq!(info.total_use_count(), 0);
        assert!(info.free_list().is_empty());
    }
}
