//! Record Pool - fixed-size records of one type.
//!
//! A [`RecordPool<T>`] seizes and releases `T`-sized records on pages of a
//! shared super pool and names them by [`Handle`]. Records are raw storage:
//! the pool never reads a seized record and never runs `T`'s destructor.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;

use tracing::warn;

use crate::common::config::{round_up, RECORD_ALIGN};
use crate::common::{Error, Handle, Result};
use crate::pool::heap_pool::HeapArena;
use crate::pool::rec_info::RecInfo;
use crate::pool::super_pool::{PageSource, SuperPool};

/// A super pool shared by the record pools built on it.
pub type SharedPool<S = HeapArena> = Rc<RefCell<SuperPool<S>>>;

/// A seized record: its handle and its address.
pub struct RecordPtr<T> {
    pub handle: Handle,
    pub ptr: *mut T,
}

impl<T> Clone for RecordPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RecordPtr<T> {}

impl<T> fmt::Debug for RecordPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordPtr")
            .field("handle", &self.handle)
            .field("ptr", &self.ptr)
            .finish()
    }
}

/// Allocator of `T`-sized records on a shared super pool.
///
/// # Usage
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use superpool::{HeapPool, PoolConfig, RecordPool};
///
/// let pool = Rc::new(RefCell::new(
///     HeapPool::new(PoolConfig::new(4096, 20).with_init_size(16 * 4096)).unwrap(),
/// ));
/// let mut rows: RecordPool<[u64; 8]> = RecordPool::new(Rc::clone(&pool)).unwrap();
///
/// let rec = rows.seize().unwrap();
/// unsafe { rec.ptr.write([7; 8]) };
/// assert_eq!(unsafe { *rows.get_ptr(rec.handle) }, [7; 8]);
/// rows.release(rec.handle).unwrap();
/// ```
///
/// # Thread Safety
/// `RecordPool` is neither `Send` nor `Sync`. All record pools over one
/// super pool must stay on one thread.
///
/// # Drop
/// Dropping a record pool returns its pages to the super pool. If the super
/// pool is borrowed at that moment (a `Ref` or `RefMut` from
/// [`super_pool`](Self::super_pool) is alive), the pages cannot be returned:
/// they stay tagged with the dropped pool's type id and are leaked for the
/// life of the super pool. Call [`free`](Self::free) first to avoid this.
pub struct RecordPool<T, S: PageSource = HeapArena> {
    pool: SharedPool<S>,
    info: RecInfo,
    _marker: PhantomData<*mut T>,
}

impl<T, S: PageSource> RecordPool<T, S> {
    /// Register a new record type with `pool`.
    ///
    /// The record size is `size_of::<T>()` widened to hold a free-list link
    /// and rounded up to 8 bytes.
    ///
    /// # Errors
    /// `Error::InvalidConfig` if `T` needs more than 8-byte alignment or does
    /// not fit in a page.
    pub fn new(pool: SharedPool<S>) -> Result<Self> {
        if mem::align_of::<T>() > RECORD_ALIGN {
            return Err(Error::InvalidConfig(format!(
                "record alignment {} exceeds {}",
                mem::align_of::<T>(),
                RECORD_ALIGN
            )));
        }
        let record_size = round_up(mem::size_of::<T>().max(mem::size_of::<u32>()), RECORD_ALIGN);

        let info = {
            let mut sp = pool.borrow_mut();
            let per_page = sp.config().page_size / record_size;
            let max_use_count = per_page.min(sp.codec().max_records_per_page() as usize) as u32;
            if max_use_count == 0 {
                return Err(Error::InvalidConfig(format!(
                    "record size {} exceeds page size {}",
                    record_size,
                    sp.config().page_size
                )));
            }
            RecInfo::new(sp.next_type_id()?, record_size, max_use_count)
        };

        Ok(Self {
            pool,
            info,
            _marker: PhantomData,
        })
    }

    /// Take a free record.
    ///
    /// The record's contents are unspecified; write it before reading.
    ///
    /// # Errors
    /// `Error::OutOfMemory` if no page can be obtained.
    pub fn seize(&mut self) -> Result<RecordPtr<T>> {
        let (handle, ptr) = self
            .pool
            .borrow_mut()
            .seize_record(&mut self.info)
            .ok_or(Error::OutOfMemory)?;
        Ok(RecordPtr {
            handle,
            ptr: ptr.cast(),
        })
    }

    /// Give back a record seized from this pool.
    ///
    /// The handle is checked against the page's owner and its free chain,
    /// so the cost grows with the number of free records on the page.
    ///
    /// # Errors
    /// - `Error::InvalidHandle` if `handle` is not a record of this pool
    /// - `Error::NotSeized` if the record was already released
    pub fn release(&mut self, handle: Handle) -> Result<()> {
        self.pool.borrow_mut().release_record(&mut self.info, handle)
    }

    /// Give back a record without validating the handle.
    ///
    /// # Safety
    /// `handle` must have been returned by [`seize`](Self::seize) on this
    /// pool and not released since. Anything else corrupts the page's free
    /// chain.
    pub unsafe fn release_unchecked(&mut self, handle: Handle) {
        // SAFETY: forwarded from the caller.
        unsafe {
            self.pool
                .borrow_mut()
                .release_record_unchecked(&mut self.info, handle)
        };
    }

    /// Address of a record seized from this pool.
    pub fn get_ptr(&self, handle: Handle) -> *mut T {
        self.pool.borrow().record_address(&self.info, handle).cast()
    }

    /// Address of a record, validating the handle in every build.
    ///
    /// # Errors
    /// `Error::InvalidHandle` if `handle` is not on a page of this pool.
    pub fn try_get_ptr(&self, handle: Handle) -> Result<*mut T> {
        let sp = self.pool.borrow();
        sp.check_record(&self.info, handle)?;
        Ok(sp.record_address(&self.info, handle).cast())
    }

    /// Pair a handle with its address.
    pub fn record(&self, handle: Handle) -> RecordPtr<T> {
        RecordPtr {
            handle,
            ptr: self.get_ptr(handle),
        }
    }

    /// Return every page to the super pool.
    ///
    /// Safe to call repeatedly; a second call finds nothing to return.
    ///
    /// # Errors
    /// `Error::PoolNotEmpty` if records are in use and `force` is false.
    pub fn free(&mut self, force: bool) -> Result<()> {
        self.pool
            .borrow_mut()
            .free_all_rec_pages(&mut self.info, force)
    }

    /// Check page lists, owners and counters of this pool.
    pub fn verify(&self) -> bool {
        self.pool.borrow().verify_rec_info(&self.info)
    }

    // ========================================================================
    // Info
    // ========================================================================

    pub fn info(&self) -> &RecInfo {
        &self.info
    }

    pub fn type_id(&self) -> u32 {
        self.info.type_id()
    }

    pub fn record_size(&self) -> usize {
        self.info.record_size()
    }

    /// Records per page.
    pub fn max_use_count(&self) -> u32 {
        self.info.max_use_count()
    }

    /// Records currently seized.
    pub fn use_count(&self) -> u64 {
        self.info.total_use_count()
    }

    /// Pages currently owned.
    pub fn page_count(&self) -> u32 {
        self.info.page_count()
    }

    pub fn super_pool(&self) -> &SharedPool<S> {
        &self.pool
    }
}

impl<T, S: PageSource> Drop for RecordPool<T, S> {
    fn drop(&mut self) {
        let Ok(mut sp) = self.pool.try_borrow_mut() else {
            warn!(
                type_id = self.info.type_id(),
                pages = self.info.page_count(),
                "recordpool.drop.pages_leaked"
            );
            return;
        };
        // Forced, so this cannot fail.
        let _ = sp.free_all_rec_pages(&mut self.info, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HeapPool, PoolConfig};
    use std::collections::HashSet;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Row {
        key: u64,
        payload: [u64; 7],
    }

    fn shared(init_pages: usize, incr_pages: usize) -> SharedPool {
        let config = PoolConfig::new(4096, 20)
            .with_init_size(init_pages * 4096)
            .with_incr_size(incr_pages * 4096);
        Rc::new(RefCell::new(HeapPool::new(config).unwrap()))
    }

    #[test]
    fn test_record_geometry() {
        let pool = shared(1, 0);
        let rows: RecordPool<Row> = RecordPool::new(Rc::clone(&pool)).unwrap();
        assert_eq!(rows.record_size(), 64);
        assert_eq!(rows.max_use_count(), 64);

        // Tiny records still hold a link.
        let bytes: RecordPool<u8> = RecordPool::new(Rc::clone(&pool)).unwrap();
        assert_eq!(bytes.record_size(), 8);
        assert_eq!(bytes.max_use_count(), 512);
        assert_ne!(rows.type_id(), bytes.type_id());
    }

    #[test]
    fn test_oversized_record_rejected() {
        let pool = shared(1, 0);
        let result: Result<RecordPool<[u8; 5000]>> = RecordPool::new(pool);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_overaligned_record_rejected() {
        #[repr(align(64))]
        struct Wide(#[allow(dead_code)] u8);

        let pool = shared(1, 0);
        let result: Result<RecordPool<Wide>> = RecordPool::new(pool);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_seize_write_read_release() {
        let pool = shared(2, 0);
        let mut rows: RecordPool<Row> = RecordPool::new(pool).unwrap();

        let rec = rows.seize().unwrap();
        let row = Row {
            key: 42,
            payload: [9; 7],
        };
        unsafe { rec.ptr.write(row) };
        assert_eq!(unsafe { *rows.get_ptr(rec.handle) }, row);
        assert_eq!(rows.record(rec.handle).ptr, rec.ptr);
        assert_eq!(rows.use_count(), 1);

        rows.release(rec.handle).unwrap();
        assert_eq!(rows.use_count(), 0);
        assert!(rows.verify());
    }

    #[test]
    fn test_try_get_ptr_rejects_foreign_handles() {
        let pool = shared(2, 0);
        let mut rows: RecordPool<Row> = RecordPool::new(Rc::clone(&pool)).unwrap();
        let mut other: RecordPool<Row> = RecordPool::new(Rc::clone(&pool)).unwrap();

        let mine = rows.seize().unwrap();
        let theirs = other.seize().unwrap();
        assert_eq!(rows.try_get_ptr(mine.handle).unwrap(), mine.ptr);
        assert!(matches!(
            rows.try_get_ptr(theirs.handle),
            Err(Error::InvalidHandle(raw)) if raw == theirs.handle.0
        ));
        assert!(matches!(rows.try_get_ptr(Handle::NIL), Err(Error::InvalidHandle(_))));
    }

    #[test]
    fn test_page_capacity() {
        let pool = shared(1, 0);
        let mut rows: RecordPool<Row> = RecordPool::new(pool).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..64 {
            assert!(seen.insert(rows.seize().unwrap().handle));
        }
        assert!(matches!(rows.seize(), Err(Error::OutOfMemory)));
        assert_eq!(rows.page_count(), 1);
        assert!(rows.verify());
    }

    #[test]
    fn test_released_record_is_reused_first() {
        let pool = shared(1, 0);
        let mut rows: RecordPool<Row> = RecordPool::new(pool).unwrap();

        let a = rows.seize().unwrap();
        let _b = rows.seize().unwrap();
        rows.release(a.handle).unwrap();
        assert_eq!(rows.seize().unwrap().handle, a.handle);
    }

    #[test]
    fn test_double_release_rejected() {
        let pool = shared(1, 0);
        let mut rows: RecordPool<Row> = RecordPool::new(pool).unwrap();

        let a = rows.seize().unwrap().handle;
        let b = rows.seize().unwrap().handle;
        rows.release(a).unwrap();
        assert!(matches!(rows.release(a), Err(Error::NotSeized(raw)) if raw == a.0));
        assert_eq!(rows.use_count(), 1);

        let x = rows.seize().unwrap().handle;
        let y = rows.seize().unwrap().handle;
        assert_eq!(x, a);
        assert_ne!(x, y);
        assert_ne!(y, b);
        assert_eq!(rows.use_count(), 3);
        assert!(rows.verify());
    }

    #[test]
    fn test_release_before_root_is_fixed() {
        // No initial size: nothing is reserved and the memory root is unset.
        let pool = shared(0, 0);
        assert!(pool.borrow().codec().memory_root().is_none());
        let mut rows: RecordPool<Row> = RecordPool::new(Rc::clone(&pool)).unwrap();

        let stray = pool.borrow().codec().encode(3, 0);
        assert!(matches!(rows.release(stray), Err(Error::InvalidHandle(_))));
        assert!(matches!(rows.try_get_ptr(stray), Err(Error::InvalidHandle(_))));
        assert_eq!(rows.use_count(), 0);
    }

    #[test]
    fn test_release_unchecked() {
        let pool = shared(1, 0);
        let mut rows: RecordPool<Row> = RecordPool::new(pool).unwrap();

        let a = rows.seize().unwrap().handle;
        unsafe { rows.release_unchecked(a) };
        assert_eq!(rows.use_count(), 0);
        assert_eq!(rows.seize().unwrap().handle, a);
        assert!(rows.verify());
    }

    #[test]
    fn test_free_requires_empty_unless_forced() {
        let pool = shared(2, 0);
        let mut rows: RecordPool<Row> = RecordPool::new(Rc::clone(&pool)).unwrap();

        let rec = rows.seize().unwrap();
        assert!(matches!(rows.free(false), Err(Error::PoolNotEmpty { in_use: 1 })));

        rows.release(rec.handle).unwrap();
        rows.free(false).unwrap();
        assert_eq!(rows.page_count(), 0);
        assert_eq!(pool.borrow().free_page_count(), 1);
    }

    #[test]
    fn test_drop_returns_pages() {
        let pool = shared(4, 0);
        {
            let mut rows: RecordPool<Row> = RecordPool::new(Rc::clone(&pool)).unwrap();
            for _ in 0..130 {
                rows.seize().unwrap();
            }
            assert_eq!(rows.page_count(), 3);
        }
        let sp = pool.borrow();
        assert_eq!(sp.free_page_count(), 3);
        assert!(sp.verify_free_list());
    }

    #[test]
    fn test_drop_while_borrowed_leaks_pages() {
        let pool = shared(2, 0);
        let mut rows: RecordPool<Row> = RecordPool::new(Rc::clone(&pool)).unwrap();
        let h = rows.seize().unwrap().handle;
        let type_id = rows.type_id();

        {
            let _guard = pool.borrow();
            drop(rows);
        }

        let sp = pool.borrow();
        assert_eq!(sp.free_page_count(), 0);
        assert_eq!(sp.page_entry(h).type_id, type_id);
    }

    #[test]
    fn test_free_before_drop_avoids_leak() {
        let pool = shared(2, 0);
        let mut rows: RecordPool<Row> = RecordPool::new(Rc::clone(&pool)).unwrap();
        rows.seize().unwrap();
        rows.free(true).unwrap();

        {
            let _guard = pool.borrow();
            drop(rows);
        }
        assert_eq!(pool.borrow().free_page_count(), 1);
    }
}
