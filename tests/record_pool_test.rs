//! Record Pool Tests
//!
//! Seize/release behavior of record pools on a heap-backed super pool,
//! including the current-page swap on release.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use superpool::{Error, Handle, HeapPool, KeepEmpty, PoolConfig, RecordPool, SharedPool};

const PAGE_SIZE: usize = 4096;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
struct Node {
    id: u64,
    parent: u32,
    depth: u32,
    weights: [f64; 6],
}

fn shared(init_pages: usize, incr_pages: usize) -> SharedPool {
    let config = PoolConfig::new(PAGE_SIZE, 20)
        .with_init_size(init_pages * PAGE_SIZE)
        .with_incr_size(incr_pages * PAGE_SIZE);
    Rc::new(RefCell::new(HeapPool::new(config).unwrap()))
}

fn page_of(pool: &SharedPool, handle: Handle) -> Handle {
    pool.borrow().codec().page_of(handle)
}

// ============================================================================
// Seize
// ============================================================================

/// 64-byte records on 4K pages: 64 per page, then a fresh page.
#[test]
fn test_sixty_fifth_seize_takes_new_page() {
    let pool = shared(2, 0);
    let mut nodes: RecordPool<Node> = RecordPool::new(Rc::clone(&pool)).unwrap();
    assert_eq!(nodes.max_use_count(), 64);

    let mut handles = HashSet::new();
    for _ in 0..64 {
        assert!(handles.insert(nodes.seize().unwrap().handle));
    }
    let first_page = nodes.info().current_page();
    assert!(handles.iter().all(|&h| page_of(&pool, h) == first_page));

    let rec = nodes.seize().unwrap();
    assert!(!handles.contains(&rec.handle));
    assert_ne!(page_of(&pool, rec.handle), first_page);
    assert_eq!(nodes.page_count(), 2);
    assert_eq!(nodes.info().full_list().head(), first_page);
    assert!(nodes.verify());
}

#[test]
fn test_records_do_not_overlap() {
    let pool = shared(4, 0);
    let mut nodes: RecordPool<Node> = RecordPool::new(pool).unwrap();

    let recs: Vec<_> = (0..150).map(|_| nodes.seize().unwrap()).collect();
    for (n, rec) in recs.iter().enumerate() {
        let node = Node {
            id: n as u64,
            parent: n as u32 / 2,
            depth: 0,
            weights: [n as f64; 6],
        };
        unsafe { rec.ptr.write(node) };
    }
    for (n, rec) in recs.iter().enumerate() {
        let node = unsafe { *nodes.get_ptr(rec.handle) };
        assert_eq!(node.id, n as u64);
        assert_eq!(node.weights, [n as f64; 6]);
    }
}

#[test]
fn test_seize_fails_when_exhausted() {
    let pool = shared(1, 0);
    let mut pages: RecordPool<[u8; PAGE_SIZE]> = RecordPool::new(pool).unwrap();

    let rec = pages.seize().unwrap();
    assert!(matches!(pages.seize(), Err(Error::OutOfMemory)));

    // Releasing makes room again.
    pages.release(rec.handle).unwrap();
    assert!(pages.seize().is_ok());
}

// ============================================================================
// Release and the current page
// ============================================================================

/// Releasing into a page other than the current one evicts the current page
/// onto the list its use count calls for.
#[test]
fn test_release_evicts_current_page_by_use_count() {
    let pool = shared(4, 0);
    let mut nodes: RecordPool<Node> = RecordPool::new(Rc::clone(&pool)).unwrap();

    let on_a: Vec<Handle> = (0..64).map(|_| nodes.seize().unwrap().handle).collect();
    let page_a = page_of(&pool, on_a[0]);
    let b0 = nodes.seize().unwrap().handle;
    let page_b = page_of(&pool, b0);

    // B has one record in use: it goes to the active list.
    nodes.release(on_a[0]).unwrap();
    assert_eq!(nodes.info().current_page(), page_a);
    assert_eq!(nodes.info().active_list().head(), page_b);
    assert!(nodes.info().full_list().is_empty());
    assert!(nodes.verify());

    // Refill A; releasing B's record evicts the full page A.
    assert_eq!(nodes.seize().unwrap().handle, on_a[0]);
    nodes.release(b0).unwrap();
    assert_eq!(nodes.info().current_page(), page_b);
    assert_eq!(nodes.info().full_list().head(), page_a);
    assert!(nodes.info().active_list().is_empty());
    assert!(nodes.verify());

    // B is now empty: evicting it hands it back to the super pool.
    let free_before = pool.borrow().free_page_count();
    nodes.release(on_a[1]).unwrap();
    assert_eq!(nodes.info().current_page(), page_a);
    assert_eq!(pool.borrow().free_page_count(), free_before + 1);
    assert_eq!(pool.borrow().free_list().head(), page_b);
    assert_eq!(nodes.page_count(), 1);
    assert!(nodes.verify());
}

#[test]
fn test_keep_empty_policy_retains_pages() {
    let pool = shared(4, 0);
    pool.borrow_mut().set_policy(Box::new(KeepEmpty));
    let mut nodes: RecordPool<Node> = RecordPool::new(Rc::clone(&pool)).unwrap();

    let on_a: Vec<Handle> = (0..64).map(|_| nodes.seize().unwrap().handle).collect();
    let b0 = nodes.seize().unwrap().handle;
    let page_b = page_of(&pool, b0);

    nodes.release(b0).unwrap();
    nodes.release(on_a[0]).unwrap();

    assert_eq!(pool.borrow().free_page_count(), 0);
    assert_eq!(nodes.info().free_list().head(), page_b);
    assert_eq!(nodes.page_count(), 2);
    assert!(nodes.verify());
}

// ============================================================================
// Free
// ============================================================================

#[test]
fn test_free_then_reuse_across_types() {
    let pool = shared(3, 0);
    let mut nodes: RecordPool<Node> = RecordPool::new(Rc::clone(&pool)).unwrap();
    let mut ints: RecordPool<u32> = RecordPool::new(Rc::clone(&pool)).unwrap();

    for _ in 0..192 {
        nodes.seize().unwrap();
    }
    assert!(matches!(ints.seize(), Err(Error::OutOfMemory)));

    nodes.free(true).unwrap();
    assert_eq!(nodes.use_count(), 0);
    assert_eq!(pool.borrow().free_page_count(), 3);

    let h = ints.seize().unwrap().handle;
    assert_eq!(pool.borrow().page_entry(h).type_id, ints.type_id());
    assert!(ints.verify());
    assert!(nodes.verify());
}

#[test]
fn test_free_twice() {
    let pool = shared(2, 0);
    let mut nodes: RecordPool<Node> = RecordPool::new(Rc::clone(&pool)).unwrap();
    nodes.seize().unwrap();

    nodes.free(true).unwrap();
    nodes.free(true).unwrap();
    nodes.free(false).unwrap();
    assert_eq!(pool.borrow().free_page_count(), 1);
    assert!(pool.borrow().verify_free_list());
}

/// Every page in use has exactly one owner.
#[test]
fn test_pages_have_one_owner() {
    let pool = shared(8, 0);
    let mut a: RecordPool<Node> = RecordPool::new(Rc::clone(&pool)).unwrap();
    let mut b: RecordPool<[u64; 4]> = RecordPool::new(Rc::clone(&pool)).unwrap();

    let mut pages_a = HashSet::new();
    let mut pages_b = HashSet::new();
    for round in 0..200 {
        pages_a.insert(page_of(&pool, a.seize().unwrap().handle));
        if round % 2 == 0 {
            pages_b.insert(page_of(&pool, b.seize().unwrap().handle));
        }
    }

    assert!(pages_a.is_disjoint(&pages_b));
    let sp = pool.borrow();
    assert!(pages_a.iter().all(|&p| sp.page_entry(p).type_id == a.type_id()));
    assert!(pages_b.iter().all(|&p| sp.page_entry(p).type_id == b.type_id()));
    drop(sp);
    assert!(a.verify());
    assert!(b.verify());
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "wrong record pool")]
fn test_foreign_handle_caught_in_debug() {
    let pool = shared(2, 0);
    let mut a: RecordPool<Node> = RecordPool::new(Rc::clone(&pool)).unwrap();
    let b: RecordPool<[u8; 64]> = RecordPool::new(Rc::clone(&pool)).unwrap();

    let h = a.seize().unwrap().handle;
    let _ = b.get_ptr(h);
}
