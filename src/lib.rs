//! superpool - A page-based slab allocator with handle-addressed record pools.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  RecordPool<A>   RecordPool<B>   RecordPool<C>    (one per type)│
//! │   seize / release / get_ptr by 32-bit Handle                    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                     SuperPool<S> (pool/)                        │
//! │   page directory + check codes │ shared free-page list          │
//! │   page return policy           │ statistics                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                  PageSource: HeapArena                          │
//! │      areas reserved with std::alloc, grown on demand            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A [`Handle`] packs a signed page index (relative to the first area) and a
//! record index into 32 bits, so records can be stored compactly and turned
//! back into addresses without a hash lookup.
//!
//! # Modules
//! - [`common`] - Shared primitives (Handle, HandleCodec, Error, config)
//! - [`pool`] - Super pool, heap areas and record pools
//!
//! # Quick Start
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use superpool::{Handle, HeapPool, PoolConfig, RecordPool};
//!
//! let config = PoolConfig::new(4096, 20)
//!     .with_init_size(1 << 20)
//!     .with_incr_size(1 << 20);
//! let pool = Rc::new(RefCell::new(HeapPool::new(config).unwrap()));
//!
//! let mut nodes: RecordPool<[u32; 4]> = RecordPool::new(Rc::clone(&pool)).unwrap();
//! let rec = nodes.seize().unwrap();
//! unsafe { rec.ptr.write([1, 2, 3, 4]) };
//!
//! let handle: Handle = rec.handle;
//! assert_eq!(unsafe { *nodes.get_ptr(handle) }, [1, 2, 3, 4]);
//! nodes.release(handle).unwrap();
//!
//! println!("{}", pool.borrow().stats().snapshot());
//! ```

pub mod common;
pub mod pool;

// Re-export commonly used items at crate root for convenience
pub use common::config::{DEFAULT_PAGE_BITS, DEFAULT_PAGE_SIZE};
pub use common::{Error, Handle, HandleCodec, PoolConfig, Result};

pub use pool::{
    HeapArena, HeapPool, KeepEmpty, PagePolicy, PageSource, PoolStats, RecordPool, RecordPtr,
    ReturnEmpty, SharedPool, StatsSnapshot, SuperPool,
};
