//! Page and record pools.
//!
//! A super pool owns a flat directory of fixed-size pages and lends them to
//! record pools, each of which carves its pages into records of one size.
//!
//! # Components
//! - [`SuperPool`] - The shared page allocator
//! - [`PageSource`] - Where brand-new pages come from
//! - [`HeapPool`] / [`HeapArena`] - A super pool backed by heap areas
//! - [`RecordPool`] - Typed fixed-size record allocator
//! - [`PagePolicy`] - What happens to pages that become empty
//! - [`PoolStats`] - Allocation statistics

mod heap_pool;
mod page_directory;
mod page_list;
pub mod policy;
mod rec_info;
mod record_pool;
mod stats;
mod super_pool;

pub use heap_pool::{Area, HeapArena, HeapPool};
pub use page_directory::{CheckBits, PageDirectory, PageEntry};
pub use page_list::{PageList, PageListIter};
pub use policy::{KeepEmpty, PagePolicy, ReturnEmpty};
pub use rec_info::RecInfo;
pub use record_pool::{RecordPool, RecordPtr, SharedPool};
pub use stats::{PoolStats, StatsSnapshot};
pub use super_pool::{PageSource, SuperPool};
