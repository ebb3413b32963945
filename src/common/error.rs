//! Error types for the pool allocator.

use thiserror::Error;

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All recoverable failures of the super pool and record pools.
///
/// Invariant violations (corrupt handles, check-code mismatches, broken
/// page lists) are programming errors and are caught by debug assertions
/// instead of being reported here.
#[derive(Debug, Error)]
pub enum Error {
    /// Construction parameters are out of range.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// The page directory, check array or backing memory could not be
    /// allocated.
    #[error("failed to allocate {bytes} bytes")]
    AllocationFailed { bytes: usize },

    /// No free page is available and the pool cannot grow.
    #[error("pool exhausted: no page available")]
    OutOfMemory,

    /// A non-forced free was requested while records are still seized.
    #[error("record pool still has {in_use} records in use")]
    PoolNotEmpty { in_use: u64 },

    /// A handle that does not address a record of this pool.
    #[error("invalid handle: {0:#010x}")]
    InvalidHandle(u32),

    /// Release of a record that is already free.
    #[error("record {0:#010x} is not seized")]
    NotSeized(u32),

    /// Every record type id has been handed out.
    #[error("record type ids exhausted")]
    TypeIdsExhausted,
}
