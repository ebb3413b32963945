//! Common types shared across the allocator.
//!
//! - Configuration constants and [`PoolConfig`]
//! - Error types
//! - [`Handle`] and the [`HandleCodec`]

pub mod config;
pub mod error;
mod handle;

pub use config::PoolConfig;
pub use error::{Error, Result};
pub use handle::{Handle, HandleCodec};
