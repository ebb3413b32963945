//! Page return policies.
//!
//! When a record pool's current page is evicted with no records seized,
//! the policy decides whether the page goes back to the super pool's shared
//! free list or stays on the record pool's own free list.
//!
//! - [`ReturnEmpty`] - return immediately ("pp2"), the default
//! - [`KeepEmpty`] - never return before the record pool is freed ("pp1")

use std::fmt;

use crate::pool::rec_info::RecInfo;

/// Decides the fate of empty pages.
pub trait PagePolicy: fmt::Debug {
    /// Whether an empty page evicted from `info` goes to the shared pool.
    fn return_empty_page(&self, info: &RecInfo) -> bool;
}

/// Return an empty page to the shared pool as soon as it is evicted.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReturnEmpty;

impl PagePolicy for ReturnEmpty {
    #[inline]
    fn return_empty_page(&self, _info: &RecInfo) -> bool {
        true
    }
}

/// Keep empty pages with their record pool until it is freed.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepEmpty;

impl PagePolicy for KeepEmpty {
    #[inline]
    fn return_empty_page(&self, _info: &RecInfo) -> bool {
        false
    }
}
