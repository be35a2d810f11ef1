//! Size classes and their lock-free ring slices
//!
//! A pool is one size class; it stripes allocation requests across a set of
//! independent bounded rings so concurrent callers rarely touch the same
//! atomics.

pub mod padded;
pub mod size_class;
pub mod slice;

// Re-export main types
pub use size_class::Pool;
pub use slice::{PoolSlice, STRIDE};
