//! # Strata - Tiered Buffer Pool Allocator
//!
//! Strata is a tiered, sliced, lock-free buffer pool serving very frequent
//! allocate/release requests for variable-sized byte buffers in
//! high-throughput network I/O paths.
//!
//! ## Features
//!
//! - **Tiered size classes**: A small table of pools with power-of-two
//!   buffer sizes and deterministic class selection
//! - **Sliced striping**: Each class spreads requests across independent
//!   lock-free rings to keep contention low
//! - **No per-thread caches**: Buffers cross threads freely without
//!   fragmenting a size class onto one thread
//! - **Share-counted views**: Slice/duplicate/split views defer the return
//!   to the pool until the last holder is done
//! - **Bounded footprint**: Rings never grow; returns under pressure are
//!   dropped to the allocator instead of blocking
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              PooledBufferManager                │
//! ├─────────────────────────────────────────────────┤
//! │  Pool (4 KiB)  │  Pool (16 KiB)  │ Pool (64 KiB)│
//! │  slice slice…  │  slice slice…   │ slice slice… │
//! └─────────────────────────────────────────────────┘
//!           │                         │
//!           ▼                         ▼
//! ┌─────────────────┐    ┌─────────────────────────┐
//! │  PooledBuffer   │    │     CompositeBuffer     │
//! │  (fits a class) │    │  (beyond the largest)   │
//! └─────────────────┘    └─────────────────────────┘
//! ```
//!
//! Each slice is a bounded MPMC ring whose poll/offer indices pack a wrap
//! bit beside the slot number, letting a single compare-and-swap advance
//! position while still telling a full ring from an empty one.

// Core modules
pub mod buffers;
pub mod config;
pub mod error;
pub mod manager;
pub mod pool;
pub mod probe;

// Main API re-exports
pub use buffers::{Buffer, CompositeBuffer, PooledBuffer};
pub use config::{host, PoolManagerConfig, PoolManagerConfigBuilder};
pub use error::{Result, StrataError};
pub use manager::PooledBufferManager;
pub use pool::{Pool, PoolSlice, STRIDE};
pub use probe::{MemoryProbe, PoolStatsProbe, PoolStatsSnapshot, ProbeSet};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
