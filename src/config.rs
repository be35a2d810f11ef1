//! Pool manager configuration and host environment queries

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Default size of the smallest buffer class (4 KiB)
pub const DEFAULT_BASE_BUFFER_SIZE: usize = 4 * 1024;

/// Default number of size classes
pub const DEFAULT_NUMBER_OF_POOLS: usize = 3;

/// Default growth factor; each class is 2^factor times the previous one
pub const DEFAULT_GROWTH_FACTOR: u32 = 2;

/// Default share of the heap budgeted across all pools
pub const DEFAULT_HEAP_FRACTION: f64 = 0.10;

/// Configuration for a [`PooledBufferManager`](crate::manager::PooledBufferManager)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolManagerConfig {
    /// Size of the smallest buffer class in bytes; must be a power of two
    pub base_buffer_size: usize,
    /// Number of size classes
    pub number_of_pools: usize,
    /// Buffer size multiplier exponent between classes (size * 2^factor)
    pub growth_factor: u32,
    /// Number of independent ring slices each class stripes requests across
    pub slices_per_pool: usize,
    /// Share of the heap budgeted for all pools combined, in (0, 1)
    pub heap_fraction: f64,
    /// Fail fast on a transiently empty slot instead of spinning for the
    /// in-flight counterpart to finish
    pub skip_buffer_wait_loop: bool,
    /// Heap size used for the pool budget; `None` queries the host
    pub max_heap_bytes: Option<u64>,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        Self {
            base_buffer_size: DEFAULT_BASE_BUFFER_SIZE,
            number_of_pools: DEFAULT_NUMBER_OF_POOLS,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            slices_per_pool: host::available_processors(),
            heap_fraction: DEFAULT_HEAP_FRACTION,
            skip_buffer_wait_loop: false,
            max_heap_bytes: None,
        }
    }
}

impl PoolManagerConfig {
    /// Create a configuration with the crate defaults
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the base buffer size
    pub fn with_base_buffer_size(mut self, size: usize) -> Self {
        self.base_buffer_size = size;
        self
    }

    /// Set the number of size classes
    pub fn with_number_of_pools(mut self, pools: usize) -> Self {
        self.number_of_pools = pools;
        self
    }

    /// Set the growth factor
    pub fn with_growth_factor(mut self, factor: u32) -> Self {
        self.growth_factor = factor;
        self
    }

    /// Set the number of slices per pool
    pub fn with_slices_per_pool(mut self, slices: usize) -> Self {
        self.slices_per_pool = slices;
        self
    }

    /// Set the heap fraction
    pub fn with_heap_fraction(mut self, fraction: f64) -> Self {
        self.heap_fraction = fraction;
        self
    }

    /// Enable or disable the slot-wait fast-fail path
    pub fn with_skip_buffer_wait_loop(mut self, skip: bool) -> Self {
        self.skip_buffer_wait_loop = skip;
        self
    }

    /// Pin the heap size used for the pool budget
    pub fn with_max_heap_bytes(mut self, bytes: u64) -> Self {
        self.max_heap_bytes = Some(bytes);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_buffer_size == 0 {
            return Err(StrataError::invalid_parameter(
                "base_buffer_size",
                "must be greater than zero",
            ));
        }
        if !self.base_buffer_size.is_power_of_two() {
            return Err(StrataError::invalid_parameter(
                "base_buffer_size",
                "must be a power of two",
            ));
        }
        if self.number_of_pools == 0 {
            return Err(StrataError::invalid_parameter(
                "number_of_pools",
                "must be greater than zero",
            ));
        }
        if self.number_of_pools > 1 && self.growth_factor == 0 {
            return Err(StrataError::invalid_parameter(
                "growth_factor",
                "must be greater than zero when more than one pool is configured",
            ));
        }
        if self.growth_factor != 0 && !self.growth_factor.is_power_of_two() {
            return Err(StrataError::invalid_parameter(
                "growth_factor",
                "must be a power of two",
            ));
        }
        if self.slices_per_pool == 0 {
            return Err(StrataError::invalid_parameter(
                "slices_per_pool",
                "must be greater than zero",
            ));
        }
        if self.heap_fraction <= 0.0 || self.heap_fraction >= 1.0 {
            return Err(StrataError::invalid_parameter(
                "heap_fraction",
                "must be greater than zero and less than 1",
            ));
        }

        // The largest class size must stay addressable; each class shifts
        // the base size left by the growth factor.
        let total_shift = self.growth_factor as usize * (self.number_of_pools - 1);
        if total_shift >= usize::BITS as usize
            || self.base_buffer_size.checked_shl(total_shift as u32).is_none()
        {
            return Err(StrataError::invalid_parameter(
                "number_of_pools",
                "largest buffer size overflows with this base size and growth factor",
            ));
        }

        Ok(())
    }

    /// Heap size the pool budget is computed from
    pub fn effective_heap_bytes(&self) -> u64 {
        self.max_heap_bytes.unwrap_or_else(host::max_heap_bytes)
    }

    /// Memory budget for a single pool
    pub fn memory_per_pool(&self) -> u64 {
        (self.effective_heap_bytes() as f64 * self.heap_fraction / self.number_of_pools as f64)
            as u64
    }

    /// Buffer size of class `index`
    pub fn buffer_size_for(&self, index: usize) -> usize {
        self.base_buffer_size << (self.growth_factor as usize * index)
    }
}

/// Builder pattern for pool manager configuration
pub struct PoolManagerConfigBuilder {
    config: PoolManagerConfig,
}

impl PoolManagerConfigBuilder {
    /// Create a new builder starting from the crate defaults
    pub fn new() -> Self {
        Self {
            config: PoolManagerConfig::default(),
        }
    }

    /// Set the base buffer size
    pub fn base_buffer_size(mut self, size: usize) -> Self {
        self.config.base_buffer_size = size;
        self
    }

    /// Set the number of size classes
    pub fn number_of_pools(mut self, pools: usize) -> Self {
        self.config.number_of_pools = pools;
        self
    }

    /// Set the growth factor
    pub fn growth_factor(mut self, factor: u32) -> Self {
        self.config.growth_factor = factor;
        self
    }

    /// Set the number of slices per pool
    pub fn slices_per_pool(mut self, slices: usize) -> Self {
        self.config.slices_per_pool = slices;
        self
    }

    /// Set the heap fraction
    pub fn heap_fraction(mut self, fraction: f64) -> Self {
        self.config.heap_fraction = fraction;
        self
    }

    /// Enable or disable the slot-wait fast-fail path
    pub fn skip_buffer_wait_loop(mut self, skip: bool) -> Self {
        self.config.skip_buffer_wait_loop = skip;
        self
    }

    /// Pin the heap size used for the pool budget
    pub fn max_heap_bytes(mut self, bytes: u64) -> Self {
        self.config.max_heap_bytes = Some(bytes);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<PoolManagerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for PoolManagerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Host environment queries
pub mod host {
    /// Fallback heap size when the platform cannot be queried (1 GiB)
    const FALLBACK_HEAP_BYTES: u64 = 1024 * 1024 * 1024;

    /// Number of processors available to the process
    pub fn available_processors() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Physical memory visible to the process, used as the heap budget base
    #[cfg(unix)]
    pub fn max_heap_bytes() -> u64 {
        let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
        if pages <= 0 || page_size <= 0 {
            return FALLBACK_HEAP_BYTES;
        }
        pages as u64 * page_size as u64
    }

    /// Physical memory visible to the process, used as the heap budget base
    #[cfg(not(unix))]
    pub fn max_heap_bytes() -> u64 {
        FALLBACK_HEAP_BYTES
    }
}
