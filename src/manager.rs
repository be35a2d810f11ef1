//! The pooled buffer manager: size-class dispatch, reallocation, wrapping

use std::sync::Arc;

use crate::buffers::{Buffer, CompositeBuffer, PooledBuffer};
use crate::config::PoolManagerConfig;
use crate::error::{Result, StrataError};
use crate::pool::Pool;
use crate::probe::{MemoryProbe, ProbeSet};

/// Serves allocate/reallocate/release requests from a table of size-class
/// pools, falling back to composite buffers for requests larger than the
/// biggest class.
///
/// Buffers are not cached per thread; one allocated on thread A and
/// released on thread B goes back to the slice it came from, so no size
/// class leaks to a single thread.
#[derive(Debug)]
pub struct PooledBufferManager {
    pools: Box<[Arc<Pool>]>,
    /// Buffer size of the largest class
    max_pooled_buffer_size: usize,
    probes: Arc<ProbeSet>,
    config: PoolManagerConfig,
}

impl PooledBufferManager {
    /// Build a manager with the default configuration
    pub fn new() -> Result<PooledBufferManager> {
        Self::with_config(PoolManagerConfig::default())
    }

    /// Build a manager from `config`
    pub fn with_config(config: PoolManagerConfig) -> Result<PooledBufferManager> {
        Self::with_config_and_probes(config, Vec::new())
    }

    /// Build a manager from `config` with monitoring probes registered.
    ///
    /// Probes are fixed for the manager's lifetime; notification is a plain
    /// slice walk with nothing to lock on the allocation path.
    pub fn with_config_and_probes(
        config: PoolManagerConfig,
        probes: Vec<Arc<dyn MemoryProbe>>,
    ) -> Result<PooledBufferManager> {
        config.validate()?;

        let probes = Arc::new(ProbeSet::new(probes));
        let memory_per_pool = config.memory_per_pool();

        let mut pools = Vec::with_capacity(config.number_of_pools);
        for index in 0..config.number_of_pools {
            pools.push(Arc::new(Pool::new(
                config.buffer_size_for(index),
                memory_per_pool,
                config.slices_per_pool,
                config.skip_buffer_wait_loop,
                &probes,
            )?));
        }
        let max_pooled_buffer_size = config.buffer_size_for(config.number_of_pools - 1);

        tracing::debug!(
            pools = config.number_of_pools,
            base_buffer_size = config.base_buffer_size,
            max_pooled_buffer_size,
            slices_per_pool = config.slices_per_pool,
            "built pooled buffer manager"
        );

        Ok(PooledBufferManager {
            pools: pools.into_boxed_slice(),
            max_pooled_buffer_size,
            probes,
            config,
        })
    }

    /// Allocate a buffer with `limit == size`; capacity is the buffer size
    /// of the chosen class
    pub fn allocate(&self, size: usize) -> Result<Buffer> {
        let mut buffer = self.allocate_at_least(size)?;
        buffer.set_limit(size)?;
        Ok(buffer)
    }

    /// Allocate a buffer of at least `size` bytes.
    ///
    /// The capacity may exceed the request; the bytes beyond the limit are
    /// usable after raising it.
    pub fn allocate_at_least(&self, size: usize) -> Result<Buffer> {
        if size == 0 {
            return Ok(Buffer::Pooled(PooledBuffer::empty()));
        }
        if size <= self.max_pooled_buffer_size {
            Ok(Buffer::Pooled(self.pool_for(size)?.allocate()))
        } else {
            let mut composite = CompositeBuffer::new();
            self.allocate_to_composite(&mut composite, size)?;
            Ok(Buffer::Composite(composite))
        }
    }

    /// Reallocate `old` to at least `new_size` bytes, preserving the first
    /// `min(old capacity, new_size)` bytes and clamped cursors
    pub fn reallocate(&self, old: Buffer, new_size: usize) -> Result<Buffer> {
        if new_size == 0 {
            let mut old = old;
            old.dispose();
            return Ok(Buffer::Pooled(PooledBuffer::empty()));
        }

        match old {
            Buffer::Pooled(old) => self.reallocate_pooled(old, new_size),
            Buffer::Composite(old) => self.reallocate_composite(old, new_size),
        }
    }

    /// Release `buffer` toward its pool
    pub fn release(&self, mut buffer: Buffer) {
        buffer.dispose();
    }

    /// This manager never allocates off-heap memory
    pub fn will_allocate_direct(&self, _size: usize) -> bool {
        false
    }

    /// Wrap existing bytes in an unpooled buffer without copying
    pub fn wrap(&self, bytes: Vec<u8>) -> Buffer {
        Buffer::Pooled(PooledBuffer::wrap(bytes))
    }

    /// Wrap the UTF-8 bytes of `text` in an unpooled buffer
    pub fn wrap_str(&self, text: &str) -> Buffer {
        self.wrap(text.as_bytes().to_vec())
    }

    /// Snapshot of the size-class table
    pub fn pools(&self) -> Vec<Arc<Pool>> {
        self.pools.to_vec()
    }

    /// Buffer size of the largest class
    pub fn max_pooled_buffer_size(&self) -> usize {
        self.max_pooled_buffer_size
    }

    /// Registered monitoring probes
    pub fn probes(&self) -> &Arc<ProbeSet> {
        &self.probes
    }

    /// Configuration this manager was built from
    pub fn config(&self) -> &PoolManagerConfig {
        &self.config
    }

    // ------------------------------------------------------------ Private

    /// Smallest pool whose buffer size covers `size`
    fn pool_for(&self, size: usize) -> Result<&Arc<Pool>> {
        self.pools
            .iter()
            .find(|pool| pool.buffer_size() >= size)
            .ok_or(StrataError::NoPoolFits { requested: size })
    }

    fn reallocate_pooled(&self, mut old: PooledBuffer, new_size: usize) -> Result<Buffer> {
        let current_capacity = old.capacity();

        if current_capacity >= new_size {
            let new_class = self.pool_for(new_size)?.buffer_size();
            if old.class_buffer_size() == Some(new_class) {
                // Same class: adjust the limit in place.
                old.set_limit(new_size)?;
                return Ok(Buffer::Pooled(old));
            }
            // Tighter class: copy the surviving prefix across.
            let position = old.position().min(new_size);
            let limit = old.limit().min(new_size);
            let fresh = self.copy_into_class(&old, new_size, new_size, position, limit)?;
            old.dispose();
            return Ok(Buffer::Pooled(fresh));
        }

        if new_size <= self.max_pooled_buffer_size {
            // Larger class: copy everything across.
            let position = old.position();
            let limit = old.limit();
            let fresh = self.copy_into_class(&old, new_size, current_capacity, position, limit)?;
            old.dispose();
            return Ok(Buffer::Pooled(fresh));
        }

        // Beyond the largest class: the old buffer becomes the first
        // segment of a composite.
        let position = old.position();
        let mut composite = CompositeBuffer::new();
        composite.append(old)?;
        self.allocate_to_composite(&mut composite, new_size - current_capacity)?;
        composite.set_limit(new_size)?;
        composite.set_position(position)?;
        Ok(Buffer::Composite(composite))
    }

    fn reallocate_composite(&self, mut old: CompositeBuffer, new_size: usize) -> Result<Buffer> {
        let current_capacity = old.capacity();
        if current_capacity > new_size {
            let position = old.position();
            old.set_limit(new_size)?;
            old.trim()?;
            old.set_position(position.min(new_size))?;
        } else {
            self.allocate_to_composite(&mut old, new_size - current_capacity)?;
        }
        Ok(Buffer::Composite(old))
    }

    /// Allocate from the class covering `class_size` and copy
    /// `[0, copy_len)` of `source` into it
    fn copy_into_class(
        &self,
        source: &PooledBuffer,
        class_size: usize,
        copy_len: usize,
        position: usize,
        limit: usize,
    ) -> Result<PooledBuffer> {
        let mut fresh = self.pool_for(class_size)?.allocate();
        let mut bytes = vec![0u8; copy_len];
        source.read_at(0, &mut bytes)?;
        fresh.write_at(0, &bytes)?;
        fresh.set_limit(limit)?;
        fresh.set_position(position)?;
        Ok(fresh)
    }

    /// Extend `composite` by `size` bytes of pool segments: whole top-class
    /// buffers first, then one buffer from the smallest class covering the
    /// remainder. The appendable flag is restored afterwards.
    fn allocate_to_composite(&self, composite: &mut CompositeBuffer, mut size: usize) -> Result<()> {
        let was_appendable = composite.is_appendable();
        composite.set_appendable(true);

        if size >= self.max_pooled_buffer_size {
            let top = &self.pools[self.pools.len() - 1];
            while size >= self.max_pooled_buffer_size {
                composite.append(top.allocate())?;
                size -= self.max_pooled_buffer_size;
            }
        }
        for pool in self.pools.iter() {
            if pool.buffer_size() >= size {
                composite.append(pool.allocate())?;
                break;
            }
        }

        composite.set_appendable(was_appendable);
        tracing::trace!(
            segments = composite.segment_count(),
            capacity = composite.capacity(),
            "assembled composite buffer"
        );
        Ok(())
    }
}
