//! Basic usage of the pooled buffer manager

use std::sync::Arc;

use strata::{MemoryProbe, PoolManagerConfigBuilder, PoolStatsProbe, PooledBufferManager};

fn main() -> strata::Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let stats = Arc::new(PoolStatsProbe::new());
    let config = PoolManagerConfigBuilder::new()
        .slices_per_pool(2)
        .max_heap_bytes(64 * 1024 * 1024)
        .build()?;
    let manager = PooledBufferManager::with_config_and_probes(
        config,
        vec![stats.clone() as Arc<dyn MemoryProbe>],
    )?;

    println!("pool table:");
    for pool in manager.pools() {
        println!(
            "  {:>6} B x {} buffers across {} slices",
            pool.buffer_size(),
            pool.elements_count(),
            pool.slices().len()
        );
    }

    // A request that fits the smallest class.
    let mut small = manager.allocate(1000)?;
    small.put_slice(b"hello, pool")?;
    println!(
        "allocated {} B (capacity {} B, pooled: {})",
        small.limit(),
        small.capacity(),
        !small.is_composite()
    );
    manager.release(small);

    // A request beyond the largest class comes back as a composite.
    let large = manager.allocate(200_000)?;
    println!(
        "allocated {} B composite of {:?}",
        large.limit(),
        large.as_composite().map(|c| c.segment_capacities())
    );
    manager.release(large);

    // Reallocation preserves contents across classes.
    let mut buffer = manager.allocate(100)?;
    buffer.put_slice(b"survives the move")?;
    let buffer = manager.reallocate(buffer, 30_000)?;
    println!("reallocated to capacity {} B", buffer.capacity());
    manager.release(buffer);

    println!("probe counters: {:#?}", stats.snapshot());
    Ok(())
}
