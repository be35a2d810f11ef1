//! Share-counted view lifecycle tests
//! A buffer must return to its slice exactly once, when the last of its
//! family of views is disposed

use strata::{Buffer, PoolManagerConfig, PooledBufferManager};

fn small_manager() -> PooledBufferManager {
    let config = PoolManagerConfig::new()
        .with_slices_per_pool(1)
        .with_max_heap_bytes(30 * 1024 * 1024);
    PooledBufferManager::with_config(config).unwrap()
}

fn pool0_count(manager: &PooledBufferManager) -> usize {
    manager.pools()[0].elements_count()
}

#[test]
fn test_duplicate_defers_return_until_last_dispose() {
    let manager = small_manager();
    let before = pool0_count(&manager);

    let mut buffer = match manager.allocate(8).unwrap() {
        Buffer::Pooled(inner) => inner,
        Buffer::Composite(_) => unreachable!(),
    };
    let mut view = buffer.duplicate().unwrap();
    assert_eq!(buffer.share_count(), 1);

    buffer.dispose();
    // The view still holds the buffer; nothing returned yet.
    assert_eq!(pool0_count(&manager), before - 1);

    view.dispose();
    assert_eq!(pool0_count(&manager), before);
}

#[test]
fn test_dispose_order_does_not_matter() {
    let manager = small_manager();
    let before = pool0_count(&manager);

    let mut buffer = match manager.allocate(8).unwrap() {
        Buffer::Pooled(inner) => inner,
        Buffer::Composite(_) => unreachable!(),
    };
    let mut view = buffer.duplicate().unwrap();

    // View goes first this time.
    view.dispose();
    assert_eq!(pool0_count(&manager), before - 1);

    buffer.dispose();
    assert_eq!(pool0_count(&manager), before);
}

#[test]
fn test_whole_family_returns_once() {
    let manager = small_manager();
    let before = pool0_count(&manager);

    let mut buffer = match manager.allocate(100).unwrap() {
        Buffer::Pooled(inner) => inner,
        Buffer::Composite(_) => unreachable!(),
    };
    let mut views = vec![
        buffer.duplicate().unwrap(),
        buffer.slice_view().unwrap(),
        buffer.as_read_only().unwrap(),
    ];
    views.push(buffer.split(40).unwrap());
    assert_eq!(buffer.share_count(), 4);

    buffer.dispose();
    for view in &mut views {
        view.dispose();
        // Count can only have recovered after the very last dispose.
    }
    assert_eq!(pool0_count(&manager), before);
}

#[test]
fn test_split_write_dispose_restores_underlying() {
    let manager = small_manager();
    let before = pool0_count(&manager);

    let mut buffer = match manager.allocate(100).unwrap() {
        Buffer::Pooled(inner) => inner,
        Buffer::Composite(_) => unreachable!(),
    };
    let mut right = buffer.split(40).unwrap();
    assert_eq!(buffer.capacity(), 40);
    assert_eq!(right.capacity(), 4096 - 40);

    buffer.write_at(0, &[1u8; 40]).unwrap();
    right.write_at(0, &[2u8; 40]).unwrap();

    buffer.dispose();
    right.dispose();
    assert_eq!(pool0_count(&manager), before);

    // The returned buffer comes back whole, not as the split halves.
    let recycled = manager.allocate(100).unwrap();
    assert_eq!(recycled.capacity(), 4096);
    manager.release(recycled);
}

#[test]
fn test_disposing_already_free_buffer_is_noop() {
    let manager = small_manager();
    let before = pool0_count(&manager);

    let mut buffer = manager.allocate(8).unwrap();
    buffer.dispose();
    buffer.dispose();
    buffer.dispose();
    assert_eq!(pool0_count(&manager), before);
}

#[test]
fn test_view_ops_fail_after_dispose() {
    let manager = small_manager();
    let mut buffer = match manager.allocate(8).unwrap() {
        Buffer::Pooled(inner) => inner,
        Buffer::Composite(_) => unreachable!(),
    };
    buffer.dispose();

    assert!(buffer.duplicate().is_err());
    assert!(buffer.slice_view().is_err());
    assert!(buffer.as_read_only().is_err());
    assert!(buffer.split(4).is_err());
    assert!(buffer.put_slice(&[1]).is_err());
}

#[test]
fn test_overflow_return_is_dropped_not_queued() {
    // One slice of sixteen 64 KiB buffers.
    let config = PoolManagerConfig::new()
        .with_slices_per_pool(1)
        .with_max_heap_bytes(30 * 1024 * 1024);
    let manager = PooledBufferManager::with_config(config).unwrap();
    let pool = &manager.pools()[2];
    let capacity = pool.elements_count();
    assert_eq!(capacity, 16);

    // Drain the ring and keep allocating; the extras are fresh buffers.
    let held: Vec<_> = (0..capacity + 4).map(|_| pool.allocate()).collect();
    assert_eq!(pool.elements_count(), 0);

    // Returning everything refills the ring; the four extras find it full
    // and are dropped.
    drop(held);
    assert_eq!(pool.elements_count(), capacity);
}

#[test]
fn test_offer_refusal_on_full_slice() {
    let manager = small_manager();
    let pool = manager.pools()[2].clone();
    let slice = pool.slices()[0].clone();
    let capacity = slice.max_pool_size();

    // Drain the ring completely; the last allocation is a fresh buffer
    // created outside it.
    let mut held: Vec<_> = (0..capacity + 1).map(|_| pool.allocate()).collect();
    let extra = held.pop().unwrap();

    // Returning the ring's own buffers fills it back to capacity.
    drop(held);
    assert_eq!(slice.elements_count(), capacity);

    // One more has no slot; the refusal drops it.
    assert!(!slice.offer(extra));
    assert_eq!(slice.elements_count(), capacity);
}

#[test]
fn test_dropped_handles_return_like_disposed_ones() {
    let manager = small_manager();
    let before = pool0_count(&manager);
    {
        let _buffer = manager.allocate(100).unwrap();
        assert_eq!(pool0_count(&manager), before - 1);
    }
    assert_eq!(pool0_count(&manager), before);
}
