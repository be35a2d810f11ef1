//! Concurrent stress tests for high-contention allocate/release traffic
//! Buffers produced on one thread are released on another, which is exactly
//! the cross-thread flow the sliced rings are built for

use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;

use strata::{Buffer, PoolManagerConfig, PooledBufferManager};

const PRODUCERS: usize = 16;
const CONSUMERS: usize = 16;

/// The full cross-thread load: 10^6 ops per producer thread. Minutes of
/// wall clock, so it runs behind `--ignored`.
const FULL_OPS_PER_THREAD: usize = 1_000_000;

/// Trimmed load for the default test run.
const QUICK_OPS_PER_THREAD: usize = 50_000;

fn stress_manager() -> Arc<PooledBufferManager> {
    let config = PoolManagerConfig::new()
        .with_slices_per_pool(4)
        .with_max_heap_bytes(60 * 1024 * 1024);
    Arc::new(PooledBufferManager::with_config(config).unwrap())
}

/// Allocator threads tag each buffer with a unique (thread, sequence) pair
/// and hand it to a disposer thread. A duplicated ring handout would let two
/// threads scribble over the same bytes and a tag would go missing; a lost
/// buffer would leave the final pool counts short.
#[test]
fn stress_cross_thread_allocate_release() {
    run_cross_thread_allocate_release(QUICK_OPS_PER_THREAD);
}

/// Same property at the full load.
#[test]
#[ignore = "full 10^6-ops-per-thread load; run with cargo test -- --ignored"]
fn stress_cross_thread_allocate_release_full_load() {
    run_cross_thread_allocate_release(FULL_OPS_PER_THREAD);
}

fn run_cross_thread_allocate_release(ops_per_thread: usize) {
    let manager = stress_manager();
    let initial: Vec<usize> = manager
        .pools()
        .iter()
        .map(|pool| pool.elements_count())
        .collect();

    let barrier = Arc::new(Barrier::new(PRODUCERS + CONSUMERS));
    let mut senders = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..CONSUMERS {
        let (sender, receiver) = mpsc::channel::<Buffer>();
        senders.push(sender);
        receivers.push(receiver);
    }

    let mut producer_handles = Vec::new();
    for thread_id in 0..PRODUCERS {
        let manager = manager.clone();
        let barrier = barrier.clone();
        let sender = senders[thread_id % CONSUMERS].clone();

        producer_handles.push(thread::spawn(move || {
            barrier.wait();
            for sequence in 0..ops_per_thread {
                let mut buffer = manager.allocate(16).unwrap();
                let mut tag = [0u8; 16];
                tag[..8].copy_from_slice(&(thread_id as u64).to_le_bytes());
                tag[8..].copy_from_slice(&(sequence as u64).to_le_bytes());
                buffer.put_slice(&tag).unwrap();
                sender.send(buffer).unwrap();
            }
        }));
    }
    drop(senders);

    let mut consumer_handles = Vec::new();
    for receiver in receivers {
        let barrier = barrier.clone();
        consumer_handles.push(thread::spawn(move || {
            barrier.wait();
            let mut seen = HashSet::new();
            for buffer in receiver.iter() {
                let mut tag = [0u8; 16];
                buffer.read_at(0, &mut tag).unwrap();
                let thread_id = u64::from_le_bytes(tag[..8].try_into().unwrap());
                let sequence = u64::from_le_bytes(tag[8..].try_into().unwrap());
                assert!(thread_id < PRODUCERS as u64, "corrupt tag {}", thread_id);
                assert!(sequence < ops_per_thread as u64, "corrupt tag {}", sequence);
                assert!(
                    seen.insert((thread_id, sequence)),
                    "tag ({}, {}) delivered twice",
                    thread_id,
                    sequence
                );
                drop(buffer);
            }
            seen
        }));
    }

    for handle in producer_handles {
        handle.join().unwrap();
    }
    let mut all_tags: HashSet<(u64, u64)> = HashSet::new();
    for handle in consumer_handles {
        for tag in handle.join().unwrap() {
            assert!(all_tags.insert(tag), "tag {:?} seen by two consumers", tag);
        }
    }
    assert_eq!(
        all_tags.len(),
        PRODUCERS * ops_per_thread,
        "buffers lost in flight"
    );

    // Every buffer went back; the rings hold exactly what they started
    // with.
    let final_counts: Vec<usize> = manager
        .pools()
        .iter()
        .map(|pool| pool.elements_count())
        .collect();
    assert_eq!(initial, final_counts);
}

/// Mixed-size traffic across every class, including the composite path.
#[test]
fn stress_mixed_size_allocation() {
    let manager = stress_manager();
    let initial: Vec<usize> = manager
        .pools()
        .iter()
        .map(|pool| pool.elements_count())
        .collect();

    let threads = 8;
    let iterations = 5_000;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|thread_id| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for iteration in 0..iterations {
                    let size = match (thread_id + iteration) % 4 {
                        0 => 100,
                        1 => 5_000,
                        2 => 40_000,
                        _ => 150_000,
                    };
                    let mut buffer = manager.allocate(size).unwrap();
                    buffer.write_at(0, &[thread_id as u8; 32]).unwrap();

                    let mut check = [0u8; 32];
                    buffer.read_at(0, &mut check).unwrap();
                    assert_eq!(check, [thread_id as u8; 32]);

                    manager.release(buffer);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let final_counts: Vec<usize> = manager
        .pools()
        .iter()
        .map(|pool| pool.elements_count())
        .collect();
    assert_eq!(initial, final_counts);
}

/// Reallocation churn between classes while other threads allocate.
#[test]
fn stress_reallocate_under_contention() {
    let manager = stress_manager();
    let threads = 8;
    let iterations = 2_000;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|thread_id| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for iteration in 0..iterations {
                    let mut buffer = manager.allocate(1_000).unwrap();
                    buffer.write_at(0, &[thread_id as u8; 64]).unwrap();

                    let grown = manager.reallocate(buffer, 30_000).unwrap();
                    let mut check = [0u8; 64];
                    grown.read_at(0, &mut check).unwrap();
                    assert_eq!(check, [thread_id as u8; 64]);

                    let shrunk = manager
                        .reallocate(grown, if iteration % 2 == 0 { 500 } else { 0 })
                        .unwrap();
                    manager.release(shrunk);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

/// Views handed to another thread keep the source alive until the last
/// holder is done, wherever that holder runs.
#[test]
fn stress_views_disposed_across_threads() {
    let manager = stress_manager();
    let initial = manager.pools()[0].elements_count();

    let iterations = 20_000;
    let (sender, receiver) = mpsc::channel();

    let consumer = {
        thread::spawn(move || {
            for view in receiver.iter() {
                drop(view);
            }
        })
    };

    for _ in 0..iterations {
        let mut buffer = match manager.allocate(64).unwrap() {
            Buffer::Pooled(inner) => inner,
            Buffer::Composite(_) => unreachable!(),
        };
        let view = buffer.duplicate().unwrap();
        sender.send(view).unwrap();
        buffer.dispose();
    }
    drop(sender);
    consumer.join().unwrap();

    assert_eq!(manager.pools()[0].elements_count(), initial);
}
