//! Multi-threaded tests for the allocators and the task executor.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;
use rstest::rstest;

use framewright_core::alloc::{
    Block, BuddyAllocator, IndexFreeList, RingAllocator, SegregatedListAllocator,
};
use framewright_core::task::{TaskExecutor, TaskGraph};

// ============================================================================
// Buddy allocator
// ============================================================================

#[rstest]
#[case::uniform(vec![16, 16, 16, 16])]
#[case::descending(vec![512, 256, 128, 64, 32, 16, 8, 8])]
#[case::ascending(vec![8, 16, 32, 64, 128, 256])]
#[case::fragmented(vec![8, 64, 8, 128, 8, 32, 8, 256])]
fn test_buddy_full_free_restores_single_block(#[case] sizes: Vec<u64>) {
    let buddy = BuddyAllocator::new(1024, 8);
    let allocations: Vec<_> = sizes
        .iter()
        .map(|&size| (buddy.try_allocate(size).expect("fits"), size))
        .collect();

    // Free in an order unrelated to allocation order.
    let mut order: Vec<_> = (0..allocations.len()).collect();
    order.sort_by_key(|&i| (i * 7) % allocations.len());
    for i in order {
        let (offset, size) = allocations[i];
        assert!(buddy.try_free(offset, size));
    }

    assert_eq!(
        buddy.free_blocks(),
        vec![Block {
            start: 0,
            size: 1024
        }]
    );
}

#[test]
fn test_buddy_concurrent_allocations_never_overlap() {
    let buddy = Arc::new(BuddyAllocator::new(1 << 20, 64));
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let buddy = Arc::clone(&buddy);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut held = Vec::new();
                for i in 0..200u64 {
                    let size = 64 << ((i + t) % 6);
                    if let Some(offset) = buddy.try_allocate(size) {
                        held.push((offset, buddy.block_size(size).unwrap()));
                    }
                    if i % 3 == 0 {
                        if let Some((offset, size)) = held.pop() {
                            assert!(buddy.try_free(offset, size));
                        }
                    }
                }
                held
            })
        })
        .collect();

    let mut all: Vec<(u64, u64)> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort();
    for pair in all.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "overlap: {pair:?}");
    }

    for (offset, size) in all {
        assert!(buddy.try_free(offset, size));
    }
    assert_eq!(buddy.free_blocks().len(), 1);
}

// ============================================================================
// Index free-list and segregated list
// ============================================================================

#[test]
fn test_free_list_concurrent_unique_indices() {
    let list = Arc::new(IndexFreeList::new(4000));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let list = Arc::clone(&list);
            thread::spawn(move || (0..1000).map(|_| list.try_allocate().unwrap()).collect::<Vec<_>>())
        })
        .collect();
    let mut seen = HashSet::new();
    for handle in handles {
        for index in handle.join().unwrap() {
            assert!(seen.insert(index), "index {index} handed out twice");
        }
    }
    assert_eq!(list.try_allocate(), None);

    for index in seen {
        assert!(list.try_free(index));
    }
    assert_eq!(list.free_ranges().len(), 1);
}

#[test]
fn test_seg_list_concurrent_per_class() {
    let seg = Arc::new(SegregatedListAllocator::new(1 << 16, 256, 4096));
    let handles: Vec<_> = (0..seg.class_count())
        .map(|class| {
            let seg = Arc::clone(&seg);
            thread::spawn(move || {
                let size = seg.class_size(class);
                let blocks: Vec<_> = std::iter::from_fn(|| seg.try_allocate(size)).collect();
                assert_eq!(blocks.len() as u64, (1 << 16) / size);
                for block in blocks {
                    assert_eq!(block.class_index, class);
                    assert!(seg.try_free(block.offset, size));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

// ============================================================================
// Ring allocator
// ============================================================================

#[test]
fn test_ring_live_allocations_never_overlap() {
    let capacity = 97u64;
    let ring = RingAllocator::new(capacity);
    let mut live: std::collections::VecDeque<(u64, u64)> = Default::default();

    for step in 0..2000u64 {
        let size = 1 + (step * 13) % 17;
        match ring.try_allocate(size) {
            Some(offset) => {
                for &(other, other_size) in &live {
                    let a: HashSet<u64> = (offset..offset + size).map(|x| x % capacity).collect();
                    let b: HashSet<u64> =
                        (other..other + other_size).map(|x| x % capacity).collect();
                    assert!(a.is_disjoint(&b), "step {step}");
                }
                live.push_back((offset, size));
            }
            None => {
                let (_, oldest) = live.pop_front().expect("ring full while empty");
                assert!(ring.try_free(oldest));
            }
        }
        let available = ring.available();
        assert!(available <= capacity - 1);
        let used: u64 = live.iter().map(|&(_, s)| s).sum();
        assert_eq!(available, capacity - 1 - used);
    }
}

#[test]
fn test_ring_concurrent_allocations_are_disjoint() {
    let ring = Arc::new(RingAllocator::new(4096));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                (0..100)
                    .filter_map(|_| ring.try_allocate(8))
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut offsets: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    offsets.sort();
    assert_eq!(offsets.len(), 400);
    for pair in offsets.windows(2) {
        assert!(pair[1] - pair[0] >= 8);
    }
}

// ============================================================================
// Task graph
// ============================================================================

#[test]
fn test_diamond_runs_in_order_every_time() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let d_runs = Arc::new(AtomicU32::new(0));

    let mut graph = TaskGraph::new();
    let mk = |name: &'static str| {
        let log = Arc::clone(&log);
        move || log.lock().push(name)
    };
    let a = graph.emplace("A", mk("A"));
    let b = graph.emplace("B", mk("B"));
    let c = graph.emplace("C", mk("C"));
    let d = {
        let log = Arc::clone(&log);
        let d_runs = Arc::clone(&d_runs);
        graph.emplace("D", move || {
            d_runs.fetch_add(1, Ordering::SeqCst);
            log.lock().push("D");
        })
    };
    graph.precede(a, b);
    graph.precede(a, c);
    graph.precede(b, d);
    graph.precede(c, d);

    let executor = TaskExecutor::new(4).unwrap();
    for run in 0..1000 {
        log.lock().clear();
        executor.run(&graph);

        let order = log.lock().clone();
        assert_eq!(order.len(), 4, "run {run}: {order:?}");
        assert_eq!(order[0], "A");
        assert_eq!(order[3], "D");
        assert_eq!(order.iter().filter(|n| **n == "D").count(), 1);
    }
    assert_eq!(d_runs.load(Ordering::SeqCst), 1000);
}

#[test]
fn test_concurrent_runs_of_same_graph_are_serialized() {
    let active = Arc::new(AtomicU32::new(0));
    let max_seen = Arc::new(AtomicU32::new(0));

    let mut graph = TaskGraph::new();
    let (act, max) = (Arc::clone(&active), Arc::clone(&max_seen));
    graph.emplace("only", move || {
        let now = act.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        thread::yield_now();
        act.fetch_sub(1, Ordering::SeqCst);
    });

    let graph = Arc::new(graph);
    let executor = Arc::new(TaskExecutor::new(4).unwrap());
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let graph = Arc::clone(&graph);
            let executor = Arc::clone(&executor);
            thread::spawn(move || {
                for _ in 0..50 {
                    executor.run(&graph);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}
