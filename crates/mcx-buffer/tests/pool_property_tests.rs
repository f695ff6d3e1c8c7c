//! Property-based tests for pool accounting under arbitrary get/put
//! interleavings.

use proptest::prelude::*;

use mcx_buffer::{BlockPool, Segment, SegmentPool};

/// Replay a get/put schedule against a model of the accounting rules:
/// `true` takes a segment, `false` returns the most recently held one.
fn replay_segment_ops(total: usize, segment_size: usize, ops: &[bool]) -> (SegmentPool, Vec<Segment>) {
    let mut pool = SegmentPool::new(total, segment_size);
    let mut held: Vec<Segment> = Vec::new();
    let mut expected_overruns = 0u64;
    let mut expected_peak = 0usize;
    let mut in_streak = false;

    for &take in ops {
        if take {
            match pool.get() {
                Some(segment) => {
                    assert_eq!(segment.len(), segment_size);
                    held.push(segment);
                    in_streak = false;
                    expected_peak = expected_peak.max(held.len());
                }
                None => {
                    assert_eq!(held.len(), total, "pool refused while segments remained");
                    if !in_streak {
                        expected_overruns += 1;
                        in_streak = true;
                    }
                }
            }
        } else if let Some(segment) = held.pop() {
            pool.put(segment);
        }

        assert_eq!(pool.in_use(), held.len());
        assert_eq!(pool.is_exhausted(), held.len() == total);
        assert_eq!(pool.overruns(), expected_overruns);
        assert_eq!(pool.peak_usage(), expected_peak);
        assert!(pool.peak_usage() >= pool.in_use());
    }
    (pool, held)
}

proptest! {
    #[test]
    fn segment_pool_accounting_holds(
        total in 1usize..16,
        segment_size in 1usize..256,
        ops in prop::collection::vec(any::<bool>(), 1..200),
    ) {
        let (pool, held) = replay_segment_ops(total, segment_size, &ops);
        prop_assert_eq!(pool.in_use() + (total - held.len()), total);
        prop_assert_eq!(pool.total(), total);
    }

    #[test]
    fn segment_pool_full_cycle_restores_capacity(
        total in 1usize..16,
        segment_size in 1usize..256,
    ) {
        let mut pool = SegmentPool::new(total, segment_size);
        let mut held = Vec::new();
        while let Some(segment) = pool.get() {
            held.push(segment);
        }
        prop_assert_eq!(held.len(), total);
        prop_assert_eq!(pool.overruns(), 1);
        for segment in held.drain(..) {
            pool.put(segment);
        }
        prop_assert_eq!(pool.in_use(), 0);
        prop_assert!(!pool.is_exhausted());
        // One streak, however many failed gets it contained.
        prop_assert_eq!(pool.overruns(), 1);
    }

    #[test]
    fn block_pool_overruns_count_streaks(
        total in 1usize..8,
        streaks in prop::collection::vec(1usize..4, 1..6),
    ) {
        let mut pool = BlockPool::new(total, 8);
        let mut held = Vec::new();
        while let Some(block) = pool.get() {
            held.push(block);
        }
        prop_assert_eq!(held.len(), total);

        // Each put-then-retake ends one empty streak and starts the next.
        let mut expected = 1u64;
        for extra_failures in streaks {
            for _ in 0..extra_failures {
                prop_assert!(pool.get().is_none());
            }
            let block = held.pop().unwrap();
            pool.put(block);
            held.push(pool.get().unwrap());
            prop_assert!(pool.get().is_none());
            expected += 1;
            prop_assert_eq!(pool.overruns(), expected);
        }

        for block in held {
            pool.put(block);
        }
        prop_assert_eq!(pool.free(), total);
    }

    #[test]
    fn stats_snapshot_matches_accessors(
        total in 1usize..16,
        taken in 0usize..16,
    ) {
        let taken = taken.min(total);
        let mut pool = SegmentPool::new(total, 32);
        let mut held = Vec::new();
        for _ in 0..taken {
            held.push(pool.get().unwrap());
        }
        let stats = pool.stats();
        prop_assert_eq!(stats.total, pool.total());
        prop_assert_eq!(stats.in_use, pool.in_use());
        prop_assert_eq!(stats.peak_usage, pool.peak_usage());
        prop_assert_eq!(stats.overruns, pool.overruns());
        for segment in held {
            pool.put(segment);
        }
    }
}
