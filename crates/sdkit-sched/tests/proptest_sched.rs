//! Property-based tests for sdkit-sched.

use proptest::prelude::*;
use sdkit_sched::{ring, Balancer, RingConfig, RoundRobin, WeightedRoundRobin};
use std::collections::HashMap;

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

proptest! {
    /// Test: over one full cycle each node is picked weight/gcd times.
    #[test]
    fn test_weighted_cycle_is_fair(weights in proptest::collection::vec(1u32..12, 1..8)) {
        let wrr = WeightedRoundRobin::new();
        for (i, w) in weights.iter().enumerate() {
            wrr.add(i, *w);
        }
        let g = weights.iter().fold(0, |acc, w| gcd(acc, *w));
        let cycle: u32 = weights.iter().map(|w| w / g).sum();
        let mut counts: HashMap<usize, u32> = HashMap::new();
        for _ in 0..cycle {
            *counts.entry(wrr.next().unwrap()).or_default() += 1;
        }
        for (i, w) in weights.iter().enumerate() {
            prop_assert_eq!(counts.get(&i).copied().unwrap_or(0), w / g);
        }
    }

    /// Test: round robin visits every node once per lap.
    #[test]
    fn test_round_robin_laps(n in 1usize..16, laps in 1usize..5) {
        let rr = RoundRobin::new();
        for i in 0..n {
            rr.add(i, 1);
        }
        let picks: Vec<usize> = (0..n * laps).map(|_| rr.next().unwrap()).collect();
        for lap in picks.chunks(n) {
            let mut sorted = lap.to_vec();
            sorted.sort_unstable();
            prop_assert_eq!(sorted, (0..n).collect::<Vec<_>>());
        }
    }

    /// Test: interleaved try_publish/try_consume behaves like a bounded FIFO.
    #[test]
    fn test_ring_matches_bounded_queue(
        capacity in 1usize..16,
        ops in proptest::collection::vec(any::<bool>(), 1..300),
    ) {
        let (mut producer, mut consumer) = ring::channel::<u32>(RingConfig::with_capacity(capacity));
        let cap = producer.capacity();
        let mut model = std::collections::VecDeque::new();
        let mut next = 0u32;
        for publish in ops {
            if publish {
                let accepted = producer.try_publish(|slot| *slot = next);
                prop_assert_eq!(accepted, model.len() < cap);
                if accepted {
                    model.push_back(next);
                }
                next += 1;
            } else {
                prop_assert_eq!(consumer.try_consume(|slot| *slot), model.pop_front());
            }
            prop_assert_eq!(consumer.len(), model.len());
        }
    }
}
