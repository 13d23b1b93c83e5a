//! Replica selection policies

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks which reader endpoint serves a given read request.
///
/// `select` receives the replica count (always at least 1) and returns an
/// index into the replica set.
pub trait ReplicaPolicy: Send + Sync {
    /// Select a replica index in `0..replicas`.
    fn select(&self, replicas: usize) -> usize;
}

/// Strict round-robin: replicas serve reads in a fixed repeating order.
/// The default policy.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl ReplicaPolicy for RoundRobin {
    fn select(&self, replicas: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % replicas
    }
}

/// Uniformly random selection.
#[derive(Debug, Default)]
pub struct Random;

impl ReplicaPolicy for Random {
    fn select(&self, replicas: usize) -> usize {
        rand::thread_rng().gen_range(0..replicas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_is_a_fixed_repeating_order() {
        let policy = RoundRobin::default();
        let picks: Vec<usize> = (0..6).map(|_| policy.select(3)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_round_robin_single_replica() {
        let policy = RoundRobin::default();
        assert_eq!(policy.select(1), 0);
        assert_eq!(policy.select(1), 0);
    }

    #[test]
    fn test_random_stays_in_bounds() {
        let policy = Random;
        for _ in 0..100 {
            assert!(policy.select(4) < 4);
        }
    }
}
