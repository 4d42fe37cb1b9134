//! Node-selection policies.
//!
//! Every balancer is safe to share between threads. Membership changes
//! (`add`, `remove`) and selection (`next`) may interleave freely.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SchedError, SchedResult};

/// Common interface of all selection policies.
pub trait Balancer<N>: Send + Sync {
    /// Picks the next node. Fails with [`SchedError::NoNodes`] when empty.
    fn next(&self) -> SchedResult<N>;
    /// Adds a node. `weight` is only meaningful for weighted policies.
    fn add(&self, node: N, weight: u32);
    /// Removes a node. Returns false when it was not a member.
    fn remove(&self, node: &N) -> bool;
    /// Current membership in insertion order.
    fn nodes(&self) -> Vec<N>;
    /// Number of member nodes.
    fn len(&self) -> usize;
    /// True when no node is a member.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which policy a [`BalancerConfig`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BalancePolicy {
    /// Strict rotation.
    #[default]
    RoundRobin,
    /// Interleaved weighted rotation.
    WeightedRoundRobin,
    /// Fewest active connections first.
    LeastConnections,
    /// Uniform random choice.
    Random,
}

/// Balancer construction options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Policy to build.
    pub policy: BalancePolicy,
}

impl BalancerConfig {
    /// Builds an empty balancer for the configured policy.
    pub fn build<N>(&self) -> Box<dyn Balancer<N>>
    where
        N: Clone + PartialEq + Send + Sync + 'static,
    {
        match self.policy {
            BalancePolicy::RoundRobin => Box::new(RoundRobin::new()),
            BalancePolicy::WeightedRoundRobin => Box::new(WeightedRoundRobin::new()),
            BalancePolicy::LeastConnections => Box::new(LeastConnections::new()),
            BalancePolicy::Random => Box::new(RandomBalancer::new()),
        }
    }
}

/// Strict rotation over the member list.
pub struct RoundRobin<N> {
    nodes: RwLock<Vec<N>>,
    counter: AtomicUsize,
}

impl<N> RoundRobin<N> {
    /// Creates an empty round-robin balancer.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            counter: AtomicUsize::new(0),
        }
    }
}

impl<N> Default for RoundRobin<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Clone + PartialEq + Send + Sync> Balancer<N> for RoundRobin<N> {
    fn next(&self) -> SchedResult<N> {
        let nodes = self.nodes.read();
        if nodes.is_empty() {
            return Err(SchedError::NoNodes);
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % nodes.len();
        Ok(nodes[idx].clone())
    }

    fn add(&self, node: N, _weight: u32) {
        let mut nodes = self.nodes.write();
        if !nodes.contains(&node) {
            nodes.push(node);
            debug!(nodes = nodes.len(), "round-robin membership grew");
        }
    }

    fn remove(&self, node: &N) -> bool {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|n| n != node);
        before != nodes.len()
    }

    fn nodes(&self) -> Vec<N> {
        self.nodes.read().clone()
    }

    fn len(&self) -> usize {
        self.nodes.read().len()
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

struct WeightedState<N> {
    nodes: Vec<(N, u32)>,
    /// Index of the last node considered; starts one before the first.
    cursor: usize,
    current_weight: u32,
    gcd: u32,
    max_weight: u32,
}

impl<N> WeightedState<N> {
    fn recompute(&mut self) {
        self.gcd = self.nodes.iter().fold(0, |g, (_, w)| gcd(g, *w));
        self.max_weight = self.nodes.iter().map(|(_, w)| *w).max().unwrap_or(0);
        self.cursor = self.nodes.len().saturating_sub(1);
        self.current_weight = 0;
    }
}

/// Interleaved weighted round robin.
///
/// Over a full cycle of `sum(weights) / gcd(weights)` picks each node is
/// chosen exactly `weight / gcd` times. Heavier nodes are spread through the
/// cycle rather than chosen in one burst. Nodes with weight 0 are never
/// picked.
pub struct WeightedRoundRobin<N> {
    state: Mutex<WeightedState<N>>,
}

impl<N> WeightedRoundRobin<N> {
    /// Creates an empty weighted balancer.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WeightedState {
                nodes: Vec::new(),
                cursor: 0,
                current_weight: 0,
                gcd: 0,
                max_weight: 0,
            }),
        }
    }

    /// Weight of a member node.
    pub fn weight(&self, node: &N) -> Option<u32>
    where
        N: PartialEq,
    {
        self.state
            .lock()
            .nodes
            .iter()
            .find(|(n, _)| n == node)
            .map(|(_, w)| *w)
    }
}

impl<N> Default for WeightedRoundRobin<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Clone + PartialEq + Send + Sync> Balancer<N> for WeightedRoundRobin<N> {
    fn next(&self) -> SchedResult<N> {
        let mut st = self.state.lock();
        if st.max_weight == 0 {
            return Err(SchedError::NoNodes);
        }
        let n = st.nodes.len();
        loop {
            st.cursor = (st.cursor + 1) % n;
            if st.cursor == 0 {
                if st.current_weight <= st.gcd {
                    st.current_weight = st.max_weight;
                } else {
                    st.current_weight -= st.gcd;
                }
            }
            let (node, weight) = &st.nodes[st.cursor];
            if *weight >= st.current_weight {
                return Ok(node.clone());
            }
        }
    }

    fn add(&self, node: N, weight: u32) {
        let mut st = self.state.lock();
        match st.nodes.iter_mut().find(|(n, _)| *n == node) {
            Some((_, w)) => *w = weight,
            None => st.nodes.push((node, weight)),
        }
        st.recompute();
        debug!(
            nodes = st.nodes.len(),
            gcd = st.gcd,
            max_weight = st.max_weight,
            "weighted membership changed"
        );
    }

    fn remove(&self, node: &N) -> bool {
        let mut st = self.state.lock();
        let before = st.nodes.len();
        st.nodes.retain(|(n, _)| n != node);
        let removed = before != st.nodes.len();
        if removed {
            st.recompute();
        }
        removed
    }

    fn nodes(&self) -> Vec<N> {
        self.state.lock().nodes.iter().map(|(n, _)| n.clone()).collect()
    }

    fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }
}

struct Tracked<N> {
    node: N,
    active: Arc<AtomicUsize>,
}

/// Picks the node with the fewest active connections.
///
/// Ties go to the node added first. Callers either bracket work with
/// [`LeastConnections::increment`] / [`LeastConnections::decrement`] or use
/// [`LeastConnections::acquire`], whose guard decrements on drop.
pub struct LeastConnections<N> {
    nodes: RwLock<Vec<Tracked<N>>>,
}

impl<N> LeastConnections<N> {
    /// Creates an empty least-connections balancer.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
        }
    }
}

impl<N> Default for LeastConnections<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Clone + PartialEq> LeastConnections<N> {
    fn counter(&self, node: &N) -> Option<Arc<AtomicUsize>> {
        self.nodes
            .read()
            .iter()
            .find(|t| &t.node == node)
            .map(|t| Arc::clone(&t.active))
    }

    /// Records a new connection to `node`. Returns false for unknown nodes.
    pub fn increment(&self, node: &N) -> bool {
        match self.counter(node) {
            Some(c) => {
                c.fetch_add(1, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// Records a finished connection. Never drops below zero.
    pub fn decrement(&self, node: &N) -> bool {
        match self.counter(node) {
            Some(c) => {
                let _ = c.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                    Some(v.saturating_sub(1))
                });
                true
            }
            None => false,
        }
    }

    /// Active connection count of `node`.
    pub fn active(&self, node: &N) -> Option<usize> {
        self.counter(node).map(|c| c.load(Ordering::Acquire))
    }

    /// Selects a node and counts a connection against it until the guard
    /// is dropped.
    pub fn acquire(&self) -> SchedResult<ConnectionGuard<N>> {
        let nodes = self.nodes.read();
        let chosen = nodes
            .iter()
            .min_by_key(|t| t.active.load(Ordering::Acquire))
            .ok_or(SchedError::NoNodes)?;
        chosen.active.fetch_add(1, Ordering::AcqRel);
        Ok(ConnectionGuard {
            node: chosen.node.clone(),
            active: Arc::clone(&chosen.active),
        })
    }
}

impl<N: Clone + PartialEq + Send + Sync> Balancer<N> for LeastConnections<N> {
    fn next(&self) -> SchedResult<N> {
        self.nodes
            .read()
            .iter()
            .min_by_key(|t| t.active.load(Ordering::Acquire))
            .map(|t| t.node.clone())
            .ok_or(SchedError::NoNodes)
    }

    fn add(&self, node: N, _weight: u32) {
        let mut nodes = self.nodes.write();
        if nodes.iter().any(|t| t.node == node) {
            return;
        }
        nodes.push(Tracked {
            node,
            active: Arc::new(AtomicUsize::new(0)),
        });
        debug!(nodes = nodes.len(), "least-connections membership grew");
    }

    fn remove(&self, node: &N) -> bool {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|t| &t.node != node);
        before != nodes.len()
    }

    fn nodes(&self) -> Vec<N> {
        self.nodes.read().iter().map(|t| t.node.clone()).collect()
    }

    fn len(&self) -> usize {
        self.nodes.read().len()
    }
}

/// An in-flight connection counted by [`LeastConnections`].
pub struct ConnectionGuard<N> {
    node: N,
    active: Arc<AtomicUsize>,
}

impl<N> ConnectionGuard<N> {
    /// The node this connection was assigned to.
    pub fn node(&self) -> &N {
        &self.node
    }
}

impl<N> Drop for ConnectionGuard<N> {
    fn drop(&mut self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(1))
            });
    }
}

/// Uniform random choice among members.
pub struct RandomBalancer<N> {
    nodes: RwLock<Vec<N>>,
}

impl<N> RandomBalancer<N> {
    /// Creates an empty random balancer.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
        }
    }
}

impl<N> Default for RandomBalancer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Clone + PartialEq + Send + Sync> Balancer<N> for RandomBalancer<N> {
    fn next(&self) -> SchedResult<N> {
        let nodes = self.nodes.read();
        if nodes.is_empty() {
            return Err(SchedError::NoNodes);
        }
        let idx = rand::thread_rng().gen_range(0..nodes.len());
        Ok(nodes[idx].clone())
    }

    fn add(&self, node: N, _weight: u32) {
        let mut nodes = self.nodes.write();
        if !nodes.contains(&node) {
            nodes.push(node);
        }
    }

    fn remove(&self, node: &N) -> bool {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|n| n != node);
        before != nodes.len()
    }

    fn nodes(&self) -> Vec<N> {
        self.nodes.read().clone()
    }

    fn len(&self) -> usize {
        self.nodes.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn picks<B: Balancer<&'static str>>(b: &B, n: usize) -> Vec<&'static str> {
        (0..n).map(|_| b.next().unwrap()).collect()
    }

    #[test]
    fn test_round_robin_rotates() {
        let rr = RoundRobin::new();
        rr.add("a", 1);
        rr.add("b", 1);
        rr.add("c", 1);
        assert_eq!(picks(&rr, 6), vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_empty_balancers_report_no_nodes() {
        for policy in [
            BalancePolicy::RoundRobin,
            BalancePolicy::WeightedRoundRobin,
            BalancePolicy::LeastConnections,
            BalancePolicy::Random,
        ] {
            let b = BalancerConfig { policy }.build::<u32>();
            assert!(b.is_empty());
            assert!(matches!(b.next(), Err(SchedError::NoNodes)));
        }
    }

    #[test]
    fn test_weighted_first_cycle_interleaves() {
        let wrr = WeightedRoundRobin::new();
        wrr.add("A", 5);
        wrr.add("B", 1);
        wrr.add("C", 1);
        let first = picks(&wrr, 7);
        let mut counts = HashMap::new();
        for p in &first {
            *counts.entry(*p).or_insert(0) += 1;
        }
        assert_eq!(counts["A"], 5);
        assert_eq!(counts["B"], 1);
        assert_eq!(counts["C"], 1);
    }

    #[test]
    fn test_weighted_interleaves_equal_heavy_nodes() {
        let wrr = WeightedRoundRobin::new();
        wrr.add("a", 2);
        wrr.add("b", 2);
        wrr.add("c", 1);
        assert_eq!(picks(&wrr, 5), vec!["a", "b", "a", "b", "c"]);
    }

    #[test]
    fn test_weighted_uses_gcd() {
        let wrr = WeightedRoundRobin::new();
        wrr.add("x", 4);
        wrr.add("y", 2);
        // gcd 2: cycle length (4 + 2) / 2 = 3
        assert_eq!(picks(&wrr, 6), vec!["x", "x", "y", "x", "x", "y"]);
    }

    #[test]
    fn test_weighted_zero_weight_never_picked() {
        let wrr = WeightedRoundRobin::new();
        wrr.add("zero", 0);
        assert!(matches!(wrr.next(), Err(SchedError::NoNodes)));
        wrr.add("one", 1);
        assert!(picks(&wrr, 5).iter().all(|p| *p == "one"));
        assert_eq!(wrr.weight(&"zero"), Some(0));
    }

    #[test]
    fn test_re_adding_updates_weight() {
        let wrr = WeightedRoundRobin::new();
        wrr.add("a", 1);
        wrr.add("b", 1);
        wrr.add("a", 3);
        assert_eq!(wrr.len(), 2);
        assert_eq!(wrr.weight(&"a"), Some(3));
        let first = picks(&wrr, 4);
        assert_eq!(first.iter().filter(|p| **p == "a").count(), 3);

        let rr = RoundRobin::new();
        rr.add("a", 1);
        rr.add("a", 1);
        assert_eq!(rr.len(), 1);
    }

    #[test]
    fn test_weighted_remove_recomputes() {
        let wrr = WeightedRoundRobin::new();
        wrr.add("a", 3);
        wrr.add("b", 1);
        assert!(wrr.remove(&"a"));
        assert!(!wrr.remove(&"a"));
        assert!(picks(&wrr, 3).iter().all(|p| *p == "b"));
    }

    #[test]
    fn test_least_connections_prefers_idle() {
        let lc = LeastConnections::new();
        lc.add("a", 1);
        lc.add("b", 1);
        assert_eq!(lc.next().unwrap(), "a");
        lc.increment(&"a");
        assert_eq!(lc.next().unwrap(), "b");
        lc.increment(&"b");
        lc.increment(&"b");
        assert_eq!(lc.next().unwrap(), "a");
        lc.decrement(&"b");
        lc.decrement(&"b");
        assert_eq!(lc.active(&"b"), Some(0));
        lc.decrement(&"b");
        assert_eq!(lc.active(&"b"), Some(0));
    }

    #[test]
    fn test_least_connections_guard_releases() {
        let lc = LeastConnections::new();
        lc.add(1u32, 1);
        lc.add(2u32, 1);
        let g1 = lc.acquire().unwrap();
        let g2 = lc.acquire().unwrap();
        assert_eq!(*g1.node(), 1);
        assert_eq!(*g2.node(), 2);
        drop(g1);
        assert_eq!(lc.active(&1), Some(0));
        assert_eq!(lc.next().unwrap(), 1);
        assert!(!lc.increment(&3));
    }

    #[test]
    fn test_random_picks_members() {
        let r = RandomBalancer::new();
        r.add(10u32, 1);
        r.add(20u32, 1);
        for _ in 0..100 {
            let n = r.next().unwrap();
            assert!(n == 10 || n == 20);
        }
        r.remove(&10);
        assert_eq!(r.next().unwrap(), 20);
    }

    #[test]
    fn test_membership_changes_under_concurrency() {
        let rr = Arc::new(RoundRobin::new());
        rr.add(0u32, 1);
        let handles: Vec<_> = (1..5u32)
            .map(|i| {
                let rr = Arc::clone(&rr);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        rr.add(i, 1);
                        let _ = rr.next().unwrap();
                        rr.remove(&i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(rr.nodes(), vec![0]);
    }

    #[test]
    fn test_config_deserializes_policy() {
        let cfg: BalancerConfig =
            serde_json::from_str(r#"{"policy":"LeastConnections"}"#).unwrap();
        assert_eq!(cfg.policy, BalancePolicy::LeastConnections);
        let cfg: BalancerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.policy, BalancePolicy::RoundRobin);
    }
}
