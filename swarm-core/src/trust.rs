//! Trust: per-peer outgoing edges weighted by transfer history, renormalized to sum to 1.

use std::collections::HashMap;

/// Weight added toward a peer after a verified transfer.
pub const SUCCESS_INCREMENT: f64 = 1.0;

/// Weight removed after a failed transfer, before renormalizing.
pub const FAILURE_DECREMENT: f64 = 0.5;

/// An existing edge never drops below this, so a peer is never starved outright.
pub const MIN_WEIGHT: f64 = 0.01;

/// Outgoing trust edges of one peer, keyed by the other peer's client id.
#[derive(Debug, Default, Clone)]
pub struct TrustNode {
    outgoing: HashMap<String, f64>,
}

impl TrustNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a verified transfer with `other`.
    pub fn record_success(&mut self, other: &str) {
        *self.outgoing.entry(other.to_string()).or_insert(0.0) += SUCCESS_INCREMENT;
        self.normalize();
    }

    /// Record a failed transfer with `other`. A peer with no edge gets none.
    pub fn record_failure(&mut self, other: &str) {
        if let Some(w) = self.outgoing.get_mut(other) {
            *w = (*w - FAILURE_DECREMENT).max(MIN_WEIGHT);
            self.normalize();
        }
    }

    /// Normalized weight toward `other`, or 0 if no edge exists.
    pub fn weight(&self, other: &str) -> f64 {
        self.outgoing.get(other).copied().unwrap_or(0.0)
    }

    pub fn edges(&self) -> impl Iterator<Item = (&str, f64)> {
        self.outgoing.iter().map(|(k, &w)| (k.as_str(), w))
    }

    pub fn len(&self) -> usize {
        self.outgoing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty()
    }

    fn normalize(&mut self) {
        let sum: f64 = self.outgoing.values().sum();
        if sum <= 0.0 {
            return;
        }
        for w in self.outgoing.values_mut() {
            *w /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-5;

    fn total(node: &TrustNode) -> f64 {
        node.edges().map(|(_, w)| w).sum()
    }

    #[test]
    fn new_node_is_empty() {
        let node = TrustNode::new();
        assert!(node.is_empty());
        assert_eq!(node.weight("b"), 0.0);
    }

    #[test]
    fn trusts_after_good_transfer() {
        let mut node = TrustNode::new();
        node.record_success("b");
        assert!(!node.is_empty());
        assert!((node.weight("b") - 1.0).abs() < EPS);
    }

    #[test]
    fn normalizes_across_outgoing_edges() {
        let mut node = TrustNode::new();
        node.record_success("b");
        let w1 = node.weight("b");

        node.record_success("c");
        assert_eq!(node.len(), 2);
        assert!(node.weight("b") < w1);
        assert!((node.weight("b") + node.weight("c") - 1.0).abs() < EPS);
    }

    #[test]
    fn failure_lowers_relative_weight() {
        let mut node = TrustNode::new();
        node.record_success("b");
        node.record_success("c");
        let before = node.weight("b");
        node.record_failure("b");
        assert!(node.weight("b") < before);
        assert!(node.weight("c") > node.weight("b"));
        assert!((total(&node) - 1.0).abs() < EPS);
    }

    #[test]
    fn failure_floor_keeps_edge_alive() {
        let mut node = TrustNode::new();
        node.record_success("b");
        node.record_success("c");
        for _ in 0..50 {
            node.record_failure("b");
        }
        assert!(node.weight("b") > 0.0);
        assert!((total(&node) - 1.0).abs() < EPS);
    }

    #[test]
    fn failure_without_edge_is_noop() {
        let mut node = TrustNode::new();
        node.record_failure("b");
        assert!(node.is_empty());
        assert_eq!(node.weight("b"), 0.0);
    }

    #[test]
    fn sum_is_one_after_mixed_sequence() {
        let mut node = TrustNode::new();
        let peers = ["a", "b", "c", "d"];
        for i in 0..40usize {
            let p = peers[(i * 7) % peers.len()];
            if i % 3 == 0 {
                node.record_failure(p);
            } else {
                node.record_success(p);
            }
            if !node.is_empty() {
                assert!((total(&node) - 1.0).abs() < EPS);
            }
            assert!(node.edges().all(|(_, w)| w >= 0.0));
        }
    }
}
