//! Single-writer ownership
//!
//! Every instance has exactly one owning node, picked by rendezvous
//! (highest-random-weight) hashing over the instance key. Within a node,
//! the same hash picks the worker partition, so all steps of one instance
//! run on one worker in order.

use serde::{Deserialize, Serialize};
use skein_types::{SkeinError, SkeinResult};

/// Identifier of a runtime node
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new("local")
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable mapping from instance keys to owning nodes
pub trait NodeSelector: Send + Sync + std::fmt::Debug {
    fn owner(&self, key: &str) -> NodeId;

    fn nodes(&self) -> &[NodeId];
}

/// Rendezvous hashing over a fixed node set
#[derive(Clone, Debug)]
pub struct RendezvousSelector {
    nodes: Vec<NodeId>,
}

impl RendezvousSelector {
    pub fn new(nodes: Vec<NodeId>) -> SkeinResult<Self> {
        if nodes.is_empty() {
            return Err(SkeinError::Validation(
                "node selector needs at least one node".into(),
            ));
        }
        Ok(Self { nodes })
    }

    /// A selector where `node` owns everything
    pub fn single(node: NodeId) -> Self {
        Self { nodes: vec![node] }
    }
}

impl NodeSelector for RendezvousSelector {
    fn owner(&self, key: &str) -> NodeId {
        let mut best = &self.nodes[0];
        let mut best_weight = weight(best, key);
        for node in &self.nodes[1..] {
            let w = weight(node, key);
            if w > best_weight || (w == best_weight && node > best) {
                best = node;
                best_weight = w;
            }
        }
        best.clone()
    }

    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
}

fn weight(node: &NodeId, key: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(node.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(key.as_bytes());
    leading_u64(hasher.finalize())
}

fn leading_u64(hash: blake3::Hash) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Worker partition of `key` among `partitions` workers
pub fn partition(key: &str, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    (leading_u64(blake3::hash(key.as_bytes())) % partitions as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn nodes(n: usize) -> Vec<NodeId> {
        (0..n).map(|i| NodeId::new(format!("node-{}", i))).collect()
    }

    #[test]
    fn test_owner_is_stable() {
        let a = RendezvousSelector::new(nodes(3)).unwrap();
        let mut reversed = nodes(3);
        reversed.reverse();
        let b = RendezvousSelector::new(reversed).unwrap();
        for i in 0..50 {
            let key = format!("instance-{}", i);
            assert_eq!(a.owner(&key), a.owner(&key));
            assert_eq!(a.owner(&key), b.owner(&key));
        }
    }

    #[test]
    fn test_ownership_spreads_across_nodes() {
        let selector = RendezvousSelector::new(nodes(3)).unwrap();
        let mut counts: HashMap<NodeId, usize> = HashMap::new();
        for i in 0..300 {
            *counts.entry(selector.owner(&format!("k{}", i))).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
    }

    #[test]
    fn test_removing_a_node_only_moves_its_keys() {
        let all = RendezvousSelector::new(nodes(3)).unwrap();
        let fewer = RendezvousSelector::new(nodes(2)).unwrap();
        for i in 0..100 {
            let key = format!("k{}", i);
            let before = all.owner(&key);
            if before != NodeId::new("node-2") {
                assert_eq!(fewer.owner(&key), before);
            }
        }
    }

    #[test]
    fn test_empty_selector_is_rejected() {
        assert!(RendezvousSelector::new(Vec::new()).is_err());
    }

    #[test]
    fn test_partition_in_range() {
        for i in 0..100 {
            assert!(partition(&format!("k{}", i), 4) < 4);
        }
        assert_eq!(partition("anything", 1), 0);
        assert_eq!(partition("anything", 0), 0);
    }
}
