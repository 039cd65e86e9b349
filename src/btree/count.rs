//! Usage accounting over the visitor protocol.

use anyhow::Result;

use super::node::{InternalNode, LeafNode};
use super::value::ValueTraits;
use super::walk::{NodeLocation, NodeVisitor};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCounts {
    pub internal: u64,
    pub internal_leaves: u64,
    pub leaves: u64,
    pub values: u64,
}

impl NodeCounts {
    pub fn total_blocks(&self) -> u64 {
        self.internal + self.internal_leaves + self.leaves
    }
}

/// Tallies nodes and values; the walk must be damage-free (any read
/// failure propagates through the default error hook).
#[derive(Debug, Default)]
pub struct NodeCountVisitor {
    pub counts: NodeCounts,
}

impl<V: ValueTraits> NodeVisitor<V> for NodeCountVisitor {
    fn visit_internal(&mut self, _loc: &NodeLocation, _node: &InternalNode) -> Result<bool> {
        self.counts.internal += 1;
        Ok(true)
    }

    fn visit_internal_leaf(&mut self, _loc: &NodeLocation, _node: &LeafNode<u64>) -> Result<bool> {
        self.counts.internal_leaves += 1;
        Ok(true)
    }

    fn visit_leaf(&mut self, _loc: &NodeLocation, node: &LeafNode<V>) -> Result<bool> {
        self.counts.leaves += 1;
        self.counts.values += node.keys.len() as u64;
        Ok(true)
    }
}
