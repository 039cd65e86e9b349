//! Depth-first traversal and the node visitor protocol.
//!
//! The walk reads every node straight from the block store (readers do
//! not go through the transaction manager) and invokes exactly one visit
//! method per node before recursing:
//!
//! - visit_internal:      internal node; children are nodes of this level
//! - visit_internal_leaf: leaf of a non-final level; values are sub-tree
//!                        roots (the level boundary of composite keys)
//! - visit_leaf:          leaf of the final level; values are payloads
//!
//! Returning false prunes descent into that node's children; siblings
//! are unaffected. A node that fails to read or parse is routed to
//! error_accessing_node, whose default propagates the failure; the
//! damage-tolerant visitor overrides it to keep walking.
//!
//! visit_complete fires exactly once when the walk returns, corruption
//! or not. Over a well-formed tree the walk reports keys in strictly
//! ascending order.

use anyhow::Result;

use crate::block::BlockStore;

use super::node::{InternalNode, LeafNode, NodeKind, RawNode};
use super::value::ValueTraits;

/// Transient traversal context for one node. `key` is the lower bound
/// inherited from the parent slot that led here (None for a root).
#[derive(Debug, Clone, Copy)]
pub struct NodeLocation {
    pub depth: usize,
    pub level: usize,
    pub sub_root: bool,
    pub key: Option<u64>,
}

pub trait NodeVisitor<V: ValueTraits> {
    fn visit_internal(&mut self, loc: &NodeLocation, node: &InternalNode) -> Result<bool>;

    fn visit_internal_leaf(&mut self, loc: &NodeLocation, node: &LeafNode<u64>) -> Result<bool>;

    fn visit_leaf(&mut self, loc: &NodeLocation, node: &LeafNode<V>) -> Result<bool>;

    /// A node could not be read or parsed. The default propagates, which
    /// aborts the walk; overriders may record the failure and return
    /// Ok(()) to continue with the remaining siblings.
    fn error_accessing_node(
        &mut self,
        _loc: &NodeLocation,
        _block: u64,
        err: anyhow::Error,
    ) -> Result<()> {
        Err(err)
    }

    fn visit_complete(&mut self) -> Result<()> {
        Ok(())
    }
}

enum ParsedNode<V> {
    Internal(InternalNode),
    InternalLeaf(LeafNode<u64>),
    Leaf(LeafNode<V>),
}

fn read_node<V: ValueTraits>(
    store: &BlockStore,
    levels: usize,
    level: usize,
    block: u64,
) -> Result<ParsedNode<V>> {
    let data = store.read_block(block)?;
    let raw = RawNode::unpack(&data, block)?;
    match raw.kind {
        NodeKind::Internal => Ok(ParsedNode::Internal(raw.to_internal()?)),
        NodeKind::Leaf if level + 1 == levels => Ok(ParsedNode::Leaf(raw.to_leaf::<V>()?)),
        NodeKind::Leaf => Ok(ParsedNode::InternalLeaf(raw.to_leaf::<u64>()?)),
    }
}

fn visit_node<V: ValueTraits, Vis: NodeVisitor<V>>(
    store: &BlockStore,
    levels: usize,
    loc: &NodeLocation,
    block: u64,
    visitor: &mut Vis,
) -> Result<()> {
    let parsed = match read_node::<V>(store, levels, loc.level, block) {
        Ok(p) => p,
        Err(e) => return visitor.error_accessing_node(loc, block, e),
    };

    match parsed {
        ParsedNode::Internal(n) => {
            if visitor.visit_internal(loc, &n)? {
                for (&k, &child) in n.keys.iter().zip(n.children.iter()) {
                    let child_loc = NodeLocation {
                        depth: loc.depth + 1,
                        level: loc.level,
                        sub_root: false,
                        key: Some(k),
                    };
                    visit_node(store, levels, &child_loc, child, visitor)?;
                }
            }
        }
        ParsedNode::InternalLeaf(n) => {
            if visitor.visit_internal_leaf(loc, &n)? {
                for &sub_root in n.values.iter() {
                    // A sub-tree root opens a fresh key space; the
                    // parent's key is no bound within it.
                    let child_loc = NodeLocation {
                        depth: loc.depth + 1,
                        level: loc.level + 1,
                        sub_root: true,
                        key: None,
                    };
                    visit_node(store, levels, &child_loc, sub_root, visitor)?;
                }
            }
        }
        ParsedNode::Leaf(n) => {
            // No children to prune; the return value is accepted for
            // protocol symmetry.
            let _ = visitor.visit_leaf(loc, &n)?;
        }
    }
    Ok(())
}

/// Depth-first, left-to-right walk of the tree rooted at `root`.
pub fn walk_tree<V: ValueTraits, Vis: NodeVisitor<V>>(
    store: &BlockStore,
    levels: usize,
    root: u64,
    visitor: &mut Vis,
) -> Result<()> {
    let loc = NodeLocation {
        depth: 0,
        level: 0,
        sub_root: true,
        key: None,
    };
    visit_node(store, levels, &loc, root, visitor)?;
    visitor.visit_complete()
}
