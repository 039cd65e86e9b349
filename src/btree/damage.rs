//! Damage-tolerant traversal.
//!
//! BtreeDamageVisitor wraps a value observer and a damage observer and
//! implements the node visitor protocol. Intact leaf entries are
//! forwarded in ascending key order; any node that fails to read
//! (io / checksum / structural) becomes exactly one damage record and
//! the walk continues with the remaining siblings. Corruption never
//! aborts the walk.
//!
//! Range inference: a damaged node cannot tell us which keys it covered,
//! but traversal can. Its begin bound is the parent key that led to it
//! (open for an unreadable root). Its end bound is only known once the
//! next node at the same depth is reached, so the visitor keeps one
//! pending record per depth and patches the end retroactively; records
//! still pending when the walk completes keep an open end. An open bound
//! means "no constraint on that side", never a sentinel key.

use std::fmt;
use std::marker::PhantomData;

use anyhow::Result;
use serde::Serialize;

use super::node::{InternalNode, LeafNode};
use super::value::ValueTraits;
use super::walk::{NodeLocation, NodeVisitor};

/// Key interval with optionally open sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct KeyRange {
    pub begin: Option<u64>,
    pub end: Option<u64>,
}

impl KeyRange {
    pub fn new(begin: Option<u64>, end: Option<u64>) -> Self {
        Self { begin, end }
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.begin {
            Some(b) => write!(f, "{}", b)?,
            None => {}
        }
        write!(f, "..")?;
        match self.end {
            Some(e) => write!(f, "{}", e),
            None => Ok(()),
        }
    }
}

/// One report per corrupted subtree: the key level it belongs to, the
/// inferred key range it would have covered, and a reason string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BtreeDamage {
    pub level: u32,
    pub keys: KeyRange,
    pub reason: String,
}

/// Receives every intact value, in ascending key order.
pub trait ValueVisitor<V> {
    fn visit(&mut self, key: u64, value: &V) -> Result<()>;

    fn complete(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Receives one record per corrupted subtree.
pub trait DamageVisitor {
    fn visit(&mut self, damage: &BtreeDamage) -> Result<()>;

    fn complete(&mut self) -> Result<()> {
        Ok(())
    }
}

struct PendingDamage {
    level: usize,
    begin: Option<u64>,
    reason: String,
}

pub struct BtreeDamageVisitor<V, VV, DV>
where
    V: ValueTraits,
    VV: ValueVisitor<V>,
    DV: DamageVisitor,
{
    pub value_visitor: VV,
    pub damage_visitor: DV,
    // One not-yet-finalized damage record per depth; patched when the
    // next node at that depth is seen.
    pending: Vec<Option<PendingDamage>>,
    _marker: PhantomData<V>,
}

impl<V, VV, DV> BtreeDamageVisitor<V, VV, DV>
where
    V: ValueTraits,
    VV: ValueVisitor<V>,
    DV: DamageVisitor,
{
    pub fn new(value_visitor: VV, damage_visitor: DV) -> Self {
        Self {
            value_visitor,
            damage_visitor,
            pending: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn into_inner(self) -> (VV, DV) {
        (self.value_visitor, self.damage_visitor)
    }

    /// Finalize the pending record at `depth`, if any. `begin` is the
    /// begin bound of the node now observed there; it becomes the end of
    /// the pending range when both live at the same key level. Key
    /// spaces of different levels are not comparable, so a cross-level
    /// encounter leaves the end open.
    fn finalize_at(&mut self, depth: usize, level: usize, begin: Option<u64>) -> Result<()> {
        if depth < self.pending.len() {
            if let Some(p) = self.pending[depth].take() {
                let end = if p.level == level { begin } else { None };
                self.damage_visitor.visit(&BtreeDamage {
                    level: p.level as u32,
                    keys: KeyRange::new(p.begin, end),
                    reason: p.reason,
                })?;
            }
        }
        Ok(())
    }

    /// Entering a sibling sub-tree: nothing observed from here on can
    /// bound a range from the previous sub-tree's key space, so every
    /// record pending at this depth or deeper finalizes with an open end.
    fn flush_from(&mut self, depth: usize) -> Result<()> {
        for d in depth..self.pending.len() {
            if let Some(p) = self.pending[d].take() {
                self.damage_visitor.visit(&BtreeDamage {
                    level: p.level as u32,
                    keys: KeyRange::new(p.begin, None),
                    reason: p.reason,
                })?;
            }
        }
        Ok(())
    }

    fn note_good(&mut self, loc: &NodeLocation, first_key: Option<u64>) -> Result<()> {
        if loc.sub_root && loc.level > 0 {
            return self.flush_from(loc.depth);
        }
        let begin = first_key.or(loc.key);
        self.finalize_at(loc.depth, loc.level, begin)
    }

    fn note_bad(&mut self, loc: &NodeLocation, reason: String) -> Result<()> {
        if loc.sub_root && loc.level > 0 {
            self.flush_from(loc.depth)?;
        } else {
            // This node's begin bound closes any damage pending at the
            // same depth (two adjacent corrupted siblings yield two
            // records).
            self.finalize_at(loc.depth, loc.level, loc.key)?;
        }

        if self.pending.len() <= loc.depth {
            self.pending.resize_with(loc.depth + 1, || None);
        }
        self.pending[loc.depth] = Some(PendingDamage {
            level: loc.level,
            begin: loc.key,
            reason,
        });
        Ok(())
    }
}

impl<V, VV, DV> NodeVisitor<V> for BtreeDamageVisitor<V, VV, DV>
where
    V: ValueTraits,
    VV: ValueVisitor<V>,
    DV: DamageVisitor,
{
    fn visit_internal(&mut self, loc: &NodeLocation, node: &InternalNode) -> Result<bool> {
        self.note_good(loc, node.keys.first().copied())?;
        Ok(true)
    }

    fn visit_internal_leaf(&mut self, loc: &NodeLocation, node: &LeafNode<u64>) -> Result<bool> {
        self.note_good(loc, node.keys.first().copied())?;
        Ok(true)
    }

    fn visit_leaf(&mut self, loc: &NodeLocation, node: &LeafNode<V>) -> Result<bool> {
        self.note_good(loc, node.keys.first().copied())?;
        for (k, v) in node.keys.iter().zip(node.values.iter()) {
            self.value_visitor.visit(*k, v)?;
        }
        Ok(true)
    }

    fn error_accessing_node(
        &mut self,
        loc: &NodeLocation,
        _block: u64,
        err: anyhow::Error,
    ) -> Result<()> {
        self.note_bad(loc, err.to_string())
    }

    fn visit_complete(&mut self) -> Result<()> {
        // Records still pending have no further sibling; their end bound
        // stays open. Shallowest first.
        for depth in 0..self.pending.len() {
            if let Some(p) = self.pending[depth].take() {
                self.damage_visitor.visit(&BtreeDamage {
                    level: p.level as u32,
                    keys: KeyRange::new(p.begin, None),
                    reason: p.reason,
                })?;
            }
        }
        self.value_visitor.complete()?;
        self.damage_visitor.complete()
    }
}
