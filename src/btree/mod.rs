//! Persistent copy-on-write B-tree keyed by a composite of u64 levels.
//!
//! A tree of L levels maps an L-tuple of u64 keys to a value. Levels
//! 0..L-2 are trees of sub-tree roots (u64 values); the final level
//! stores the payload through its ValueTraits codec. All mutation goes
//! through the transaction manager so sharing between published roots is
//! automatic; the read path (the visitor walk) reads the block store
//! directly.

pub mod count;
pub mod damage;
mod insert;
pub mod node;
mod remove;
pub mod value;
pub mod walk;

use anyhow::{anyhow, Result};

use crate::block::BlockStore;
use crate::sm::SpaceMap;
use crate::tm::TransactionManager;

use self::insert::insert_single;
use self::node::{child_index, NodeKind, RawNode};
use self::remove::remove_single;
use self::value::{BlockAddrRefCounter, NoopRefCounter, RefCounter, ValueTraits};
use self::walk::{walk_tree, NodeVisitor};

pub use self::count::{NodeCountVisitor, NodeCounts};
pub use self::damage::{BtreeDamage, BtreeDamageVisitor, DamageVisitor, KeyRange, ValueVisitor};
pub use self::node::{InternalNode, LeafNode};
pub use self::walk::NodeLocation;

/// Re-increment whatever children a node references; invoked by the
/// transaction manager when a shadow copies a shared node.
pub(crate) fn inc_node_children<V: ValueTraits>(
    sm: &mut dyn SpaceMap,
    data: &[u8],
    block: u64,
    rc: &dyn RefCounter<V>,
) -> Result<()> {
    let raw = RawNode::unpack(data, block)?;
    match raw.kind {
        NodeKind::Internal => {
            for i in 0..raw.nr_entries() {
                sm.inc(raw.value_u64(i))?;
            }
        }
        NodeKind::Leaf => {
            for chunk in &raw.values {
                let v = V::unpack(chunk)?;
                rc.inc(sm, &v)?;
            }
        }
    }
    Ok(())
}

/// Shadow a node and hand back its parsed content, re-addressed to the
/// (possibly new) block.
pub(crate) fn shadow_raw<V: ValueTraits>(
    tm: &mut TransactionManager,
    block: u64,
    rc: &dyn RefCounter<V>,
) -> Result<RawNode> {
    let mut inc =
        |sm: &mut dyn SpaceMap, data: &[u8]| inc_node_children::<V>(sm, data, block, rc);
    let s = tm.shadow(block, &mut inc)?;
    let mut raw = RawNode::unpack(&s.data, s.orig)?;
    raw.block = s.block;
    Ok(raw)
}

/// Allocate and write one empty leaf (the root of a fresh tree).
/// `value_size` is the packed size the leaf will carry.
pub(crate) fn new_empty_leaf(tm: &mut TransactionManager, value_size: usize) -> Result<u64> {
    let bs = tm.store.block_size as usize;
    let (block, _) = tm.new_block()?;
    let n = RawNode::new(NodeKind::Leaf, block, bs, value_size);
    let mut data = n.pack(bs)?;
    tm.write(block, &mut data)?;
    Ok(block)
}

fn lookup_single<V: ValueTraits>(store: &BlockStore, root: u64, key: u64) -> Result<Option<V>> {
    let mut block = root;
    loop {
        let data = store.read_block(block)?;
        let n = RawNode::unpack(&data, block)?;
        match n.kind {
            NodeKind::Internal => match child_index(&n.keys, key) {
                Some(i) => block = n.value_u64(i),
                None => return Ok(None),
            },
            NodeKind::Leaf => {
                return match n.keys.binary_search(&key) {
                    Ok(i) => Ok(Some(V::unpack(&n.values[i])?)),
                    Err(_) => Ok(None),
                };
            }
        }
    }
}

/// Tree handle: root address, level count, value codec. The root only
/// moves through mutations; publish it with TransactionManager::commit.
pub struct BTree<V: ValueTraits> {
    root: u64,
    levels: usize,
    rc: Box<dyn RefCounter<V>>,
}

impl<V: ValueTraits> BTree<V> {
    /// Format a fresh, empty tree: one empty leaf per the final level.
    pub fn format(tm: &mut TransactionManager, levels: usize) -> Result<Self> {
        Self::format_with_rc(tm, levels, Box::new(NoopRefCounter))
    }

    pub fn format_with_rc(
        tm: &mut TransactionManager,
        levels: usize,
        rc: Box<dyn RefCounter<V>>,
    ) -> Result<Self> {
        if levels == 0 {
            return Err(anyhow!("a tree needs at least one key level"));
        }
        let value_size = if levels == 1 { V::PACKED_SIZE } else { 8 };
        let root = new_empty_leaf(tm, value_size)?;
        Ok(Self { root, levels, rc })
    }

    /// Open a handle onto an existing root (e.g. from the meta file).
    pub fn open(root: u64, levels: usize) -> Result<Self> {
        Self::open_with_rc(root, levels, Box::new(NoopRefCounter))
    }

    pub fn open_with_rc(root: u64, levels: usize, rc: Box<dyn RefCounter<V>>) -> Result<Self> {
        if levels == 0 {
            return Err(anyhow!("a tree needs at least one key level"));
        }
        Ok(Self { root, levels, rc })
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    fn check_keys(&self, keys: &[u64]) -> Result<()> {
        if keys.len() != self.levels {
            return Err(anyhow!(
                "composite key has {} levels, tree has {}",
                keys.len(),
                self.levels
            ));
        }
        Ok(())
    }

    /// Insert or overwrite. Returns the previous value on overwrite.
    pub fn insert(
        &mut self,
        tm: &mut TransactionManager,
        keys: &[u64],
        value: &V,
    ) -> Result<Option<V>> {
        self.check_keys(keys)?;
        let (new_root, replaced) = self.insert_at_level(tm, self.root, keys, 0, value)?;
        self.root = new_root;
        Ok(replaced)
    }

    fn insert_at_level(
        &self,
        tm: &mut TransactionManager,
        root: u64,
        keys: &[u64],
        level: usize,
        value: &V,
    ) -> Result<(u64, Option<V>)> {
        if level + 1 == self.levels {
            return insert_single::<V>(tm, root, keys[level], value, self.rc.as_ref(), true);
        }

        // Shadow the outer path before touching the inner tree: when the
        // slot-bearing leaf is shared, copying it re-increments every
        // sub-root it holds, so the descent below sees the share and
        // copies instead of mutating the snapshot's sub-tree.
        let (root, sub_root) = match lookup_single::<u64>(&tm.store, root, keys[level])? {
            Some(s) => {
                let (r, _) =
                    insert_single::<u64>(tm, root, keys[level], &s, &BlockAddrRefCounter, false)?;
                (r, s)
            }
            None => {
                let value_size = if level + 2 == self.levels { V::PACKED_SIZE } else { 8 };
                let s = new_empty_leaf(tm, value_size)?;
                let (r, _) =
                    insert_single::<u64>(tm, root, keys[level], &s, &BlockAddrRefCounter, false)?;
                (r, s)
            }
        };

        let (new_sub, replaced) = self.insert_at_level(tm, sub_root, keys, level + 1, value)?;

        // Rewrite the (possibly moved) sub-root into this level. The CoW
        // descent already accounted for the old root, so the overwrite
        // must not dec it again; the path is in the shadow set by now, so
        // this pass mutates in place.
        let (new_root, _) = insert_single::<u64>(
            tm,
            root,
            keys[level],
            &new_sub,
            &BlockAddrRefCounter,
            false,
        )?;
        Ok((new_root, replaced))
    }

    /// Remove a key. Returns the removed value when present.
    pub fn remove(&mut self, tm: &mut TransactionManager, keys: &[u64]) -> Result<Option<V>> {
        self.check_keys(keys)?;
        // Absent keys would still shadow the whole path; check first.
        if self.lookup(&tm.store, keys)?.is_none() {
            return Ok(None);
        }
        let (new_root, removed) = self.remove_at_level(tm, self.root, keys, 0)?;
        self.root = new_root;
        Ok(removed)
    }

    fn remove_at_level(
        &self,
        tm: &mut TransactionManager,
        root: u64,
        keys: &[u64],
        level: usize,
    ) -> Result<(u64, Option<V>)> {
        if level + 1 == self.levels {
            return remove_single::<V>(tm, root, keys[level], self.rc.as_ref(), true);
        }

        let sub_root = match lookup_single::<u64>(&tm.store, root, keys[level])? {
            Some(s) => s,
            None => return Ok((root, None)),
        };
        // Same ordering as insert: own the outer path (propagating any
        // share onto the sub-root) before the inner tree is touched.
        let (root, _) =
            insert_single::<u64>(tm, root, keys[level], &sub_root, &BlockAddrRefCounter, false)?;
        let (new_sub, removed) = self.remove_at_level(tm, sub_root, keys, level + 1)?;
        let (new_root, _) = insert_single::<u64>(
            tm,
            root,
            keys[level],
            &new_sub,
            &BlockAddrRefCounter,
            false,
        )?;
        Ok((new_root, removed))
    }

    /// Point lookup. Propagates read failures (no damage tolerance on
    /// this path: a caller about to mutate must know the tree is sound).
    pub fn lookup(&self, store: &BlockStore, keys: &[u64]) -> Result<Option<V>> {
        self.check_keys(keys)?;
        let mut root = self.root;
        for level in 0..self.levels - 1 {
            match lookup_single::<u64>(store, root, keys[level])? {
                Some(s) => root = s,
                None => return Ok(None),
            }
        }
        lookup_single::<V>(store, root, keys[self.levels - 1])
    }

    /// Depth-first walk with an arbitrary visitor.
    pub fn walk<Vis: NodeVisitor<V>>(&self, store: &BlockStore, visitor: &mut Vis) -> Result<()> {
        walk_tree::<V, Vis>(store, self.levels, self.root, visitor)
    }

    /// Damage-tolerant walk: intact values to `vv`, one record per
    /// corrupted subtree to `dv`. Corruption never aborts this walk.
    pub fn walk_with_damage<VV, DV>(&self, store: &BlockStore, vv: VV, dv: DV) -> Result<(VV, DV)>
    where
        VV: ValueVisitor<V>,
        DV: DamageVisitor,
    {
        let mut visitor = BtreeDamageVisitor::new(vv, dv);
        self.walk(store, &mut visitor)?;
        Ok(visitor.into_inner())
    }
}
