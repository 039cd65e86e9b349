//! btree/remove — copy-on-write remove with borrow/merge rebalancing.
//!
//! The descent shadows every node on the path. When a child comes back
//! under the minimum occupancy threshold (max_entries / 3) the parent
//! rebalances it against a neighbour: redistribute when the pair still
//! overflows one node, merge otherwise (freeing the emptied block).
//! A root that shrinks to a single internal entry collapses into its
//! child.

use anyhow::Result;

use crate::metrics::record_node_merge;
use crate::sm::SpaceMap;
use crate::tm::TransactionManager;

use super::insert::pack_u64;
use super::node::{child_index, NodeKind, RawNode};
use super::shadow_raw;
use super::value::{RefCounter, ValueTraits};

fn min_entries(max: usize) -> usize {
    (max / 3).max(1)
}

struct RemoveOutcome<V> {
    block: u64,
    first_key: Option<u64>,
    underflow: bool,
    removed: Option<V>,
}

fn remove_node<V: ValueTraits>(
    tm: &mut TransactionManager,
    block: u64,
    key: u64,
    rc: &dyn RefCounter<V>,
    dec_removed: bool,
) -> Result<RemoveOutcome<V>> {
    let bs = tm.store.block_size as usize;
    let mut n = shadow_raw::<V>(tm, block, rc)?;

    match n.kind {
        NodeKind::Leaf => {
            let mut removed = None;
            if let Ok(i) = n.keys.binary_search(&key) {
                let (_k, chunk) = n.remove_at(i);
                let old = V::unpack(&chunk)?;
                if dec_removed {
                    rc.dec(tm.sm.as_mut(), &old)?;
                }
                removed = Some(old);
            }

            let underflow = n.nr_entries() < min_entries(n.max_entries);
            let mut data = n.pack(bs)?;
            tm.write(n.block, &mut data)?;
            Ok(RemoveOutcome {
                block: n.block,
                first_key: n.first_key(),
                underflow,
                removed,
            })
        }

        NodeKind::Internal => {
            let idx = match child_index(&n.keys, key) {
                Some(i) => i,
                None => {
                    // Key below the subtree minimum: nothing to remove,
                    // but the node is already shadowed, so write it back.
                    let underflow = n.nr_entries() < min_entries(n.max_entries);
                    let first_key = n.first_key();
                    let mut data = n.pack(bs)?;
                    tm.write(n.block, &mut data)?;
                    return Ok(RemoveOutcome {
                        block: n.block,
                        first_key,
                        underflow,
                        removed: None,
                    });
                }
            };

            let child = n.value_u64(idx);
            let out = remove_node::<V>(tm, child, key, rc, dec_removed)?;
            n.values[idx] = pack_u64(out.block);
            if let Some(fk) = out.first_key {
                n.keys[idx] = fk;
            }

            if out.underflow {
                rebalance_child::<V>(tm, &mut n, idx, rc)?;
            }

            let underflow = n.nr_entries() < min_entries(n.max_entries);
            let first_key = n.first_key();
            let mut data = n.pack(bs)?;
            tm.write(n.block, &mut data)?;
            Ok(RemoveOutcome {
                block: n.block,
                first_key,
                underflow,
                removed: out.removed,
            })
        }
    }
}

/// Rebalance the child at `idx` against a neighbour. Entries only move
/// between the pair, so child reference counts are untouched; a merged
/// husk is returned to the space map.
fn rebalance_child<V: ValueTraits>(
    tm: &mut TransactionManager,
    parent: &mut RawNode,
    idx: usize,
    rc: &dyn RefCounter<V>,
) -> Result<()> {
    if parent.nr_entries() < 2 {
        return Ok(()); // no neighbour to draw from
    }
    let (li, ri) = if idx > 0 { (idx - 1, idx) } else { (idx, idx + 1) };

    let bs = tm.store.block_size as usize;
    // The descended child is already in the transaction's shadow set,
    // so shadowing it again is an in-place no-op; the neighbour may
    // genuinely need a copy before we touch it.
    let mut left = shadow_raw::<V>(tm, parent.value_u64(li), rc)?;
    let mut right = shadow_raw::<V>(tm, parent.value_u64(ri), rc)?;

    let total = left.nr_entries() + right.nr_entries();
    if total <= left.max_entries {
        // Merge right into left and drop the husk.
        left.keys.append(&mut right.keys);
        left.values.append(&mut right.values);

        let mut ldata = left.pack(bs)?;
        tm.write(left.block, &mut ldata)?;

        parent.values[li] = pack_u64(left.block);
        parent.remove_at(ri);
        tm.sm.dec(right.block)?;
        record_node_merge();
    } else {
        // Redistribute evenly across the pair.
        let target_left = total / 2;
        if left.nr_entries() > target_left {
            let moved_keys = left.keys.split_off(target_left);
            let moved_vals = left.values.split_off(target_left);
            right.keys.splice(0..0, moved_keys);
            right.values.splice(0..0, moved_vals);
        } else {
            let take = target_left - left.nr_entries();
            left.keys.extend(right.keys.drain(0..take));
            left.values.extend(right.values.drain(0..take));
        }

        let mut ldata = left.pack(bs)?;
        tm.write(left.block, &mut ldata)?;
        let mut rdata = right.pack(bs)?;
        tm.write(right.block, &mut rdata)?;

        parent.values[li] = pack_u64(left.block);
        parent.values[ri] = pack_u64(right.block);
        parent.keys[ri] = right.keys[0];
    }
    Ok(())
}

/// Remove from a single-level tree rooted at `root`. Returns the new
/// root and the removed value, if the key was present.
pub(crate) fn remove_single<V: ValueTraits>(
    tm: &mut TransactionManager,
    root: u64,
    key: u64,
    rc: &dyn RefCounter<V>,
    dec_removed: bool,
) -> Result<(u64, Option<V>)> {
    let out = remove_node::<V>(tm, root, key, rc, dec_removed)?;

    // Collapse trivial internal roots into their only child.
    let mut root_block = out.block;
    loop {
        let data = tm.read(root_block)?;
        let n = RawNode::unpack(&data, root_block)?;
        if n.kind == NodeKind::Internal && n.nr_entries() == 1 {
            let child = n.value_u64(0);
            tm.sm.dec(root_block)?;
            root_block = child;
        } else {
            break;
        }
    }
    Ok((root_block, out.removed))
}
