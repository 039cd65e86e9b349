//! btree/insert — copy-on-write insert with bottom-up splitting.
//!
//! Every node on the descent path is shadowed through the transaction
//! manager before mutation, so sharing between roots stays intact.
//! Overflow propagates upward: a split child hands (left, right) to its
//! parent, and a split root grows a new root above itself. Internal keys
//! mirror the lowest key of the child subtree; inserting below the
//! current minimum rewrites the boundary key down the path.

use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};

use crate::error::StoreError;
use crate::metrics::record_node_split;
use crate::tm::TransactionManager;

use super::node::{child_index_clamped, NodeKind, RawNode};
use super::shadow_raw;
use super::value::{RefCounter, ValueTraits};

pub(crate) fn pack_u64(v: u64) -> Vec<u8> {
    let mut chunk = vec![0u8; 8];
    LittleEndian::write_u64(&mut chunk, v);
    chunk
}

pub(crate) enum InsertEffect<V> {
    /// Node rewritten in place (possibly at a shadowed address).
    Done {
        block: u64,
        first_key: u64,
        replaced: Option<V>,
    },
    /// Node overflowed and split into two siblings.
    Split {
        left: u64,
        left_key: u64,
        right: u64,
        right_key: u64,
        replaced: Option<V>,
    },
}

/// Split the upper half of `n` into a freshly allocated sibling and
/// write both out.
fn split_node(tm: &mut TransactionManager, n: &mut RawNode) -> Result<(u64, u64, u64, u64)> {
    let bs = tm.store.block_size as usize;
    let (right_block, _) = tm.new_block()?;

    let mid = n.nr_entries() / 2;
    let mut right = RawNode::new(n.kind, right_block, bs, n.value_size);
    right.keys = n.keys.split_off(mid);
    right.values = n.values.split_off(mid);

    let mut ldata = n.pack(bs)?;
    tm.write(n.block, &mut ldata)?;
    let mut rdata = right.pack(bs)?;
    tm.write(right.block, &mut rdata)?;
    record_node_split();

    Ok((n.block, n.keys[0], right.block, right.keys[0]))
}

fn insert_node<V: ValueTraits>(
    tm: &mut TransactionManager,
    block: u64,
    key: u64,
    value_chunk: &[u8],
    rc: &dyn RefCounter<V>,
    dec_replaced: bool,
) -> Result<InsertEffect<V>> {
    let bs = tm.store.block_size as usize;
    let mut n = shadow_raw::<V>(tm, block, rc)?;

    match n.kind {
        NodeKind::Leaf => {
            let replaced = match n.keys.binary_search(&key) {
                Ok(i) => {
                    let old = V::unpack(&n.values[i])?;
                    if dec_replaced {
                        rc.dec(tm.sm.as_mut(), &old)?;
                    }
                    n.values[i] = value_chunk.to_vec();
                    Some(old)
                }
                Err(i) => {
                    n.insert_at(i, key, value_chunk.to_vec());
                    None
                }
            };

            if n.nr_entries() > n.max_entries {
                let (left, left_key, right, right_key) = split_node(tm, &mut n)?;
                return Ok(InsertEffect::Split {
                    left,
                    left_key,
                    right,
                    right_key,
                    replaced,
                });
            }

            let mut data = n.pack(bs)?;
            tm.write(n.block, &mut data)?;
            Ok(InsertEffect::Done {
                block: n.block,
                first_key: n.keys[0],
                replaced,
            })
        }

        NodeKind::Internal => {
            if n.nr_entries() == 0 {
                return Err(StoreError::structural(n.block, "empty internal node").into());
            }
            let idx = child_index_clamped(&n.keys, key);
            let child = n.value_u64(idx);

            match insert_node::<V>(tm, child, key, value_chunk, rc, dec_replaced)? {
                InsertEffect::Done {
                    block: nb,
                    first_key,
                    replaced,
                } => {
                    n.values[idx] = pack_u64(nb);
                    n.keys[idx] = first_key;

                    let mut data = n.pack(bs)?;
                    tm.write(n.block, &mut data)?;
                    Ok(InsertEffect::Done {
                        block: n.block,
                        first_key: n.keys[0],
                        replaced,
                    })
                }
                InsertEffect::Split {
                    left,
                    left_key,
                    right,
                    right_key,
                    replaced,
                } => {
                    n.keys[idx] = left_key;
                    n.values[idx] = pack_u64(left);
                    n.insert_at(idx + 1, right_key, pack_u64(right));

                    if n.nr_entries() > n.max_entries {
                        let (l, lk, r, rk) = split_node(tm, &mut n)?;
                        return Ok(InsertEffect::Split {
                            left: l,
                            left_key: lk,
                            right: r,
                            right_key: rk,
                            replaced,
                        });
                    }

                    let mut data = n.pack(bs)?;
                    tm.write(n.block, &mut data)?;
                    Ok(InsertEffect::Done {
                        block: n.block,
                        first_key: n.keys[0],
                        replaced,
                    })
                }
            }
        }
    }
}

/// Insert into a single-level tree rooted at `root`. Returns the new
/// root and the value replaced by an overwrite, if any.
///
/// `dec_replaced` controls whether an overwritten value is handed to the
/// ref counter: true for payload levels, false when the caller already
/// accounted for the transfer (sub-root rewrites after CoW descent).
pub(crate) fn insert_single<V: ValueTraits>(
    tm: &mut TransactionManager,
    root: u64,
    key: u64,
    value: &V,
    rc: &dyn RefCounter<V>,
    dec_replaced: bool,
) -> Result<(u64, Option<V>)> {
    let mut chunk = vec![0u8; V::PACKED_SIZE];
    value.pack(&mut chunk);

    match insert_node::<V>(tm, root, key, &chunk, rc, dec_replaced)? {
        InsertEffect::Done { block, replaced, .. } => Ok((block, replaced)),
        InsertEffect::Split {
            left,
            left_key,
            right,
            right_key,
            replaced,
        } => {
            // Grow a new root above the split halves.
            let bs = tm.store.block_size as usize;
            let (root_block, _) = tm.new_block()?;
            let mut root_node = RawNode::new(NodeKind::Internal, root_block, bs, 8);
            root_node.insert_at(0, left_key, pack_u64(left));
            root_node.insert_at(1, right_key, pack_u64(right));
            let mut data = root_node.pack(bs)?;
            tm.write(root_block, &mut data)?;
            Ok((root_block, replaced))
        }
    }
}
