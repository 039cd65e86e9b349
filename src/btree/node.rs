//! btree/node — on-disk node layout, pack/unpack, structural validation.
//!
//! One node per block:
//!   header (32 B): [csum u32][flags u32][blocknr u64][nr_entries u32]
//!                  [max_entries u32][value_size u32][reserved u32]
//!   keys:   [u64; max_entries] (LE; strictly ascending for nr_entries)
//!   values: [[u8; value_size]; max_entries]
//!
//! Internal nodes store child block addresses as values (value_size 8);
//! leaves store codec-packed values. Violations of the layout invariants
//! parse into StoreError::Structural so the damage-tolerant walk can
//! classify them; the checksum itself is owned by the block store.

use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    NODE_FLAG_INTERNAL, NODE_FLAG_LEAF, NODE_HDR_SIZE, NODE_OFF_BLOCKNR, NODE_OFF_FLAGS,
    NODE_OFF_MAX_ENTRIES, NODE_OFF_NR_ENTRIES, NODE_OFF_VALUE_SIZE,
};
use crate::error::StoreError;

use super::value::ValueTraits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Internal,
    Leaf,
}

#[derive(Debug, Clone)]
pub struct NodeHeader {
    pub kind: NodeKind,
    pub blocknr: u64,
    pub nr_entries: u32,
    pub max_entries: u32,
    pub value_size: u32,
}

/// Entries that fit a block at a given value size.
pub fn max_entries_for(block_size: usize, value_size: usize) -> usize {
    (block_size - NODE_HDR_SIZE) / (8 + value_size)
}

/// Parse and validate a node header against the address the block was
/// read from and the physical block size.
pub fn read_header(data: &[u8], block: u64) -> Result<NodeHeader> {
    if data.len() < NODE_HDR_SIZE {
        return Err(StoreError::structural(block, "block shorter than node header").into());
    }

    let flags = LittleEndian::read_u32(&data[NODE_OFF_FLAGS..NODE_OFF_FLAGS + 4]);
    let kind = match flags {
        NODE_FLAG_INTERNAL => NodeKind::Internal,
        NODE_FLAG_LEAF => NodeKind::Leaf,
        _ => {
            return Err(
                StoreError::structural(block, format!("bad node flags {:#x}", flags)).into(),
            )
        }
    };

    let blocknr = LittleEndian::read_u64(&data[NODE_OFF_BLOCKNR..NODE_OFF_BLOCKNR + 8]);
    if blocknr != block {
        return Err(StoreError::structural(
            block,
            format!("blocknr mismatch (header {}, location {})", blocknr, block),
        )
        .into());
    }

    let nr_entries = LittleEndian::read_u32(&data[NODE_OFF_NR_ENTRIES..NODE_OFF_NR_ENTRIES + 4]);
    let max_entries = LittleEndian::read_u32(&data[NODE_OFF_MAX_ENTRIES..NODE_OFF_MAX_ENTRIES + 4]);
    let value_size = LittleEndian::read_u32(&data[NODE_OFF_VALUE_SIZE..NODE_OFF_VALUE_SIZE + 4]);

    if value_size == 0 {
        return Err(StoreError::structural(block, "zero value_size").into());
    }
    if max_entries as usize != max_entries_for(data.len(), value_size as usize) {
        return Err(StoreError::structural(
            block,
            format!(
                "max_entries {} inconsistent with block size {} / value size {}",
                max_entries,
                data.len(),
                value_size
            ),
        )
        .into());
    }
    if nr_entries > max_entries {
        return Err(StoreError::structural(
            block,
            format!("nr_entries {} > max_entries {}", nr_entries, max_entries),
        )
        .into());
    }

    Ok(NodeHeader {
        kind,
        blocknr,
        nr_entries,
        max_entries,
        value_size,
    })
}

/// Structural node representation used by the mutation path. Values are
/// kept as packed chunks; mutation only moves (key, chunk) pairs around,
/// so rebalancing never needs the value codec.
#[derive(Debug, Clone)]
pub struct RawNode {
    pub block: u64,
    pub kind: NodeKind,
    pub max_entries: usize,
    pub value_size: usize,
    pub keys: Vec<u64>,
    pub values: Vec<Vec<u8>>,
}

impl RawNode {
    /// Fresh empty node for a given block size / value size.
    pub fn new(kind: NodeKind, block: u64, block_size: usize, value_size: usize) -> Self {
        Self {
            block,
            kind,
            max_entries: max_entries_for(block_size, value_size),
            value_size,
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Parse a whole node, validating the header and key ordering.
    pub fn unpack(data: &[u8], block: u64) -> Result<Self> {
        let h = read_header(data, block)?;
        let nr = h.nr_entries as usize;
        let max = h.max_entries as usize;
        let vs = h.value_size as usize;

        let mut keys = Vec::with_capacity(nr);
        for i in 0..nr {
            let off = NODE_HDR_SIZE + i * 8;
            let k = LittleEndian::read_u64(&data[off..off + 8]);
            if let Some(&prev) = keys.last() {
                if k <= prev {
                    return Err(StoreError::structural(
                        block,
                        format!("keys not strictly ascending ({} after {})", k, prev),
                    )
                    .into());
                }
            }
            keys.push(k);
        }

        let values_off = NODE_HDR_SIZE + max * 8;
        let mut values = Vec::with_capacity(nr);
        for i in 0..nr {
            let off = values_off + i * vs;
            values.push(data[off..off + vs].to_vec());
        }

        Ok(Self {
            block,
            kind: h.kind,
            max_entries: max,
            value_size: vs,
            keys,
            values,
        })
    }

    /// Pack into a full block buffer. The checksum field is left zero;
    /// the block store stamps it on write.
    pub fn pack(&self, block_size: usize) -> Result<Vec<u8>> {
        debug_assert_eq!(self.keys.len(), self.values.len());
        if self.keys.len() > self.max_entries {
            return Err(StoreError::structural(
                self.block,
                format!(
                    "packing {} entries into node capped at {}",
                    self.keys.len(),
                    self.max_entries
                ),
            )
            .into());
        }

        let mut data = vec![0u8; block_size];
        let flags = match self.kind {
            NodeKind::Internal => NODE_FLAG_INTERNAL,
            NodeKind::Leaf => NODE_FLAG_LEAF,
        };
        LittleEndian::write_u32(&mut data[NODE_OFF_FLAGS..NODE_OFF_FLAGS + 4], flags);
        LittleEndian::write_u64(
            &mut data[NODE_OFF_BLOCKNR..NODE_OFF_BLOCKNR + 8],
            self.block,
        );
        LittleEndian::write_u32(
            &mut data[NODE_OFF_NR_ENTRIES..NODE_OFF_NR_ENTRIES + 4],
            self.keys.len() as u32,
        );
        LittleEndian::write_u32(
            &mut data[NODE_OFF_MAX_ENTRIES..NODE_OFF_MAX_ENTRIES + 4],
            self.max_entries as u32,
        );
        LittleEndian::write_u32(
            &mut data[NODE_OFF_VALUE_SIZE..NODE_OFF_VALUE_SIZE + 4],
            self.value_size as u32,
        );

        for (i, k) in self.keys.iter().enumerate() {
            let off = NODE_HDR_SIZE + i * 8;
            LittleEndian::write_u64(&mut data[off..off + 8], *k);
        }
        let values_off = NODE_HDR_SIZE + self.max_entries * 8;
        for (i, v) in self.values.iter().enumerate() {
            let off = values_off + i * self.value_size;
            data[off..off + self.value_size].copy_from_slice(v);
        }
        Ok(data)
    }

    #[inline]
    pub fn nr_entries(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.keys.len() >= self.max_entries
    }

    #[inline]
    pub fn first_key(&self) -> Option<u64> {
        self.keys.first().copied()
    }

    /// Value chunk interpreted as a block address (internal children,
    /// sub-tree roots in non-final-level leaves).
    #[inline]
    pub fn value_u64(&self, idx: usize) -> u64 {
        LittleEndian::read_u64(&self.values[idx])
    }

    pub fn insert_at(&mut self, idx: usize, key: u64, value: Vec<u8>) {
        self.keys.insert(idx, key);
        self.values.insert(idx, value);
    }

    pub fn remove_at(&mut self, idx: usize) -> (u64, Vec<u8>) {
        let k = self.keys.remove(idx);
        let v = self.values.remove(idx);
        (k, v)
    }

    // ---------------- typed views (read path) ----------------

    pub fn to_internal(&self) -> Result<InternalNode> {
        if self.kind != NodeKind::Internal {
            return Err(StoreError::structural(self.block, "expected internal node").into());
        }
        if self.value_size != 8 {
            return Err(StoreError::structural(
                self.block,
                format!("internal node value_size {} != 8", self.value_size),
            )
            .into());
        }
        let children = (0..self.nr_entries()).map(|i| self.value_u64(i)).collect();
        Ok(InternalNode {
            block: self.block,
            keys: self.keys.clone(),
            children,
        })
    }

    pub fn to_leaf<V: ValueTraits>(&self) -> Result<LeafNode<V>> {
        if self.kind != NodeKind::Leaf {
            return Err(StoreError::structural(self.block, "expected leaf node").into());
        }
        if self.value_size != V::PACKED_SIZE {
            return Err(StoreError::structural(
                self.block,
                format!(
                    "leaf value_size {} does not match codec size {}",
                    self.value_size,
                    V::PACKED_SIZE
                ),
            )
            .into());
        }
        let mut values = Vec::with_capacity(self.nr_entries());
        for chunk in &self.values {
            values.push(V::unpack(chunk)?);
        }
        Ok(LeafNode {
            block: self.block,
            keys: self.keys.clone(),
            values,
        })
    }
}

/// Internal node view handed to visitors.
#[derive(Debug, Clone)]
pub struct InternalNode {
    pub block: u64,
    pub keys: Vec<u64>,
    pub children: Vec<u64>,
}

/// Leaf node view handed to visitors. For non-final levels V is u64
/// (sub-tree roots).
#[derive(Debug, Clone)]
pub struct LeafNode<V> {
    pub block: u64,
    pub keys: Vec<u64>,
    pub values: Vec<V>,
}

/// Child slot that covers `key` during descent, or None when the key is
/// below the node's first key (cannot be present).
pub fn child_index(keys: &[u64], key: u64) -> Option<usize> {
    match keys.binary_search(&key) {
        Ok(i) => Some(i),
        Err(0) => None,
        Err(i) => Some(i - 1),
    }
}

/// Child slot to descend into for an insert: keys below the current
/// minimum go into slot 0 (the boundary key is lowered on the way down).
pub fn child_index_clamped(keys: &[u64], key: u64) -> usize {
    child_index(keys, key).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let bs = 4096usize;
        let mut n = RawNode::new(NodeKind::Leaf, 42, bs, 8);
        for i in 0..10u64 {
            let mut chunk = vec![0u8; 8];
            LittleEndian::write_u64(&mut chunk, i * 100);
            n.insert_at(i as usize, i * 3, chunk);
        }
        let data = n.pack(bs).unwrap();
        let back = RawNode::unpack(&data, 42).unwrap();
        assert_eq!(back.kind, NodeKind::Leaf);
        assert_eq!(back.keys, n.keys);
        assert_eq!(back.values, n.values);
        assert_eq!(back.max_entries, max_entries_for(bs, 8));
    }

    #[test]
    fn unsorted_keys_are_structural() {
        let bs = 4096usize;
        let mut n = RawNode::new(NodeKind::Leaf, 7, bs, 8);
        n.keys = vec![5, 5];
        n.values = vec![vec![0u8; 8], vec![0u8; 8]];
        let data = n.pack(bs).unwrap();
        let err = RawNode::unpack(&data, 7).unwrap_err();
        assert_eq!(crate::error::StoreError::classify(&err), "structural");
    }

    #[test]
    fn blocknr_mismatch_is_structural() {
        let bs = 4096usize;
        let n = RawNode::new(NodeKind::Internal, 9, bs, 8);
        let data = n.pack(bs).unwrap();
        let err = RawNode::unpack(&data, 10).unwrap_err();
        assert_eq!(crate::error::StoreError::classify(&err), "structural");
    }

    #[test]
    fn child_index_bounds() {
        let keys = [10u64, 20, 30];
        assert_eq!(child_index(&keys, 5), None);
        assert_eq!(child_index(&keys, 10), Some(0));
        assert_eq!(child_index(&keys, 15), Some(0));
        assert_eq!(child_index(&keys, 20), Some(1));
        assert_eq!(child_index(&keys, 35), Some(2));
        assert_eq!(child_index_clamped(&keys, 5), 0);
    }
}
